//! Ordered callback chains.
//!
//! Handlers run in registration order until one of them answers; the first
//! non-empty answer wins and the remaining handlers are not invoked.

use crate::core::{Operation, RoutingOverride};
use std::sync::Arc;

/// A single participant in a [`CallbackChain`].
///
/// Returning `None` passes the request on to the next handler.
pub trait Handler<Args, Out>: Send + Sync {
    fn try_handle(&self, args: &Args) -> Option<Out>;
}

impl<Args, Out, F> Handler<Args, Out> for F
where
    F: Fn(&Args) -> Option<Out> + Send + Sync,
{
    fn try_handle(&self, args: &Args) -> Option<Out> {
        self(args)
    }
}

pub struct CallbackChain<Args, Out> {
    handlers: Vec<Arc<dyn Handler<Args, Out>>>,
}

impl<Args, Out> CallbackChain<Args, Out> {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Appends a handler; it runs after every handler registered before it.
    pub fn register(&mut self, handler: Arc<dyn Handler<Args, Out>>) {
        self.handlers.push(handler);
    }

    /// Runs handlers in order and returns the first answer.
    pub fn run(&self, args: &Args) -> Option<Out> {
        self.handlers
            .iter()
            .find_map(|handler| handler.try_handle(args))
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl<Args, Out> Default for CallbackChain<Args, Out> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Args, Out> Clone for CallbackChain<Args, Out> {
    fn clone(&self) -> Self {
        Self {
            handlers: self.handlers.clone(),
        }
    }
}

/// What a dataset callback sees: the statement and the table it touches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetQuery {
    pub sql: String,
    pub table: String,
}

/// Answer of a dataset callback.
#[derive(Debug, Clone, PartialEq)]
pub enum DatasetDecision {
    Dataset(String),
    Override(RoutingOverride),
}

impl From<&str> for DatasetDecision {
    fn from(dataset: &str) -> Self {
        DatasetDecision::Dataset(dataset.to_string())
    }
}

impl From<RoutingOverride> for DatasetDecision {
    fn from(routing: RoutingOverride) -> Self {
        DatasetDecision::Override(routing)
    }
}

/// Notification that a statement was bound to a dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetFound {
    pub dataset: String,
    pub table: String,
}

/// Narrow view handed to lag handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LagContext {
    /// `host:port` of the replica, the key external lag caches use.
    pub lag_cache_key: String,
    pub dataset: String,
    pub table: String,
}

/// Lag reported by a lag handler.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LagReading {
    Seconds(f64),
    Unknown,
}

/// Context passed to connection-error handlers once a route finally fails.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionErrorContext {
    pub host: String,
    pub port: u16,
    pub operation: Operation,
    pub table: String,
    pub dataset: String,
    pub key: String,
}

/// Every extension point the router consults, grouped by purpose.
#[derive(Clone, Default)]
pub struct Callbacks {
    pub dataset: CallbackChain<DatasetQuery, DatasetDecision>,
    pub dataset_found: CallbackChain<DatasetFound, ()>,
    pub lag: CallbackChain<LagContext, LagReading>,
    pub connection_error: CallbackChain<ConnectionErrorContext, ()>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_dataset<F>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(&DatasetQuery) -> Option<DatasetDecision> + Send + Sync + 'static,
    {
        self.dataset.register(Arc::new(handler));
        self
    }

    pub fn on_dataset_found<F>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(&DatasetFound) -> Option<()> + Send + Sync + 'static,
    {
        self.dataset_found.register(Arc::new(handler));
        self
    }

    pub fn on_lag<F>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(&LagContext) -> Option<LagReading> + Send + Sync + 'static,
    {
        self.lag.register(Arc::new(handler));
        self
    }

    pub fn on_connection_error<F>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(&ConnectionErrorContext) -> Option<()> + Send + Sync + 'static,
    {
        self.connection_error.register(Arc::new(handler));
        self
    }
}
