//! Routing state machine.
//!
//! `Classify -> ResolveDataset -> DetermineOperation -> TryReuse ->
//! BuildCandidates -> AttemptCandidate* -> Success | RetryIgnoringLag | Fail`

mod attempt;
pub mod diagnostics;
pub mod session;

pub use diagnostics::ConnectionRecord;
pub use session::Session;

use crate::callbacks::{Callbacks, CallbackChain, ConnectionErrorContext};
use crate::classifier::routing_table;
use crate::connection::config::RouterConfig;
use crate::connection::pool::{ConnectionPool, PoolStats};
use crate::connection::{Connector, NoopSessionSetup, RoutedConnection, SessionSetup};
use crate::core::{ConnectionKey, Operation, Result, RouterError, RoutingOverride};
use crate::health::{HealthCache, LocalHealthCache, TcpProber};
use crate::lag::LagMonitor;
use crate::resolver::DatasetResolver;
use crate::topology::{CandidatePlan, GroupMap, Topology, build_candidates};
use attempt::{PassOutcome, RouteTarget};
use std::fmt;
use std::sync::Arc;
use tracing::Instrument;

/// Picks, opens and pools connections for SQL statements.
///
/// A `Router` is shared (behind an `Arc`) by every concurrent request; the
/// per-request state lives in a [`Session`].
pub struct Router {
    config: RouterConfig,
    topology: Arc<Topology>,
    resolver: DatasetResolver,
    prober: TcpProber,
    lag: LagMonitor,
    pool: ConnectionPool,
    connector: Arc<dyn Connector>,
    setup: Arc<dyn SessionSetup>,
    connection_error: CallbackChain<ConnectionErrorContext, ()>,
}

/// Builder for [`Router`]
pub struct RouterBuilder {
    topology: Topology,
    connector: Arc<dyn Connector>,
    config: RouterConfig,
    callbacks: Callbacks,
    health_cache: Option<Arc<dyn HealthCache>>,
    setup: Arc<dyn SessionSetup>,
}

impl RouterBuilder {
    pub fn config(mut self, config: RouterConfig) -> Self {
        self.config = config;
        self
    }

    pub fn callbacks(mut self, callbacks: Callbacks) -> Self {
        self.callbacks = callbacks;
        self
    }

    /// Shares TCP verdicts through `cache` instead of a process-local map.
    pub fn health_cache(mut self, cache: Arc<dyn HealthCache>) -> Self {
        self.health_cache = Some(cache);
        self
    }

    pub fn session_setup(mut self, setup: Arc<dyn SessionSetup>) -> Self {
        self.setup = setup;
        self
    }

    pub fn build(self) -> Result<Router> {
        self.config.validate()?;

        let Callbacks {
            dataset,
            dataset_found,
            lag,
            connection_error,
        } = self.callbacks;

        let resolver = DatasetResolver::new(
            self.topology.tables().clone(),
            dataset,
            dataset_found,
            self.config.default_dataset.clone(),
        );
        let cache = self
            .health_cache
            .unwrap_or_else(|| Arc::new(LocalHealthCache::new()));

        Ok(Router {
            prober: TcpProber::new(cache, self.config.tcp_cache_ttl),
            pool: ConnectionPool::new(&self.config),
            lag: LagMonitor::new(lag),
            resolver,
            topology: Arc::new(self.topology),
            connector: self.connector,
            setup: self.setup,
            connection_error,
            config: self.config,
        })
    }
}

impl Router {
    pub fn builder(topology: Topology, connector: Arc<dyn Connector>) -> RouterBuilder {
        RouterBuilder {
            topology,
            connector,
            config: RouterConfig::default(),
            callbacks: Callbacks::default(),
            health_cache: None,
            setup: Arc::new(NoopSessionSetup),
        }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn prober(&self) -> &TcpProber {
        &self.prober
    }

    pub async fn stats(&self) -> PoolStats {
        self.pool.stats().await
    }

    /// Returns a ready connection for `sql`.
    ///
    /// Reuses the pooled connection for the statement's `(dataset, operation)`
    /// when it is still alive; otherwise tries candidates in priority order,
    /// retrying once with replica lag ignored when lag was the only obstacle.
    pub async fn route(&self, session: &mut Session, sql: &str) -> Result<RoutedConnection> {
        let span = tracing::info_span!("route", session = %session.id());
        self.route_inner(session, sql).instrument(span).await
    }

    async fn route_inner(&self, session: &mut Session, sql: &str) -> Result<RoutedConnection> {
        if sql.trim().is_empty() {
            return Err(RouterError::EmptyStatement);
        }
        if self.topology.is_empty() {
            return Err(RouterError::NoServersConfigured);
        }

        let table = routing_table(sql);
        let resolution = self.resolver.resolve(&table, sql)?;
        let operation = session.operation_for(sql, &table);
        let key = ConnectionKey::new(resolution.dataset.as_str(), operation);
        session.note_route(&table, &resolution.dataset, &key);

        tracing::debug!(table = %table, dataset = %resolution.dataset, operation = %operation, "resolved");

        let routing = resolution.routing.as_ref();
        let database = routing.and_then(RoutingOverride::database_name);
        let _opening = self.pool.lock_key(&key).await;
        if let Some(conn) = self.pool.acquire(&key, database).await {
            return Ok(conn);
        }

        if operation == Operation::Write && self.config.primary_unavailable {
            tracing::warn!(key = %key, "primary unavailable, rejecting write");
            return Err(RouterError::PrimaryUnavailable);
        }

        let groups = self.topology.groups_for(&resolution.dataset, operation)?;
        let target = RouteTarget {
            key: &key,
            table: &table,
            routing,
            dataset_lag_threshold: self
                .topology
                .dataset(&resolution.dataset)
                .and_then(|dataset| dataset.lag_threshold),
        };

        let mut ignore_lag = false;
        loop {
            let plan = self
                .plan_candidates(groups)
                .ok_or_else(|| RouterError::NoCandidates {
                    dataset: resolution.dataset.clone(),
                    operation,
                })?;

            let failure = match self.attempt_pass(session, &target, &plan, ignore_lag).await {
                PassOutcome::Connected(conn) => return Ok(conn),
                PassOutcome::Exhausted(failure) => failure,
            };

            if failure.lagged > 0 && !ignore_lag {
                tracing::info!(key = %key, lagged = failure.lagged, "retrying with replica lag ignored");
                ignore_lag = true;
                continue;
            }

            tracing::error!(
                key = %key,
                host = %failure.host,
                port = failure.port,
                dataset = %resolution.dataset,
                "all candidates failed"
            );
            self.connection_error.run(&ConnectionErrorContext {
                host: failure.host.clone(),
                port: failure.port,
                operation,
                table: table.clone(),
                dataset: resolution.dataset.clone(),
                key: key.to_string(),
            });

            return Err(match failure.select_failed {
                Some(database) => RouterError::DatabaseSelectFailure {
                    database,
                    host: failure.host,
                    port: failure.port,
                },
                None => RouterError::AllCandidatesFailed {
                    host: failure.host,
                    port: failure.port,
                    operation,
                    table,
                    dataset: resolution.dataset,
                },
            });
        }
    }

    fn plan_candidates(&self, groups: &GroupMap) -> Option<CandidatePlan> {
        let mut rng = rand::thread_rng();
        build_candidates(groups, self.config.reconnect_retries, &mut rng)
    }

    /// Describes where `sql` would be routed without connecting anywhere.
    ///
    /// Dataset callbacks are consulted; dataset-found handlers are not.
    pub fn explain(&self, session: &Session, sql: &str) -> Result<RoutePlan> {
        if sql.trim().is_empty() {
            return Err(RouterError::EmptyStatement);
        }
        if self.topology.is_empty() {
            return Err(RouterError::NoServersConfigured);
        }

        let table = routing_table(sql);
        let resolution = self.resolver.lookup(&table, sql)?;
        let operation = session.operation_for(sql, &table);
        let groups = self.topology.groups_for(&resolution.dataset, operation)?;
        let plan = self
            .plan_candidates(groups)
            .ok_or_else(|| RouterError::NoCandidates {
                dataset: resolution.dataset.clone(),
                operation,
            })?;

        let candidates = plan
            .candidates
            .iter()
            .map(|candidate| {
                let server = match &resolution.routing {
                    Some(routing) => candidate.server.apply_override(routing),
                    None => (*candidate.server).clone(),
                };
                (candidate.group, server.host_and_port())
            })
            .collect();

        Ok(RoutePlan {
            key: ConnectionKey::new(resolution.dataset.as_str(), operation),
            table,
            routing: resolution.routing,
            unique_servers: plan.unique_servers,
            candidates,
        })
    }

    /// Closes the pooled connection for `key`, if any.
    pub async fn disconnect(&self, key: &ConnectionKey) -> bool {
        self.pool.evict(key).await
    }

    /// Closes every pooled connection.
    pub async fn disconnect_all(&self) {
        self.pool.close_all().await;
    }
}

/// Routing decision for a statement, as reported by [`Router::explain`].
#[derive(Debug, Clone)]
pub struct RoutePlan {
    pub key: ConnectionKey,
    pub table: String,
    pub routing: Option<RoutingOverride>,
    pub unique_servers: usize,
    /// `(priority group, host:port)` in attempt order.
    pub candidates: Vec<(u32, String)>,
}

impl fmt::Display for RoutePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "table:      {}", self.table)?;
        writeln!(f, "dataset:    {}", self.key.dataset)?;
        writeln!(f, "operation:  {}", self.key.operation)?;
        writeln!(f, "pool key:   {}", self.key)?;
        write!(f, "candidates: {} unique", self.unique_servers)?;
        for (attempt, (group, host)) in self.candidates.iter().enumerate() {
            write!(f, "\n  {:>2}. [group {}] {}", attempt + 1, group, host)?;
        }
        Ok(())
    }
}
