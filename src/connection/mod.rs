pub mod config;
pub mod pool;

use crate::core::{ConnectionKey, DriverError, ServerDescriptor};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Rows and counters produced by one statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOutcome {
    pub affected_rows: u64,
    pub insert_id: Option<u64>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl QueryOutcome {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

/// A live link to one database server.
///
/// Implemented by the database driver; the router only needs these calls.
#[async_trait]
pub trait DbHandle: Send {
    /// Selects the database (schema) used by subsequent statements.
    async fn select_database(&mut self, name: &str) -> Result<(), DriverError>;

    /// Round-trips to the server to confirm the link is alive.
    async fn ping(&mut self) -> Result<(), DriverError>;

    async fn execute(&mut self, sql: &str) -> Result<QueryOutcome, DriverError>;

    async fn close(&mut self);

    fn is_open(&self) -> bool;
}

/// Opens physical connections.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        server: &ServerDescriptor,
        persistent: bool,
    ) -> Result<Box<dyn DbHandle>, DriverError>;
}

/// Charset and session-mode setup run once on every new physical connection.
#[async_trait]
pub trait SessionSetup: Send + Sync {
    async fn configure(&self, conn: &mut dyn DbHandle) -> Result<(), DriverError>;
}

/// [`SessionSetup`] that leaves the connection as the driver opened it.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSessionSetup;

#[async_trait]
impl SessionSetup for NoopSessionSetup {
    async fn configure(&self, _conn: &mut dyn DbHandle) -> Result<(), DriverError> {
        Ok(())
    }
}

/// Sets the connection character set (and collation) with `SET NAMES`.
#[derive(Debug, Clone)]
pub struct CharsetSetup {
    pub charset: String,
    pub collate: Option<String>,
}

impl CharsetSetup {
    pub fn new(charset: &str) -> Self {
        Self {
            charset: charset.to_string(),
            collate: None,
        }
    }

    pub fn collate(mut self, collate: &str) -> Self {
        self.collate = Some(collate.to_string());
        self
    }

    fn statement(&self) -> String {
        match &self.collate {
            Some(collate) => format!("SET NAMES '{}' COLLATE '{}'", self.charset, collate),
            None => format!("SET NAMES '{}'", self.charset),
        }
    }
}

#[async_trait]
impl SessionSetup for CharsetSetup {
    async fn configure(&self, conn: &mut dyn DbHandle) -> Result<(), DriverError> {
        if !matches!(
            self.charset.to_ascii_lowercase().as_str(),
            "utf8" | "utf8mb4" | "latin1"
        ) {
            return Err(DriverError::new(
                None,
                format!("charset '{}' is not supported", self.charset),
            ));
        }
        conn.execute(&self.statement()).await.map(|_| ())
    }
}

pub type SharedHandle = Arc<Mutex<Box<dyn DbHandle>>>;

/// A connection handed out by the router.
#[derive(Clone)]
pub struct RoutedConnection {
    pub key: ConnectionKey,
    pub host: String,
    pub port: u16,
    pub database: String,
    /// False when the connection was opened for this route.
    pub reused: bool,
    pub handle: SharedHandle,
}

impl RoutedConnection {
    pub fn host_and_port(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Runs a statement on the underlying handle.
    ///
    /// A handle the pool has since closed reports "server gone away".
    pub async fn execute(&self, sql: &str) -> Result<QueryOutcome, DriverError> {
        let mut handle = self.handle.lock().await;
        if !handle.is_open() {
            return Err(DriverError::server_gone("connection closed"));
        }
        handle.execute(sql).await
    }
}

impl std::fmt::Debug for RoutedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutedConnection")
            .field("key", &self.key.to_string())
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("reused", &self.reused)
            .finish()
    }
}
