use crate::core::types::Operation;
use thiserror::Error;

/// MySQL "server has gone away" client error number.
pub const SERVER_GONE_ERROR: u32 = 2006;

#[derive(Error, Debug)]
pub enum RouterError {
    #[error("Empty statement cannot be routed")]
    EmptyStatement,

    #[error("Unable to determine which dataset to query ({table})")]
    DatasetUnresolved { table: String },

    #[error("No database servers are configured")]
    NoServersConfigured,

    #[error("No databases available for {operation} on dataset '{dataset}'")]
    NoServersForOperation { dataset: String, operation: Operation },

    #[error("No database servers were found to {operation} dataset '{dataset}'")]
    NoCandidates { dataset: String, operation: Operation },

    #[error("Unable to connect to {host}:{port} to {operation} table '{table}' ({dataset})")]
    AllCandidatesFailed {
        host: String,
        port: u16,
        operation: Operation,
        table: String,
        dataset: String,
    },

    #[error("Unable to select database '{database}' on {host}:{port}")]
    DatabaseSelectFailure {
        database: String,
        host: String,
        port: u16,
    },

    #[error("Replication lag of {lag}s on {host}:{port}")]
    ReplicationLagDetected { host: String, port: u16, lag: f64 },

    #[error("Primary is unavailable for maintenance, writes are rejected")]
    PrimaryUnavailable,

    #[error("Execution error ({code}): {message}")]
    Execution { code: u32, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Lock error: {0}")]
    LockError(String),

    #[error("I/O error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, RouterError>;

impl<T> From<std::sync::PoisonError<T>> for RouterError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl From<std::io::Error> for RouterError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for RouterError {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(err.to_string())
    }
}

/// Failure reported by the database driver for connect, select, ping or execute.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("driver error {code:?}: {message}")]
pub struct DriverError {
    pub code: Option<u32>,
    pub message: String,
}

impl DriverError {
    pub fn new(code: Option<u32>, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn server_gone(message: impl Into<String>) -> Self {
        Self::new(Some(SERVER_GONE_ERROR), message)
    }

    pub fn is_server_gone(&self) -> bool {
        self.code == Some(SERVER_GONE_ERROR)
    }
}
