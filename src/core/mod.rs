pub mod error;
pub mod types;

pub use error::{DriverError, Result, RouterError, SERVER_GONE_ERROR};
pub use types::{
    ConnectionKey, LagStatus, Operation, Reachability, RoutingOverride, ServerDescriptor,
    ServerOverride, split_host_port, DEFAULT_DATASET, DEFAULT_PORT, DEFAULT_SERVER_TIMEOUT,
};
