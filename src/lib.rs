// ============================================================================
// Shardwise Library
// ============================================================================

pub mod core;
pub mod classifier;
pub mod callbacks;
pub mod topology;
pub mod health;
pub mod lag;
pub mod resolver;
pub mod connection;
pub mod router;
mod client;

// Re-export main types for convenience
pub use crate::core::{
    ConnectionKey, DriverError, LagStatus, Operation, Result, RouterError, RoutingOverride,
    ServerDescriptor, ServerOverride,
};
pub use classifier::{classify, extract_table, is_write_query};
pub use callbacks::{
    Callbacks, CallbackChain, ConnectionErrorContext, DatasetDecision, DatasetFound,
    DatasetQuery, Handler, LagContext, LagReading,
};
pub use topology::{Topology, TopologySpec};
pub use health::{HealthCache, LocalHealthCache, TcpProber};

// Re-export connection API
pub use connection::{
    CharsetSetup, Connector, DbHandle, NoopSessionSetup, QueryOutcome, RoutedConnection,
    SessionSetup,
    config::RouterConfig,
    pool::{ConnectionPool, PoolStats},
};
pub use router::{ConnectionRecord, RoutePlan, Router, RouterBuilder, Session};

// ============================================================================
// High-level Client API
// ============================================================================

pub use client::Client;
