use super::Topology;
use crate::core::{
    DEFAULT_DATASET, DEFAULT_PORT, DEFAULT_SERVER_TIMEOUT, Result, RouterError,
    ServerDescriptor, split_host_port,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// On-disk topology description.
///
/// ```json
/// {
///   "servers": [
///     { "host": "db-primary:3306", "user": "app", "password": "s3cret", "name": "wp", "read": 0 },
///     { "host": "db-replica", "user": "app", "password": "s3cret", "name": "wp", "write": 0 }
///   ],
///   "tables": { "wp_posts": "blog" },
///   "datasets": { "global": { "lag_threshold": 2.0 } }
/// }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TopologySpec {
    #[serde(default)]
    pub servers: Vec<ServerSpec>,
    #[serde(default)]
    pub tables: HashMap<String, String>,
    #[serde(default)]
    pub datasets: HashMap<String, DatasetSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSpec {
    #[serde(default = "default_dataset")]
    pub dataset: String,
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_priority")]
    pub read: u32,
    #[serde(default = "default_priority")]
    pub write: u32,
    /// Connect timeout in seconds.
    #[serde(default)]
    pub timeout: Option<f64>,
    #[serde(default)]
    pub lag_threshold: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatasetSpec {
    #[serde(default)]
    pub lag_threshold: Option<f64>,
}

fn default_dataset() -> String {
    DEFAULT_DATASET.to_string()
}

fn default_priority() -> u32 {
    1
}

impl ServerSpec {
    /// Non-positive or non-finite timeouts fall back to the default; ones too
    /// large for a `Duration` are rejected.
    pub fn into_descriptor(self) -> Result<ServerDescriptor> {
        let (host, embedded_port) = split_host_port(&self.host);
        let timeout = match self.timeout.filter(|secs| secs.is_finite() && *secs > 0.0) {
            Some(secs) => Duration::try_from_secs_f64(secs).map_err(|e| {
                RouterError::Config(format!("invalid timeout {} for {}: {}", secs, self.host, e))
            })?,
            None => DEFAULT_SERVER_TIMEOUT,
        };

        Ok(ServerDescriptor {
            dataset: self.dataset,
            host,
            port: embedded_port.or(self.port).unwrap_or(DEFAULT_PORT),
            user: self.user,
            password: self.password,
            name: self.name,
            read: self.read,
            write: self.write,
            timeout,
            lag_threshold: self.lag_threshold,
        })
    }
}

impl TopologySpec {
    pub fn into_topology(self) -> Result<Topology> {
        let mut topology = Topology::new();
        for server in self.servers {
            topology.add_server(server.into_descriptor()?)?;
        }
        for (table, dataset) in self.tables {
            topology.add_table(&dataset, &table);
        }
        for (name, dataset) in self.datasets {
            topology.set_dataset_lag_threshold(&name, dataset.lag_threshold);
        }
        Ok(topology)
    }
}

impl Topology {
    /// Builds a topology from its JSON description.
    pub fn from_json(json: &str) -> Result<Self> {
        let spec: TopologySpec = serde_json::from_str(json)?;
        spec.into_topology()
    }
}
