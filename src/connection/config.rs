use crate::core::{DEFAULT_DATASET, Result, RouterError};
use crate::health::DEFAULT_TCP_CACHE_TTL;
use serde::Deserialize;
use std::time::Duration;

/// Router tunables
///
/// Built with the builder methods or loaded from JSON; call
/// [`validate`](Self::validate) before use.
#[derive(Debug, Clone, PartialEq)]
pub struct RouterConfig {
    /// Maximum number of open connections kept in the pool
    pub max_connections: usize,

    /// Minimum number of connection attempts per route
    pub reconnect_retries: usize,

    /// Idle time after which a reused connection is pinged first
    pub recheck_timeout: Duration,

    /// Replica lag threshold in seconds; `None` disables lag checks
    pub default_lag_threshold: Option<f64>,

    /// Probe TCP reachability before connecting to replicas
    pub check_tcp_responsiveness: bool,

    /// Ping idle or failed connections before reusing them
    pub check_dbh_heartbeats: bool,

    /// Keep every connection open (disables LRU eviction)
    pub persistent: bool,

    /// How long TCP up/down verdicts are cached
    pub tcp_cache_ttl: Duration,

    /// Maintenance mode: reject writes without trying any server
    pub primary_unavailable: bool,

    /// Dataset used when nothing else resolves one
    pub default_dataset: String,
}

impl RouterConfig {
    pub fn new() -> Self {
        Self {
            max_connections: 10,
            reconnect_retries: 3,
            recheck_timeout: Duration::from_millis(100),
            default_lag_threshold: None,
            check_tcp_responsiveness: true,
            check_dbh_heartbeats: true,
            persistent: false,
            tcp_cache_ttl: DEFAULT_TCP_CACHE_TTL,
            primary_unavailable: false,
            default_dataset: DEFAULT_DATASET.to_string(),
        }
    }

    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    pub fn reconnect_retries(mut self, retries: usize) -> Self {
        self.reconnect_retries = retries;
        self
    }

    pub fn recheck_timeout(mut self, timeout: Duration) -> Self {
        self.recheck_timeout = timeout;
        self
    }

    pub fn default_lag_threshold(mut self, seconds: f64) -> Self {
        self.default_lag_threshold = Some(seconds);
        self
    }

    pub fn check_tcp_responsiveness(mut self, enabled: bool) -> Self {
        self.check_tcp_responsiveness = enabled;
        self
    }

    pub fn check_dbh_heartbeats(mut self, enabled: bool) -> Self {
        self.check_dbh_heartbeats = enabled;
        self
    }

    pub fn persistent(mut self, enabled: bool) -> Self {
        self.persistent = enabled;
        self
    }

    pub fn tcp_cache_ttl(mut self, ttl: Duration) -> Self {
        self.tcp_cache_ttl = ttl;
        self
    }

    pub fn primary_unavailable(mut self, enabled: bool) -> Self {
        self.primary_unavailable = enabled;
        self
    }

    pub fn default_dataset(mut self, dataset: &str) -> Self {
        self.default_dataset = dataset.to_string();
        self
    }

    /// Parse from JSON; durations are given in (fractional) seconds.
    ///
    /// ```ignore
    /// let config = RouterConfig::from_json(r#"{ "max_connections": 20, "recheck_timeout": 0.25 }"#)?;
    /// ```
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: RawConfig = serde_json::from_str(json)?;
        let defaults = Self::new();

        let config = Self {
            max_connections: raw.max_connections.unwrap_or(defaults.max_connections),
            reconnect_retries: raw.reconnect_retries.unwrap_or(defaults.reconnect_retries),
            recheck_timeout: seconds(raw.recheck_timeout)?.unwrap_or(defaults.recheck_timeout),
            default_lag_threshold: raw.default_lag_threshold,
            check_tcp_responsiveness: raw
                .check_tcp_responsiveness
                .unwrap_or(defaults.check_tcp_responsiveness),
            check_dbh_heartbeats: raw
                .check_dbh_heartbeats
                .unwrap_or(defaults.check_dbh_heartbeats),
            persistent: raw.persistent.unwrap_or(defaults.persistent),
            tcp_cache_ttl: seconds(raw.tcp_cache_ttl)?.unwrap_or(defaults.tcp_cache_ttl),
            primary_unavailable: raw
                .primary_unavailable
                .unwrap_or(defaults.primary_unavailable),
            default_dataset: raw.default_dataset.unwrap_or(defaults.default_dataset),
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(RouterError::Config("max_connections must be > 0".into()));
        }

        if self.reconnect_retries == 0 {
            return Err(RouterError::Config("reconnect_retries must be > 0".into()));
        }

        if self.default_dataset.trim().is_empty() {
            return Err(RouterError::Config("default_dataset cannot be empty".into()));
        }

        if let Some(threshold) = self.default_lag_threshold {
            if !threshold.is_finite() || threshold < 0.0 {
                return Err(RouterError::Config(
                    "default_lag_threshold must be a non-negative number".into(),
                ));
            }
        }

        Ok(())
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    max_connections: Option<usize>,
    reconnect_retries: Option<usize>,
    recheck_timeout: Option<f64>,
    default_lag_threshold: Option<f64>,
    check_tcp_responsiveness: Option<bool>,
    check_dbh_heartbeats: Option<bool>,
    persistent: Option<bool>,
    tcp_cache_ttl: Option<f64>,
    primary_unavailable: Option<bool>,
    default_dataset: Option<String>,
}

fn seconds(value: Option<f64>) -> Result<Option<Duration>> {
    value
        .map(|secs| {
            Duration::try_from_secs_f64(secs)
                .map_err(|e| RouterError::Config(format!("invalid duration {}: {}", secs, e)))
        })
        .transpose()
}
