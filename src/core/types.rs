use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 3306;
pub const DEFAULT_DATASET: &str = "global";
pub const DEFAULT_SERVER_TIMEOUT: Duration = Duration::from_millis(200);

/// Whether a statement needs a writable primary or may be served by a replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Read,
    Write,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Read => "read",
            Operation::Write => "write",
        }
    }

    fn suffix(&self) -> &'static str {
        match self {
            Operation::Read => "r",
            Operation::Write => "w",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pool key: one live connection per `(dataset, operation)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    pub dataset: String,
    pub operation: Operation,
}

impl ConnectionKey {
    pub fn new(dataset: impl Into<String>, operation: Operation) -> Self {
        Self {
            dataset: dataset.into(),
            operation,
        }
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}__{}", self.dataset, self.operation.suffix())
    }
}

/// Connection parameters for one physical database server.
///
/// Descriptors are registered once into a [`Topology`](crate::topology::Topology)
/// and shared read-only afterwards. `read`/`write` are priority groups where a
/// lower number is tried first and `0` excludes the server from that operation.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerDescriptor {
    pub dataset: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    /// Database (schema) selected after connecting.
    pub name: String,
    pub read: u32,
    pub write: u32,
    pub timeout: Duration,
    /// Lag threshold in seconds overriding the dataset and global defaults.
    pub lag_threshold: Option<f64>,
}

impl ServerDescriptor {
    pub fn new(host: &str, user: &str, password: &str, name: &str) -> Self {
        let (host, port) = split_host_port(host);
        Self {
            dataset: DEFAULT_DATASET.to_string(),
            host,
            port: port.unwrap_or(DEFAULT_PORT),
            user: user.to_string(),
            password: password.to_string(),
            name: name.to_string(),
            read: 1,
            write: 1,
            timeout: DEFAULT_SERVER_TIMEOUT,
            lag_threshold: None,
        }
    }

    pub fn dataset(mut self, dataset: &str) -> Self {
        self.dataset = dataset.to_string();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn read(mut self, priority: u32) -> Self {
        self.read = priority;
        self
    }

    pub fn write(mut self, priority: u32) -> Self {
        self.write = priority;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn lag_threshold(mut self, seconds: f64) -> Self {
        self.lag_threshold = Some(seconds);
        self
    }

    /// `host:port`, also used as the TCP health and lag cache key.
    pub fn host_and_port(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns the parameters to use for one attempt after merging a routing override.
    ///
    /// Top-level override fields are applied first, then the `server` overlay.
    /// A host carrying `:port` is split again after merging.
    pub fn apply_override(&self, routing: &RoutingOverride) -> ServerDescriptor {
        let mut merged = self.clone();

        if let Some(host) = &routing.host {
            merged.set_host(host);
        }
        if let Some(port) = routing.port {
            merged.port = port;
        }
        if let Some(read) = routing.read {
            merged.read = read;
        }
        if let Some(write) = routing.write {
            merged.write = write;
        }

        if let Some(server) = &routing.server {
            if let Some(host) = &server.host {
                merged.set_host(host);
            }
            if let Some(port) = server.port {
                merged.port = port;
            }
            if let Some(user) = &server.user {
                merged.user = user.clone();
            }
            if let Some(password) = &server.password {
                merged.password = password.clone();
            }
            if let Some(name) = &server.name {
                merged.name = name.clone();
            }
            if let Some(read) = server.read {
                merged.read = read;
            }
            if let Some(write) = server.write {
                merged.write = write;
            }
            if let Some(timeout) = server.timeout {
                merged.timeout = timeout;
            }
            if let Some(lag_threshold) = server.lag_threshold {
                merged.lag_threshold = Some(lag_threshold);
            }
        }

        if merged.port == 0 {
            merged.port = DEFAULT_PORT;
        }
        merged
    }

    fn set_host(&mut self, host: &str) {
        let (host, port) = split_host_port(host);
        self.host = host;
        if let Some(port) = port {
            self.port = port;
        }
    }
}

/// Splits `"host:port"` into its parts. A leading colon or an unparsable
/// port leaves the input untouched.
pub fn split_host_port(host: &str) -> (String, Option<u16>) {
    match host.find(':') {
        Some(idx) if idx > 0 => {
            let (name, rest) = host.split_at(idx);
            match rest[1..].parse::<u16>() {
                Ok(port) => (name.to_string(), Some(port)),
                Err(_) => (host.to_string(), None),
            }
        }
        _ => (host.to_string(), None),
    }
}

/// Partial server parameters a dataset callback may overlay on every candidate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerOverride {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub name: Option<String>,
    pub read: Option<u32>,
    pub write: Option<u32>,
    #[serde(skip)]
    pub timeout: Option<Duration>,
    pub lag_threshold: Option<f64>,
}

/// Structured routing decision returned by a dataset callback.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoutingOverride {
    pub dataset: Option<String>,
    pub server: Option<ServerOverride>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub read: Option<u32>,
    pub write: Option<u32>,
}

impl RoutingOverride {
    pub fn dataset(dataset: impl Into<String>) -> Self {
        Self {
            dataset: Some(dataset.into()),
            ..Self::default()
        }
    }

    /// True when the override pins candidates to an explicit host, which
    /// disables replica lag checks.
    pub fn pins_host(&self) -> bool {
        self.host.is_some()
            || self
                .server
                .as_ref()
                .is_some_and(|server| server.host.is_some())
    }

    /// Database name requested by the override, if any.
    pub fn database_name(&self) -> Option<&str> {
        self.server.as_ref().and_then(|server| server.name.as_deref())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LagStatus {
    Ok,
    Behind,
    Unknown,
}

impl fmt::Display for LagStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LagStatus::Ok => "ok",
            LagStatus::Behind => "behind",
            LagStatus::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

/// Cached TCP verdict for a `host:port`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reachability {
    Up,
    Down,
}
