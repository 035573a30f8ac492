//! In-memory database driver for router tests.
//!
//! Every host answers statements with a single row holding its own name, so
//! tests can tell where a statement ran. Per-host behaviour is scripted with
//! [`HostScript`].

#![allow(dead_code)]

use async_trait::async_trait;
use shardwise::{
    Callbacks, Connector, DbHandle, DriverError, LagReading, QueryOutcome, ServerDescriptor,
    Topology,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct HostScript {
    /// Refuse connections (errno 2003).
    pub refuse: bool,
    pub select_fails: bool,
    pub ping_fails: bool,
    /// Fail every statement with this errno.
    pub statement_errno: Option<u32>,
    /// Sleep this long inside `connect`, letting other routes run.
    pub connect_delay: Option<Duration>,
}

#[derive(Debug, Default)]
struct DriverState {
    scripts: HashMap<String, HostScript>,
    attempts: HashMap<String, usize>,
    connects: HashMap<String, usize>,
    pings: HashMap<String, usize>,
    closes: HashMap<String, usize>,
    statements: Vec<(String, String)>,
}

/// Shared handle to the mock cluster; clones observe the same state.
#[derive(Clone, Default)]
pub struct MockDriver {
    state: Arc<Mutex<DriverState>>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, host: &str, script: HostScript) {
        self.state.lock().unwrap().scripts.insert(host.to_string(), script);
    }

    pub fn update(&self, host: &str, change: impl FnOnce(&mut HostScript)) {
        let mut state = self.state.lock().unwrap();
        change(state.scripts.entry(host.to_string()).or_default());
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(self.clone())
    }

    /// Connection attempts, successful or not.
    pub fn attempts(&self, host: &str) -> usize {
        self.state.lock().unwrap().attempts.get(host).copied().unwrap_or(0)
    }

    pub fn total_attempts(&self) -> usize {
        self.state.lock().unwrap().attempts.values().sum()
    }

    /// Successful physical connections.
    pub fn connects(&self, host: &str) -> usize {
        self.state.lock().unwrap().connects.get(host).copied().unwrap_or(0)
    }

    pub fn total_connects(&self) -> usize {
        self.state.lock().unwrap().connects.values().sum()
    }

    pub fn pings(&self, host: &str) -> usize {
        self.state.lock().unwrap().pings.get(host).copied().unwrap_or(0)
    }

    pub fn closes(&self, host: &str) -> usize {
        self.state.lock().unwrap().closes.get(host).copied().unwrap_or(0)
    }

    /// Statements run on `host`, in order.
    pub fn statements(&self, host: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .statements
            .iter()
            .filter(|(h, _)| h == host)
            .map(|(_, sql)| sql.clone())
            .collect()
    }

    fn script_for(&self, host: &str) -> HostScript {
        self.state
            .lock()
            .unwrap()
            .scripts
            .get(host)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl Connector for MockDriver {
    async fn connect(
        &self,
        server: &ServerDescriptor,
        _persistent: bool,
    ) -> Result<Box<dyn DbHandle>, DriverError> {
        let script = self.script_for(&server.host);
        if let Some(delay) = script.connect_delay {
            tokio::time::sleep(delay).await;
        }
        {
            let mut state = self.state.lock().unwrap();
            *state.attempts.entry(server.host.clone()).or_default() += 1;
            if script.refuse {
                return Err(DriverError::new(
                    Some(2003),
                    format!("Can't connect to MySQL server on '{}'", server.host),
                ));
            }
            *state.connects.entry(server.host.clone()).or_default() += 1;
        }

        Ok(Box::new(MockHandle {
            host: server.host.clone(),
            database: None,
            open: true,
            driver: self.clone(),
        }))
    }
}

pub struct MockHandle {
    host: String,
    database: Option<String>,
    open: bool,
    driver: MockDriver,
}

#[async_trait]
impl DbHandle for MockHandle {
    async fn select_database(&mut self, name: &str) -> Result<(), DriverError> {
        if self.driver.script_for(&self.host).select_fails {
            return Err(DriverError::new(Some(1049), format!("Unknown database '{}'", name)));
        }
        self.database = Some(name.to_string());
        Ok(())
    }

    async fn ping(&mut self) -> Result<(), DriverError> {
        let script = self.driver.script_for(&self.host);
        *self
            .driver
            .state
            .lock()
            .unwrap()
            .pings
            .entry(self.host.clone())
            .or_default() += 1;
        if script.ping_fails {
            return Err(DriverError::server_gone("MySQL server has gone away"));
        }
        Ok(())
    }

    async fn execute(&mut self, sql: &str) -> Result<QueryOutcome, DriverError> {
        if !self.open {
            return Err(DriverError::server_gone("closed handle"));
        }
        let script = self.driver.script_for(&self.host);
        self.driver
            .state
            .lock()
            .unwrap()
            .statements
            .push((self.host.clone(), sql.to_string()));

        if let Some(errno) = script.statement_errno {
            return Err(DriverError::new(Some(errno), "statement failed"));
        }
        Ok(QueryOutcome {
            affected_rows: 1,
            insert_id: None,
            rows: vec![vec![Some(self.host.clone()), self.database.clone()]],
        })
    }

    async fn close(&mut self) {
        self.open = false;
        *self
            .driver
            .state
            .lock()
            .unwrap()
            .closes
            .entry(self.host.clone())
            .or_default() += 1;
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

pub fn server(host: &str, read: u32, write: u32) -> ServerDescriptor {
    ServerDescriptor::new(host, "app", "secret", "wp").read(read).write(write)
}

/// Dataset `global`: primary `w` (write only), replicas `r1` (group 1) and
/// `r2` (group 2).
pub fn primary_and_two_replicas() -> Topology {
    let mut topology = Topology::new();
    topology.add_server(server("w", 0, 1)).unwrap();
    topology.add_server(server("r1", 1, 0)).unwrap();
    topology.add_server(server("r2", 2, 0)).unwrap();
    topology
}

/// Lag callbacks reporting fixed seconds per `host:port`; unknown hosts are
/// left to later handlers.
pub fn lag_readings(readings: &[(&str, f64)]) -> Callbacks {
    let readings: HashMap<String, f64> = readings
        .iter()
        .map(|(key, lag)| (key.to_string(), *lag))
        .collect();
    let mut callbacks = Callbacks::new();
    callbacks.on_lag(move |ctx| readings.get(&ctx.lag_cache_key).map(|lag| LagReading::Seconds(*lag)));
    callbacks
}

/// Host the statement ran on, from a mock outcome.
pub fn ran_on(outcome: &QueryOutcome) -> &str {
    outcome.rows[0][0].as_deref().unwrap_or_default()
}
