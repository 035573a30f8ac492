use crate::core::LagStatus;
use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;

/// One connection attempt, successful or not.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionRecord {
    /// Pool key, e.g. `global__r`.
    pub key: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub database: String,
    /// TCP probe verdict; `None` when no probe ran.
    pub tcp: Option<bool>,
    pub lag: Option<LagStatus>,
    pub lag_seconds: Option<f64>,
    pub errno: Option<u32>,
    pub error: Option<String>,
    pub elapsed: Duration,
    pub success: bool,
    pub at: DateTime<Utc>,
}

impl ConnectionRecord {
    pub(crate) fn new(key: &str, host: &str, port: u16, user: &str, database: &str) -> Self {
        Self {
            key: key.to_string(),
            host: host.to_string(),
            port,
            user: user.to_string(),
            database: database.to_string(),
            tcp: None,
            lag: None,
            lag_seconds: None,
            errno: None,
            error: None,
            elapsed: Duration::ZERO,
            success: false,
            at: Utc::now(),
        }
    }

    pub fn host_and_port(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for ConnectionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {}@{}:{}/{} ",
            self.at.format("%Y-%m-%d %H:%M:%S%.3f"),
            self.key,
            self.user,
            self.host,
            self.port,
            self.database
        )?;
        if self.success {
            write!(f, "connected in {:.1}ms", self.elapsed.as_secs_f64() * 1000.0)?;
        } else {
            write!(f, "failed")?;
            if let Some(errno) = self.errno {
                write!(f, " errno={}", errno)?;
            }
            if let Some(error) = &self.error {
                write!(f, " ({})", error)?;
            }
        }
        if let Some(tcp) = self.tcp {
            write!(f, " tcp={}", if tcp { "up" } else { "down" })?;
        }
        if let Some(lag) = self.lag {
            write!(f, " lag={}", lag)?;
        }
        Ok(())
    }
}
