//! TCP reachability probing with a shared verdict cache.

use crate::core::Reachability;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;

pub const DEFAULT_TCP_CACHE_TTL: Duration = Duration::from_secs(10);

/// Storage for up/down verdicts keyed by `host:port`.
///
/// Implementations may be backed by an external key-value store shared
/// between workers; concurrent duplicate probes are fine and the last
/// writer wins.
#[async_trait]
pub trait HealthCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<Reachability>;
    async fn set(&self, key: &str, value: Reachability, ttl: Duration);
    async fn delete(&self, key: &str);
}

/// In-process [`HealthCache`] with per-entry expiry.
#[derive(Debug, Default)]
pub struct LocalHealthCache {
    entries: Mutex<HashMap<String, (Reachability, Instant)>>,
}

impl LocalHealthCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HealthCache for LocalHealthCache {
    async fn get(&self, key: &str) -> Option<Reachability> {
        let Ok(mut entries) = self.entries.lock() else {
            return None;
        };
        match entries.get(key) {
            Some((value, expires_at)) if Instant::now() < *expires_at => Some(*value),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    async fn set(&self, key: &str, value: Reachability, ttl: Duration) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key.to_string(), (value, Instant::now() + ttl));
        }
    }

    async fn delete(&self, key: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(key);
        }
    }
}

/// Checks whether a TCP daemon answers within a timeout.
#[derive(Clone)]
pub struct TcpProber {
    cache: Arc<dyn HealthCache>,
    ttl: Duration,
}

impl TcpProber {
    pub fn new(cache: Arc<dyn HealthCache>, ttl: Duration) -> Self {
        Self { cache, ttl }
    }

    pub fn cache_key(host: &str, port: u16) -> String {
        format!("{}:{}", host, port)
    }

    pub fn cache(&self) -> &Arc<dyn HealthCache> {
        &self.cache
    }

    /// Returns true when `host:port` accepts a TCP connection within `timeout`.
    ///
    /// A cached, unexpired verdict is returned without touching the network.
    pub async fn probe(&self, host: &str, port: u16, timeout: Duration) -> bool {
        let key = Self::cache_key(host, port);

        match self.cache.get(&key).await {
            Some(Reachability::Up) => return true,
            Some(Reachability::Down) => return false,
            None => {}
        }

        match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(stream)) => {
                drop(stream);
                self.cache.set(&key, Reachability::Up, self.ttl).await;
                true
            }
            Ok(Err(err)) => {
                tracing::debug!(host, port, error = %err, "tcp probe failed");
                self.cache.set(&key, Reachability::Down, self.ttl).await;
                false
            }
            Err(_) => {
                tracing::debug!(host, port, timeout_ms = timeout.as_millis() as u64, "tcp probe timed out");
                self.cache.set(&key, Reachability::Down, self.ttl).await;
                false
            }
        }
    }
}

impl Default for TcpProber {
    fn default() -> Self {
        Self::new(Arc::new(LocalHealthCache::new()), DEFAULT_TCP_CACHE_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_probe_live_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let prober = TcpProber::default();

        assert!(prober.probe("127.0.0.1", port, Duration::from_secs(1)).await);
        assert_eq!(
            prober.cache().get(&TcpProber::cache_key("127.0.0.1", port)).await,
            Some(Reachability::Up)
        );
    }

    #[tokio::test]
    async fn test_probe_closed_port_is_cached_down() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let prober = TcpProber::default();
        assert!(!prober.probe("127.0.0.1", port, Duration::from_secs(1)).await);
        assert_eq!(
            prober.cache().get(&TcpProber::cache_key("127.0.0.1", port)).await,
            Some(Reachability::Down)
        );
    }

    #[tokio::test]
    async fn test_cached_verdict_skips_network() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let cache = Arc::new(LocalHealthCache::new());
        cache
            .set(&TcpProber::cache_key("127.0.0.1", port), Reachability::Down, Duration::from_secs(10))
            .await;
        let prober = TcpProber::new(cache, Duration::from_secs(10));

        assert!(!prober.probe("127.0.0.1", port, Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_local_cache_expiry() {
        let cache = LocalHealthCache::new();
        cache.set("db:3306", Reachability::Up, Duration::from_millis(5)).await;
        assert_eq!(cache.get("db:3306").await, Some(Reachability::Up));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.get("db:3306").await, None);

        cache.set("db:3306", Reachability::Down, Duration::from_secs(10)).await;
        cache.delete("db:3306").await;
        assert_eq!(cache.get("db:3306").await, None);
    }
}
