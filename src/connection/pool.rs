use super::{DbHandle, RoutedConnection, SharedHandle, config::RouterConfig};
use crate::core::{ConnectionKey, SERVER_GONE_ERROR};
use lru::LruCache;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Connection pool
///
/// Holds at most one live connection per `(dataset, operation)` key and
/// evicts the least-recently-used key once more than `max_connections` are
/// open. The live map and the LRU order sit behind a single lock so they are
/// always observed together; driver calls (ping, select, close) run outside it.
pub struct ConnectionPool {
    max_connections: usize,
    persistent: bool,
    check_heartbeats: bool,
    recheck_timeout: Duration,
    state: Mutex<PoolState>,
}

struct PoolState {
    live: HashMap<ConnectionKey, PooledConnection>,
    lru: LruCache<ConnectionKey, ()>,
    evictions: u64,
    ping_failures: u64,
    select_failures: u64,
    opening: HashMap<ConnectionKey, Arc<Mutex<()>>>,
}

/// A connection held by the pool
#[derive(Clone)]
pub struct PooledConnection {
    pub key: ConnectionKey,
    pub host: String,
    pub port: u16,
    pub database: String,
    handle: SharedHandle,
    pub created_at: Instant,
    pub last_used: Option<Instant>,
    pub queries: u64,
    pub last_errno: Option<u32>,
}

impl PooledConnection {
    fn new(key: ConnectionKey, host: &str, port: u16, database: &str, handle: SharedHandle) -> Self {
        let now = Instant::now();
        Self {
            key,
            host: host.to_string(),
            port,
            database: database.to_string(),
            handle,
            created_at: now,
            last_used: Some(now),
            queries: 0,
            last_errno: None,
        }
    }

    fn is_idle_too_long(&self, recheck_timeout: Duration) -> bool {
        match self.last_used {
            Some(last_used) => last_used.elapsed() > recheck_timeout,
            None => true,
        }
    }

    fn routed(&self, reused: bool) -> RoutedConnection {
        RoutedConnection {
            key: self.key.clone(),
            host: self.host.clone(),
            port: self.port,
            database: self.database.clone(),
            reused,
            handle: Arc::clone(&self.handle),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum EvictReason {
    PingFailed,
    SelectFailed,
}

impl ConnectionPool {
    pub fn new(config: &RouterConfig) -> Self {
        Self {
            max_connections: config.max_connections,
            persistent: config.persistent,
            check_heartbeats: config.check_dbh_heartbeats,
            recheck_timeout: config.recheck_timeout,
            state: Mutex::new(PoolState {
                live: HashMap::new(),
                lru: LruCache::unbounded(),
                evictions: 0,
                ping_failures: 0,
                select_failures: 0,
                opening: HashMap::new(),
            }),
        }
    }

    /// Serializes routing for `key`.
    ///
    /// Held from the reuse check until the new connection is registered, so
    /// a concurrent route for the same key waits and then reuses it instead
    /// of opening (and displacing) a second one.
    pub async fn lock_key(&self, key: &ConnectionKey) -> OwnedMutexGuard<()> {
        let gate = {
            let mut state = self.state.lock().await;
            Arc::clone(state.opening.entry(key.clone()).or_default())
        };
        gate.lock_owned().await
    }

    /// Returns the live connection for `key` if it is still usable.
    ///
    /// When `database` names a schema other than the one selected on the
    /// connection it is re-selected first. Idle connections, and ones whose
    /// last statement failed with "server gone away", are pinged. A failed
    /// select or ping evicts the connection and yields `None` so the caller
    /// opens a new one.
    pub async fn acquire(&self, key: &ConnectionKey, database: Option<&str>) -> Option<RoutedConnection> {
        let (handle, reselect, ping) = {
            let mut state = self.state.lock().await;
            let entry = state.live.get_mut(key)?;
            let reselect = database
                .filter(|name| !name.is_empty() && *name != entry.database)
                .map(str::to_string);
            let ping = self.should_ping(entry);
            (Arc::clone(&entry.handle), reselect, ping)
        };

        if let Some(name) = &reselect {
            let selected = handle.lock().await.select_database(name).await;
            if let Err(err) = selected {
                tracing::warn!(key = %key, database = %name, errno = ?err.code, error = %err.message, "disconnect (select failed)");
                self.evict_handle(key, &handle, EvictReason::SelectFailed).await;
                return None;
            }
        }

        if ping {
            let pinged = handle.lock().await.ping().await;
            if let Err(err) = pinged {
                tracing::warn!(key = %key, errno = ?err.code, error = %err.message, "disconnect (ping failed)");
                self.evict_handle(key, &handle, EvictReason::PingFailed).await;
                return None;
            }
        }

        let mut state = self.state.lock().await;
        let entry = state.live.get_mut(key)?;
        if !Arc::ptr_eq(&entry.handle, &handle) {
            return None;
        }
        if let Some(name) = reselect {
            entry.database = name;
        }
        entry.queries += 1;
        let routed = entry.routed(true);
        state.lru.promote(key);

        tracing::debug!(key = %key, host = %routed.host, port = routed.port, "reusing connection");
        Some(routed)
    }

    /// Heartbeat policy. Clears a recorded "server gone away" error since the
    /// ping that follows settles it.
    fn should_ping(&self, entry: &mut PooledConnection) -> bool {
        if !self.check_heartbeats {
            return false;
        }
        if entry.last_errno == Some(SERVER_GONE_ERROR) {
            entry.last_errno = None;
            return true;
        }
        entry.is_idle_too_long(self.recheck_timeout)
    }

    /// Stores a freshly opened connection under `key` and returns it.
    ///
    /// Any connection previously held under the key is closed. Outside
    /// persistent mode the least-recently-used keys are evicted until at most
    /// `max_connections` remain; the new key is never the one evicted.
    pub async fn register(
        &self,
        key: ConnectionKey,
        host: &str,
        port: u16,
        database: &str,
        handle: Box<dyn DbHandle>,
    ) -> RoutedConnection {
        let handle: SharedHandle = Arc::new(Mutex::new(handle));
        let pooled = PooledConnection::new(key.clone(), host, port, database, handle);
        let routed = pooled.routed(false);

        let mut closing = Vec::new();
        {
            let mut state = self.state.lock().await;
            if let Some(previous) = state.live.insert(key.clone(), pooled) {
                closing.push(previous.handle);
            }
            state.lru.put(key.clone(), ());

            if !self.persistent {
                while state.lru.len() > self.max_connections {
                    let Some((oldest, ())) = state.lru.pop_lru() else {
                        break;
                    };
                    if oldest == key {
                        state.lru.put(oldest, ());
                        break;
                    }
                    if let Some(evicted) = state.live.remove(&oldest) {
                        tracing::info!(key = %oldest, host = %evicted.host, port = evicted.port, "evicting least recently used connection");
                        closing.push(evicted.handle);
                    }
                    state.evictions += 1;
                }
            }
        }

        close_all(closing).await;
        routed
    }

    /// Closes and forgets the connection under `key`. Idempotent.
    pub async fn evict(&self, key: &ConnectionKey) -> bool {
        let removed = {
            let mut state = self.state.lock().await;
            state.lru.pop(key);
            let removed = state.live.remove(key);
            if removed.is_some() {
                state.evictions += 1;
            }
            removed
        };

        match removed {
            Some(entry) => {
                tracing::debug!(key = %key, host = %entry.host, "disconnect");
                close_all(vec![entry.handle]).await;
                true
            }
            None => false,
        }
    }

    /// Evicts `key` only while it still maps to `handle`; a concurrent
    /// caller may already have replaced it.
    async fn evict_handle(&self, key: &ConnectionKey, handle: &SharedHandle, reason: EvictReason) {
        let removed = {
            let mut state = self.state.lock().await;
            match reason {
                EvictReason::PingFailed => state.ping_failures += 1,
                EvictReason::SelectFailed => state.select_failures += 1,
            }
            let same = state
                .live
                .get(key)
                .is_some_and(|entry| Arc::ptr_eq(&entry.handle, handle));
            if same {
                state.lru.pop(key);
                state.evictions += 1;
                state.live.remove(key)
            } else {
                None
            }
        };

        if let Some(entry) = removed {
            close_all(vec![entry.handle]).await;
        }
    }

    /// Heartbeat bookkeeping after a statement ran on `key`'s connection.
    pub async fn record_query(&self, key: &ConnectionKey, errno: Option<u32>) {
        let mut state = self.state.lock().await;
        if let Some(entry) = state.live.get_mut(key) {
            entry.last_used = Some(Instant::now());
            entry.last_errno = errno;
        }
    }

    pub async fn contains(&self, key: &ConnectionKey) -> bool {
        self.state.lock().await.live.contains_key(key)
    }

    /// Snapshot of the pooled entry for `key`.
    pub async fn entry(&self, key: &ConnectionKey) -> Option<PooledConnection> {
        self.state.lock().await.live.get(key).cloned()
    }

    /// Keys from least to most recently used.
    pub async fn keys(&self) -> Vec<ConnectionKey> {
        let state = self.state.lock().await;
        state.lru.iter().rev().map(|(key, _)| key.clone()).collect()
    }

    /// Closes every pooled connection.
    pub async fn close_all(&self) {
        let handles: Vec<SharedHandle> = {
            let mut state = self.state.lock().await;
            state.lru.clear();
            state.live.drain().map(|(_, entry)| entry.handle).collect()
        };
        close_all(handles).await;
    }

    /// Get pool statistics
    pub async fn stats(&self) -> PoolStats {
        let state = self.state.lock().await;
        PoolStats {
            open_connections: state.live.len(),
            max_connections: self.max_connections,
            evictions: state.evictions,
            ping_failures: state.ping_failures,
            select_failures: state.select_failures,
        }
    }
}

async fn close_all(handles: Vec<SharedHandle>) {
    for handle in handles {
        let mut conn = handle.lock().await;
        if conn.is_open() {
            conn.close().await;
        }
    }
}

/// Connection pool statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub open_connections: usize,
    pub max_connections: usize,
    pub evictions: u64,
    pub ping_failures: u64,
    pub select_failures: u64,
}

impl std::fmt::Display for PoolStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Pool Stats: {}/{} open, {} evicted, {} ping failures, {} select failures",
            self.open_connections,
            self.max_connections,
            self.evictions,
            self.ping_failures,
            self.select_failures
        )
    }
}
