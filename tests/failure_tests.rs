/// Failure handling tests
///
/// Unreachable replicas, maintenance mode, database selection failures and
/// statement errors.
/// Run with: cargo test --test failure_tests
mod common;

use common::{HostScript, MockDriver, lag_readings, primary_and_two_replicas, ran_on, server};
use shardwise::core::Reachability;
use shardwise::{
    Callbacks, Client, ConnectionErrorContext, DatasetDecision, HealthCache, LocalHealthCache,
    Operation, Router, RouterConfig, RouterError, Session, Topology,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

async fn replicas_down() -> Arc<LocalHealthCache> {
    let cache = Arc::new(LocalHealthCache::new());
    for key in ["r1:3306", "r2:3306"] {
        cache.set(key, Reachability::Down, Duration::from_secs(10)).await;
    }
    cache
}

fn refuse_replicas(driver: &MockDriver) {
    for host in ["r1", "r2"] {
        driver.script(host, HostScript { refuse: true, ..HostScript::default() });
    }
}

fn count_notifications(callbacks: &mut Callbacks) -> (Arc<AtomicUsize>, Arc<Mutex<Vec<ConnectionErrorContext>>>) {
    let count = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let (counter, sink) = (Arc::clone(&count), Arc::clone(&seen));
    callbacks.on_connection_error(move |ctx| {
        counter.fetch_add(1, Ordering::SeqCst);
        sink.lock().unwrap().push(ctx.clone());
        Some(())
    });
    (count, seen)
}

#[tokio::test]
async fn test_all_replicas_unreachable() {
    let driver = MockDriver::new();
    refuse_replicas(&driver);
    let mut callbacks = Callbacks::new();
    let (notified, contexts) = count_notifications(&mut callbacks);

    let router = Router::builder(primary_and_two_replicas(), driver.connector())
        .callbacks(callbacks)
        .health_cache(replicas_down().await)
        .build()
        .unwrap();

    let err = router
        .route(&mut Session::new(), "SELECT * FROM wp_posts")
        .await
        .unwrap_err();

    assert!(matches!(
        &err,
        RouterError::AllCandidatesFailed { host, operation: Operation::Read, table, dataset, .. }
            if host == "r2" && table == "wp_posts" && dataset == "global"
    ));
    assert_eq!(notified.load(Ordering::SeqCst), 1);
    assert_eq!(contexts.lock().unwrap()[0].key, "global__r");

    // Only the final try ignores the TCP verdict.
    assert_eq!(driver.attempts("r1"), 0);
    assert_eq!(driver.attempts("r2"), 1);
}

#[tokio::test]
async fn test_lagged_and_unreachable_replicas_retry_once() {
    let driver = MockDriver::new();
    refuse_replicas(&driver);
    let mut callbacks = lag_readings(&[("r1:3306", 30.0), ("r2:3306", 30.0)]);
    let (notified, _) = count_notifications(&mut callbacks);

    let router = Router::builder(primary_and_two_replicas(), driver.connector())
        .config(RouterConfig::new().default_lag_threshold(1.0))
        .callbacks(callbacks)
        .health_cache(replicas_down().await)
        .build()
        .unwrap();

    let mut session = Session::new();
    let err = router.route(&mut session, "SELECT * FROM wp_posts").await.unwrap_err();

    assert!(matches!(err, RouterError::AllCandidatesFailed { .. }));
    assert_eq!(notified.load(Ordering::SeqCst), 1);
    assert_eq!(driver.total_attempts(), 1);

    // First pass: two lag skips. Retry: three TCP skips and one refused connect.
    let log = session.connections();
    assert_eq!(log.len(), 6);
    assert!(log[..2].iter().all(|record| record.lag == Some(shardwise::LagStatus::Behind)));
    assert!(log[2..5].iter().all(|record| record.tcp == Some(false)));
    assert_eq!(log[5].errno, Some(2003));
}

#[tokio::test]
async fn test_tcp_up_replica_is_connected() {
    let driver = MockDriver::new();
    let cache = Arc::new(LocalHealthCache::new());
    cache.set("r1:3306", Reachability::Down, Duration::from_secs(10)).await;
    cache.set("r2:3306", Reachability::Up, Duration::from_secs(10)).await;

    let router = Router::builder(primary_and_two_replicas(), driver.connector())
        .health_cache(cache)
        .build()
        .unwrap();

    let conn = router
        .route(&mut Session::new(), "SELECT * FROM wp_posts")
        .await
        .unwrap();
    assert_eq!(conn.host, "r2");
    assert_eq!(driver.attempts("r1"), 0);
}

#[tokio::test]
async fn test_maintenance_mode_rejects_writes() {
    let driver = MockDriver::new();
    let router = Arc::new(
        Router::builder(primary_and_two_replicas(), driver.connector())
            .config(
                RouterConfig::new()
                    .check_tcp_responsiveness(false)
                    .primary_unavailable(true),
            )
            .build()
            .unwrap(),
    );
    let mut client = Client::new(router);

    assert_ok!(client.query("SELECT * FROM wp_posts").await);
    let err = assert_err!(client.query("UPDATE wp_posts SET a = 1").await);
    assert!(matches!(err, RouterError::PrimaryUnavailable));
    assert_eq!(driver.attempts("w"), 0);
}

#[tokio::test]
async fn test_select_failure_on_last_candidate() {
    let driver = MockDriver::new();
    driver.script("w", HostScript { select_fails: true, ..HostScript::default() });
    let router = Router::builder(primary_and_two_replicas(), driver.connector())
        .build()
        .unwrap();

    let err = router
        .route(&mut Session::new(), "INSERT INTO wp_posts VALUES (1)")
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        RouterError::DatabaseSelectFailure { database, host, .. } if database == "wp" && host == "w"
    ));
    assert_eq!(driver.connects("w"), 3);
    assert_eq!(driver.closes("w"), 3);
    assert!(!router.pool().contains(&shardwise::ConnectionKey::new("global", Operation::Write)).await);
}

#[tokio::test]
async fn test_select_failure_moves_to_next_candidate() {
    let driver = MockDriver::new();
    driver.script("r1", HostScript { select_fails: true, ..HostScript::default() });
    let router = Router::builder(primary_and_two_replicas(), driver.connector())
        .config(RouterConfig::new().check_tcp_responsiveness(false))
        .build()
        .unwrap();

    let conn = router
        .route(&mut Session::new(), "SELECT * FROM wp_posts")
        .await
        .unwrap();
    assert_eq!(conn.host, "r2");
    assert_eq!(driver.closes("r1"), 1);
}

#[tokio::test]
async fn test_execution_errors_are_not_retried() {
    let driver = MockDriver::new();
    driver.script("w", HostScript { statement_errno: Some(1064), ..HostScript::default() });
    let router = Arc::new(
        Router::builder(primary_and_two_replicas(), driver.connector())
            .build()
            .unwrap(),
    );
    let mut client = Client::new(router);

    let err = client.query("DELETE FROM wp_posts WHERE").await.unwrap_err();
    assert!(matches!(err, RouterError::Execution { code: 1064, .. }));
    assert_eq!(driver.statements("w").len(), 1);
    assert_eq!(driver.connects("w"), 1);
}

#[tokio::test]
async fn test_no_servers_for_operation() {
    let driver = MockDriver::new();
    let mut topology = Topology::new();
    topology.add_server(server("r1", 1, 0)).unwrap();
    let router = Router::builder(topology, driver.connector()).build().unwrap();

    let err = router
        .route(&mut Session::new(), "UPDATE wp_posts SET a = 1")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RouterError::NoServersForOperation { operation: Operation::Write, .. }
    ));
}

#[tokio::test]
async fn test_unresolved_dataset() {
    let driver = MockDriver::new();
    let mut callbacks = Callbacks::new();
    callbacks.on_dataset(|_query| Some(DatasetDecision::from("  ")));
    let router = Router::builder(primary_and_two_replicas(), driver.connector())
        .callbacks(callbacks)
        .build()
        .unwrap();

    let err = router
        .route(&mut Session::new(), "SELECT * FROM wp_posts")
        .await
        .unwrap_err();
    assert!(matches!(err, RouterError::DatasetUnresolved { table } if table == "wp_posts"));
    assert_eq!(driver.total_attempts(), 0);
}

#[tokio::test]
async fn test_failed_connection_does_not_poison_later_routes() {
    let driver = MockDriver::new();
    driver.script("w", HostScript { refuse: true, ..HostScript::default() });
    let router = Arc::new(
        Router::builder(primary_and_two_replicas(), driver.connector())
            .config(RouterConfig::new().check_tcp_responsiveness(false))
            .build()
            .unwrap(),
    );
    let mut client = Client::new(Arc::clone(&router));

    assert_err!(client.query("INSERT INTO wp_posts VALUES (1)").await);

    driver.update("w", |script| script.refuse = false);
    let write = client.query("INSERT INTO wp_posts VALUES (1)").await.unwrap();
    assert_eq!(ran_on(&write), "w");
}
