use super::Router;
use super::diagnostics::ConnectionRecord;
use super::session::Session;
use crate::callbacks::LagContext;
use crate::connection::RoutedConnection;
use crate::core::{ConnectionKey, DriverError, LagStatus, Operation, RouterError, RoutingOverride};
use crate::lag::effective_threshold;
use crate::topology::CandidatePlan;
use std::collections::HashSet;
use std::time::Instant;

/// What one route is trying to reach.
pub(super) struct RouteTarget<'a> {
    pub key: &'a ConnectionKey,
    pub table: &'a str,
    pub routing: Option<&'a RoutingOverride>,
    pub dataset_lag_threshold: Option<f64>,
}

pub(super) enum PassOutcome {
    Connected(RoutedConnection),
    Exhausted(PassFailure),
}

/// Why a pass over the candidate list ended without a connection.
pub(super) struct PassFailure {
    /// Distinct replicas skipped for lag.
    pub lagged: usize,
    /// Last candidate visited.
    pub host: String,
    pub port: u16,
    /// Set when the final try connected but could not select its database.
    pub select_failed: Option<String>,
}

impl Router {
    /// Walks the candidate list once, strictly in order.
    ///
    /// Lagged replicas are skipped unless `ignore_lag` is set or the replica
    /// is the last unlagged unique server of the best group. Replicas that
    /// fail the TCP probe are skipped unless this is the final try.
    pub(super) async fn attempt_pass(
        &self,
        session: &mut Session,
        target: &RouteTarget<'_>,
        plan: &CandidatePlan,
        ignore_lag: bool,
    ) -> PassOutcome {
        let operation = target.key.operation;
        let dataset = target.key.dataset.as_str();
        let key_label = target.key.to_string();
        let pins_host = target.routing.is_some_and(RoutingOverride::pins_host);

        let mut lagged: HashSet<String> = HashSet::new();
        let mut failure = PassFailure {
            lagged: 0,
            host: String::new(),
            port: 0,
            select_failed: None,
        };

        for (index, candidate) in plan.candidates.iter().enumerate() {
            if lagged.len() == plan.unique_servers {
                tracing::debug!(key = %key_label, lagged = lagged.len(), "every replica is lagged");
                break;
            }

            let last_try = index + 1 == plan.len();
            let server = match target.routing {
                Some(routing) => candidate.server.apply_override(routing),
                None => (*candidate.server).clone(),
            };
            let host_port = server.host_and_port();
            failure.host = server.host.clone();
            failure.port = server.port;

            let mut record =
                ConnectionRecord::new(&key_label, &server.host, server.port, &server.user, &server.name);

            if operation == Operation::Read && server.write == 0 && !ignore_lag && !pins_host {
                let threshold = effective_threshold(
                    server.lag_threshold,
                    target.dataset_lag_threshold,
                    self.config.default_lag_threshold,
                );
                if threshold.is_some() {
                    let context = LagContext {
                        lag_cache_key: host_port.clone(),
                        dataset: dataset.to_string(),
                        table: target.table.to_string(),
                    };
                    let check = self.lag.check(&context, threshold);
                    record.lag = Some(check.status);
                    record.lag_seconds = check.lag;

                    if check.status == LagStatus::Behind {
                        let exempt = !lagged.contains(&host_port)
                            && plan.unique_servers == lagged.len() + 1
                            && candidate.group == plan.best_group;

                        if exempt {
                            tracing::warn!(
                                host = %server.host,
                                port = server.port,
                                lag = ?check.lag,
                                dataset,
                                "using lagged replica, no fresher server remains"
                            );
                        } else {
                            let lag_error = RouterError::ReplicationLagDetected {
                                host: server.host.clone(),
                                port: server.port,
                                lag: check.lag.unwrap_or_default(),
                            };
                            tracing::debug!(host = %server.host, port = server.port, lag_status = %check.status, dataset, "{}", lag_error);
                            record.error = Some(lag_error.to_string());
                            session.record(record);
                            lagged.insert(host_port);
                            continue;
                        }
                    }
                }
            }

            let reachable = if operation == Operation::Write
                || last_try
                || !self.config.check_tcp_responsiveness
            {
                true
            } else {
                let up = self.prober.probe(&server.host, server.port, server.timeout).await;
                record.tcp = Some(up);
                up
            };

            if !reachable {
                tracing::warn!(host = %server.host, port = server.port, tcp = false, key = %key_label, "skipping unresponsive server");
                record.error = Some("tcp probe failed".to_string());
                session.record(record);
                continue;
            }

            let started = Instant::now();
            let connected = match tokio::time::timeout(
                server.timeout,
                self.connector.connect(&server, self.config.persistent),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(DriverError::new(
                    None,
                    format!("connect timed out after {}ms", server.timeout.as_millis()),
                )),
            };
            record.elapsed = started.elapsed();

            let mut handle = match connected {
                Ok(handle) => handle,
                Err(err) => {
                    tracing::warn!(
                        host = %server.host,
                        port = server.port,
                        errno = ?err.code,
                        tcp = ?record.tcp,
                        lag_status = ?record.lag,
                        key = %key_label,
                        error = %err.message,
                        "connection failed"
                    );
                    record.errno = err.code;
                    record.error = Some(err.message);
                    session.record(record);
                    continue;
                }
            };

            if !server.name.is_empty() {
                if let Err(err) = handle.select_database(&server.name).await {
                    tracing::warn!(
                        host = %server.host,
                        port = server.port,
                        database = %server.name,
                        errno = ?err.code,
                        key = %key_label,
                        "disconnect (select failed)"
                    );
                    handle.close().await;
                    record.errno = err.code;
                    record.error = Some(
                        RouterError::DatabaseSelectFailure {
                            database: server.name.clone(),
                            host: server.host.clone(),
                            port: server.port,
                        }
                        .to_string(),
                    );
                    session.record(record);
                    if last_try {
                        failure.select_failed = Some(server.name.clone());
                    }
                    continue;
                }
            }

            if let Err(err) = self.setup.configure(&mut *handle).await {
                tracing::warn!(
                    host = %server.host,
                    port = server.port,
                    errno = ?err.code,
                    key = %key_label,
                    error = %err.message,
                    "session setup failed"
                );
                handle.close().await;
                record.errno = err.code;
                record.error = Some(err.message);
                session.record(record);
                continue;
            }

            record.success = true;
            session.record(record);
            tracing::info!(host = %server.host, port = server.port, key = %key_label, group = candidate.group, "connected");

            let routed = self
                .pool
                .register(target.key.clone(), &server.host, server.port, &server.name, handle)
                .await;
            return PassOutcome::Connected(routed);
        }

        failure.lagged = lagged.len();
        PassOutcome::Exhausted(failure)
    }
}
