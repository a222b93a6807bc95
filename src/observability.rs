use std::net::SocketAddr;

// ── Decisions ───────────────────────────────────────────────────

/// Counter: pre-create checks. Labels: decision (admit, reject, out_of_scope).
pub const ADMISSIONS_TOTAL: &str = "slotcap_admissions_total";

/// Counter: post-update reconciliations. Labels: decision
/// (keep, cancel, out_of_scope, inactive, zero_count).
pub const RECONCILIATIONS_TOTAL: &str = "slotcap_reconciliations_total";

/// Counter: booking store failures surfaced to the engine.
pub const STORE_ERRORS_TOTAL: &str = "slotcap_store_errors_total";

// ── Contention ──────────────────────────────────────────────────

/// Histogram: time spent waiting for a slot lock, in seconds.
pub const SLOT_LOCK_WAIT_SECONDS: &str = "slotcap_slot_lock_wait_seconds";

/// Gauge: slots currently locked or waited on.
pub const SLOT_LOCKS_ACTIVE: &str = "slotcap_slot_locks_active";

// ── Hook server ─────────────────────────────────────────────────

/// Counter: hook requests handled. Labels: op, status.
pub const REQUESTS_TOTAL: &str = "slotcap_requests_total";

/// Histogram: hook request latency in seconds. Labels: op.
pub const REQUEST_DURATION_SECONDS: &str = "slotcap_request_duration_seconds";

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "slotcap_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "slotcap_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "slotcap_connections_rejected_total";

/// Counter: requests with a missing or wrong token.
pub const AUTH_FAILURES_TOTAL: &str = "slotcap_auth_failures_total";

// ── Booking log ─────────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotcap_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotcap_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
