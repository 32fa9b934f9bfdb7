use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: HTTP requests served. Labels: method, route, status.
pub const HTTP_REQUESTS_TOTAL: &str = "allocd_http_requests_total";

/// Histogram: HTTP request latency in seconds. Labels: method, route.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "allocd_http_request_duration_seconds";

/// Counter: allocation decisions. Labels: mode (probe|confirm), outcome.
pub const ALLOCATIONS_TOTAL: &str = "allocd_allocations_total";

/// Histogram: allocation latency in seconds, store calls included. Labels: mode.
pub const ALLOCATION_DURATION_SECONDS: &str = "allocd_allocation_duration_seconds";

/// Counter: creates that lost the race for a unit and moved on.
pub const WRITE_CONFLICTS_TOTAL: &str = "allocd_write_conflicts_total";

pub const MODE_PROBE: &str = "probe";
pub const MODE_CONFIRM: &str = "confirm";

// ── USE metrics (resource utilization) ──────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "allocd_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "allocd_wal_flush_batch_size";

/// Counter: completed WAL compactions.
pub const WAL_COMPACTIONS_TOTAL: &str = "allocd_wal_compactions_total";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
