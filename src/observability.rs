use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::model::ReservationStatus;

// ── Booking metrics ─────────────────────────────────────────────

/// Counter: reservations created.
pub const RESERVATIONS_CREATED_TOTAL: &str = "fleetbook_reservations_created_total";

/// Counter: bookings or reschedules refused because dates were taken.
pub const CONFLICTS_TOTAL: &str = "fleetbook_conflicts_total";

/// Counter: lifecycle transitions committed. Labels: status.
pub const TRANSITIONS_TOTAL: &str = "fleetbook_transitions_total";

/// Counter: prices that fell back to zero on unusable input.
pub const PRICING_DEGRADED_TOTAL: &str = "fleetbook_pricing_degraded_total";

// ── Storage metrics ─────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "fleetbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "fleetbook_wal_flush_batch_size";

/// Counter: WAL compactions completed.
pub const WAL_COMPACTIONS_TOTAL: &str = "fleetbook_wal_compactions_total";

/// Install the Prometheus exporter on `port`. No-op when `port` is `None`.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Install the default `tracing` subscriber. Returns `false` if the host
/// already set one.
pub fn init_tracing() -> bool {
    tracing_subscriber::fmt::try_init().is_ok()
}

pub fn status_label(status: ReservationStatus) -> &'static str {
    status.as_str()
}
