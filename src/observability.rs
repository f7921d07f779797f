use std::net::SocketAddr;

use crate::sql::Command;

// ── Request metrics ─────────────────────────────────────────────

/// Counter: total statements executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "timetable_queries_total";

/// Histogram: statement latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "timetable_query_duration_seconds";

// ── Scheduling outcomes ─────────────────────────────────────────

/// Counter: rejected bookings. Labels: dimension (staff, class, room, slot).
pub const CONFLICTS_TOTAL: &str = "timetable_conflicts_total";

/// Counter: auto-assign calls. Labels: outcome (assigned, no_capacity).
pub const ASSIGNMENTS_TOTAL: &str = "timetable_assignments_total";

// ── Resource utilization ────────────────────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "timetable_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "timetable_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "timetable_connections_rejected_total";

/// Gauge: number of loaded tenants.
pub const TENANTS_ACTIVE: &str = "timetable_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "timetable_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "timetable_wal_flush_batch_size";

/// Counter: completed WAL compactions.
pub const WAL_COMPACTIONS_TOTAL: &str = "timetable_wal_compactions_total";

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

/// Short label for a command, used in metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertBooking { .. } => "insert_booking",
        Command::BatchInsertBookings { .. } => "batch_insert_bookings",
        Command::AutoAssign { .. } => "auto_assign",
        Command::UpdateBooking { .. } => "update_booking",
        Command::DeleteBooking { .. } => "delete_booking",
        Command::SelectBookings { .. } => "select_bookings",
        Command::SelectGrid { .. } => "select_grid",
        Command::SelectSlots => "select_slots",
        Command::SelectExport { .. } => "select_export",
    }
}
