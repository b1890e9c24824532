use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "agendo_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "agendo_query_duration_seconds";

/// Counter: reclamation offers issued.
pub const OFFERS_ISSUED_TOTAL: &str = "agendo_offers_issued_total";

/// Counter: appointments auto-cancelled by the expiry sweep.
pub const APPOINTMENTS_EXPIRED_TOTAL: &str = "agendo_appointments_expired_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "agendo_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "agendo_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "agendo_connections_rejected_total";

/// Gauge: number of active tenants (loaded engines).
pub const TENANTS_ACTIVE: &str = "agendo_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "agendo_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "agendo_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertStaff { .. } => "insert_staff",
        Command::DeleteStaff { .. } => "delete_staff",
        Command::InsertService { .. } => "insert_service",
        Command::DeleteService { .. } => "delete_service",
        Command::InsertResourceType { .. } => "insert_resource_type",
        Command::DeleteResourceType { .. } => "delete_resource_type",
        Command::InsertUnit { .. } => "insert_unit",
        Command::UpdateUnitStatus { .. } => "update_unit_status",
        Command::DeleteUnit { .. } => "delete_unit",
        Command::InsertNeed { .. } => "insert_need",
        Command::DeleteNeed { .. } => "delete_need",
        Command::InsertRule { .. } => "insert_rule",
        Command::DeleteRule { .. } => "delete_rule",
        Command::InsertBlackout { .. } => "insert_blackout",
        Command::DeleteBlackout { .. } => "delete_blackout",
        Command::UpdatePolicy { .. } => "update_policy",
        Command::InsertAppointment { .. } => "insert_appointment",
        Command::ApproveAppointment { .. } => "approve_appointment",
        Command::ConfirmDeposit { .. } => "confirm_deposit",
        Command::ReprogramAppointment { .. } => "reprogram_appointment",
        Command::CancelAppointment { .. } => "cancel_appointment",
        Command::CompleteAppointment { .. } => "complete_appointment",
        Command::MarkNoShow { .. } => "mark_no_show",
        Command::InsertWaitlist { .. } => "insert_waitlist",
        Command::DeleteWaitlist { .. } => "delete_waitlist",
        Command::AcceptOffer { .. } => "accept_offer",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectAppointments { .. } => "select_appointments",
        Command::SelectOffers { .. } => "select_offers",
        Command::SelectWaitlist => "select_waitlist",
        Command::SelectStaff => "select_staff",
        Command::SelectServices => "select_services",
        Command::SelectRules => "select_rules",
        Command::SelectBlackouts => "select_blackouts",
        Command::SelectUnits => "select_units",
        Command::SelectPolicy => "select_policy",
        Command::Listen { .. } => "listen",
    }
}
