//! Business metrics for the garage.
//!
//! Counters are recorded through the `metrics` facade. Nothing is exported
//! until the binary installs a recorder (see `bin/demo.rs`).
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `garage_bookings_total{outcome}` - Booking attempts by outcome (booked,
//!   slot_taken, capacity_exhausted, service_inactive)
//! - `garage_status_transitions_total{to}` - Appointment status changes by
//!   destination status
//! - `garage_change_request_decisions_total{status}` - Approved and rejected
//!   change requests
//! - `garage_notifications_delivered_total` - Inbox rows written by fan-out
//! - `garage_notifications_failed_total` - Audiences whose rows could not be
//!   written
//! - `garage_sweep_runs_total` - Daily capacity resets
//! - `garage_sweep_reactivated_total` - Services re-activated by the sweep

use crate::error::{ConflictReason, GarageError};
use crate::ledger::SweepReport;
use crate::notifications::FanOutReport;
use crate::types::{AppointmentStatus, ChangeRequestStatus};
use metrics::describe_counter;

/// Initialize and register all business metrics descriptions.
///
/// Call once at startup, before anything is recorded.
pub fn register_business_metrics() {
    describe_counter!(
        "garage_bookings_total",
        "Booking attempts by outcome (booked, slot_taken, capacity_exhausted, service_inactive)"
    );
    describe_counter!(
        "garage_status_transitions_total",
        "Appointment status changes by destination status"
    );
    describe_counter!(
        "garage_change_request_decisions_total",
        "Change requests decided, by resulting status"
    );

    describe_counter!(
        "garage_notifications_delivered_total",
        "Inbox rows written by notification fan-out"
    );
    describe_counter!(
        "garage_notifications_failed_total",
        "Fan-out audiences whose inbox rows could not be written"
    );

    describe_counter!("garage_sweep_runs_total", "Daily capacity resets");
    describe_counter!(
        "garage_sweep_reactivated_total",
        "Services re-activated by the daily capacity reset"
    );

    tracing::info!("Business metrics registered");
}

// ============================================================================
// Metric Recording Functions
// ============================================================================

/// Label for a refused booking
const fn refusal_label(reason: ConflictReason) -> Option<&'static str> {
    match reason {
        ConflictReason::SlotTaken => Some("slot_taken"),
        ConflictReason::CapacityExhausted => Some("capacity_exhausted"),
        ConflictReason::ServiceInactive => Some("service_inactive"),
        ConflictReason::PendingRequestExists => None,
    }
}

/// Record a successful booking.
pub fn record_booked() {
    metrics::counter!("garage_bookings_total", "outcome" => "booked").increment(1);
    tracing::debug!("Recorded booking metric");
}

/// Record a booking refused for lack of room.
///
/// Errors other than slot and capacity conflicts are not counted.
pub fn record_booking_refused(error: &GarageError) {
    let Some(outcome) = error.conflict_reason().and_then(refusal_label) else {
        return;
    };
    metrics::counter!("garage_bookings_total", "outcome" => outcome).increment(1);
    tracing::debug!(outcome, "Recorded booking refusal metric");
}

/// Record an appointment moving to `to`.
pub fn record_status_transition(to: AppointmentStatus) {
    metrics::counter!("garage_status_transitions_total", "to" => to.as_str()).increment(1);
    tracing::debug!(to = %to, "Recorded status transition metric");
}

/// Record an admin decision on a change request.
pub fn record_change_request_decision(status: ChangeRequestStatus) {
    let status = match status {
        ChangeRequestStatus::Pending => return,
        ChangeRequestStatus::Approved => "approved",
        ChangeRequestStatus::Rejected => "rejected",
    };
    metrics::counter!("garage_change_request_decisions_total", "status" => status).increment(1);
    tracing::debug!(status, "Recorded change request decision metric");
}

/// Record the outcome of one notification fan-out.
pub fn record_fan_out(report: FanOutReport) {
    metrics::counter!("garage_notifications_delivered_total")
        .increment(u64::try_from(report.delivered).unwrap_or(u64::MAX));
    metrics::counter!("garage_notifications_failed_total")
        .increment(u64::try_from(report.failed).unwrap_or(u64::MAX));
}

/// Record one capacity reset.
pub fn record_sweep_run(report: SweepReport) {
    metrics::counter!("garage_sweep_runs_total").increment(1);
    metrics::counter!("garage_sweep_reactivated_total")
        .increment(u64::try_from(report.reactivated).unwrap_or(u64::MAX));
    tracing::debug!(
        services = report.services,
        reactivated = report.reactivated,
        "Recorded sweep metric"
    );
}
