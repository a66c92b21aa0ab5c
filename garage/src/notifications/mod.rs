//! Notification fan-out.
//!
//! - [`templates`]: lookup tables from events and destination statuses to text
//! - [`dispatcher`]: persisted inbox rows plus best-effort push delivery
//! - [`router`]: turns an [`AppointmentEvent`] into dispatches per audience
//!
//! Aggregates only see the [`AppointmentNotifier`] seam. They describe the fan-out
//! as an effect and the service runs it after the state change is committed.

pub mod dispatcher;
pub mod router;
pub mod templates;

pub use dispatcher::{NotificationDispatcher, PushMessage};
pub use router::NotificationRouter;
pub use templates::{Audience, Notice, Template, TemplateContext};

use crate::types::{Appointment, AppointmentStatus, UserId};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

/// Something that happened to an appointment that people should hear about
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppointmentEvent {
    /// Customer booked
    Created,
    /// Admin approved (PENDING to CONFIRMED)
    Confirmed,
    /// Admin rejected
    Rejected,
    /// Employee assigned, service started
    EmployeeAssigned {
        /// The new assignee
        employee: UserId,
    },
    /// Staff moved the appointment along the lifecycle
    StatusChanged {
        /// Previous status
        from: AppointmentStatus,
        /// New status
        to: AppointmentStatus,
    },
    /// Owner cancelled
    CancelledByCustomer,
    /// Owner edited under an approved change request
    Updated,
}

/// Outcome of one fan-out
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanOutReport {
    /// Inbox rows written
    pub delivered: usize,
    /// Audiences whose rows could not be written
    pub failed: usize,
}

/// Seam between the appointment aggregate and notification delivery
pub trait AppointmentNotifier: Send + Sync {
    /// Deliver every notification `event` calls for.
    ///
    /// Never fails: storage failures are logged and counted in the report.
    fn notify(
        &self,
        event: AppointmentEvent,
        appointment: Appointment,
    ) -> Pin<Box<dyn Future<Output = FanOutReport> + Send + '_>>;
}
