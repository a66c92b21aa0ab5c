//! Domain types for the garage appointment engine.
//!
//! Value objects, entities and closed enums shared by the ledger, the
//! aggregates, the notification dispatcher and the services.

use crate::error::GarageError;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            #[doc = concat!("Creates a new random `", stringify!($name), "`")]
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[doc = concat!("Create a `", stringify!($name), "` from a `Uuid`")]
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the inner UUID
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for an appointment
    AppointmentId
);
uuid_id!(
    /// Unique identifier for a change request
    ChangeRequestId
);
uuid_id!(
    /// Unique identifier for an inbox notification
    NotificationId
);
uuid_id!(
    /// Unique identifier for a catalog service
    ServiceId
);
uuid_id!(
    /// Unique identifier for a user (customer, employee or admin)
    UserId
);

// ============================================================================
// Appointment status
// ============================================================================

/// Lifecycle status of an appointment.
///
/// Serialized by uppercase name. Edges:
///
/// ```text
/// PENDING -> CONFIRMED -> IN_SERVICE -> READY -> COMPLETED
///    \__________\_____________\__________\_____-> CANCELLED
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppointmentStatus {
    /// Booked, waiting for admin approval
    Pending,
    /// Approved by an admin
    Confirmed,
    /// An employee is working on the vehicle
    InService,
    /// Work finished, vehicle waiting for pickup
    Ready,
    /// Vehicle picked up (terminal)
    Completed,
    /// Cancelled by the customer or rejected by an admin (terminal)
    Cancelled,
}

impl AppointmentStatus {
    /// Every status, in lifecycle order
    pub const ALL: [Self; 6] = [
        Self::Pending,
        Self::Confirmed,
        Self::InService,
        Self::Ready,
        Self::Completed,
        Self::Cancelled,
    ];

    /// Wire name (`IN_SERVICE`, ...)
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Confirmed => "CONFIRMED",
            Self::InService => "IN_SERVICE",
            Self::Ready => "READY",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Statuses reachable in one step
    #[must_use]
    pub const fn successors(self) -> &'static [Self] {
        match self {
            Self::Pending => &[Self::Confirmed, Self::Cancelled],
            Self::Confirmed => &[Self::InService, Self::Cancelled],
            Self::InService => &[Self::Ready, Self::Cancelled],
            Self::Ready => &[Self::Completed, Self::Cancelled],
            Self::Completed | Self::Cancelled => &[],
        }
    }

    /// Whether `next` is a legal edge from this status
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        self.successors().contains(&next)
    }

    /// COMPLETED and CANCELLED accept no further transitions
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Statuses in which a customer may still ask for (and apply) changes
    #[must_use]
    pub const fn is_editable(self) -> bool {
        matches!(self, Self::Pending | Self::Confirmed)
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppointmentStatus {
    type Err = GarageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| GarageError::Validation(format!("Unknown appointment status '{s}'")))
    }
}

/// Status of a customer change request
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeRequestStatus {
    /// Waiting for an admin decision
    Pending,
    /// Admin allowed the customer to edit the appointment
    Approved,
    /// Admin declined the request
    Rejected,
}

impl fmt::Display for ChangeRequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
        })
    }
}

/// Closed set of notification types
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationType {
    /// A booking was created
    AppointmentCreated,
    /// An admin approved a booking
    AppointmentConfirmed,
    /// A booking was cancelled or rejected
    AppointmentCancelled,
    /// A customer edited a booking under an approved change request
    AppointmentUpdated,
    /// An employee was assigned to a booking
    EmployeeAssigned,
    /// Work started
    StatusChangedInService,
    /// Vehicle ready for pickup
    StatusChangedReady,
    /// Work completed
    StatusChangedCompleted,
    /// Anything else
    General,
}

// ============================================================================
// Users
// ============================================================================

/// Role of a user as reported by the directory
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    /// Books and owns appointments
    Customer,
    /// Works on assigned appointments
    Employee,
    /// Approves bookings and adjudicates change requests
    Admin,
}

/// User as resolved from the external directory
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// User ID
    pub id: UserId,
    /// Login name
    pub username: String,
    /// Name shown in notifications ("First Last")
    pub display_name: String,
    /// Role
    pub role: Role,
}

impl UserProfile {
    /// Creates a new `UserProfile`
    #[must_use]
    pub fn new(username: impl Into<String>, display_name: impl Into<String>, role: Role) -> Self {
        Self {
            id: UserId::new(),
            username: username.into(),
            display_name: display_name.into(),
            role,
        }
    }

    /// The acting identity of this user
    #[must_use]
    pub const fn actor(&self) -> Actor {
        Actor {
            id: self.id,
            role: self.role,
        }
    }
}

/// Who is performing an operation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// Acting user
    pub id: UserId,
    /// Role the user acts in
    pub role: Role,
}

impl Actor {
    /// Creates a new `Actor`
    #[must_use]
    pub const fn new(id: UserId, role: Role) -> Self {
        Self { id, role }
    }
}

// ============================================================================
// Appointments
// ============================================================================

/// Vehicle brought in for service
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vehicle {
    /// Car, van, motorbike, ...
    pub vehicle_type: String,
    /// Manufacturer
    pub brand: String,
    /// Model name
    pub model: String,
    /// Year of manufacture
    pub year: i32,
    /// Registration plate
    pub plate: String,
    /// Petrol, diesel, electric, ...
    pub fuel_type: String,
}

impl Vehicle {
    /// "Brand Model", as used in notification text
    #[must_use]
    pub fn label(&self) -> String {
        format!("{} {}", self.brand, self.model)
    }
}

/// Catalog service requested for an appointment
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSelection {
    /// Catalog service whose daily capacity is consumed
    pub service_id: ServiceId,
    /// Service category (e.g. "Maintenance")
    pub category: String,
    /// Service type within the category (e.g. "Oil change")
    pub service_type: String,
}

/// Input of a booking
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRequest {
    /// Vehicle descriptor
    pub vehicle: Vehicle,
    /// Requested service
    pub service: ServiceSelection,
    /// Free-text requirements
    pub additional_requirements: String,
    /// Day of the appointment
    pub date: NaiveDate,
    /// Named time bucket, e.g. `"09:00-10:00"`
    pub time_slot: String,
}

/// A service appointment
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    /// Appointment ID
    pub id: AppointmentId,
    /// Owning customer
    pub customer_id: UserId,
    /// Vehicle descriptor
    pub vehicle: Vehicle,
    /// Requested service
    pub service: ServiceSelection,
    /// Free-text requirements
    pub additional_requirements: String,
    /// Day of the appointment
    pub appointment_date: NaiveDate,
    /// Named time bucket
    pub time_slot: String,
    /// Lifecycle status
    pub status: AppointmentStatus,
    /// Employee working on the vehicle
    pub assigned_employee: Option<UserId>,
    /// When booked
    pub created_at: DateTime<Utc>,
    /// Last modification
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    /// Build a PENDING appointment from a booking
    #[must_use]
    pub fn book(
        id: AppointmentId,
        customer_id: UserId,
        booking: BookingRequest,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            customer_id,
            vehicle: booking.vehicle,
            service: booking.service,
            additional_requirements: booking.additional_requirements,
            appointment_date: booking.date,
            time_slot: booking.time_slot,
            status: AppointmentStatus::Pending,
            assigned_employee: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether `user` owns this appointment
    #[must_use]
    pub fn is_owned_by(&self, user: UserId) -> bool {
        self.customer_id == user
    }
}

/// Fields a customer may change under an approved change request.
///
/// `None` keeps the current value.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentUpdate {
    /// New day
    pub date: Option<NaiveDate>,
    /// New time bucket
    pub time_slot: Option<String>,
    /// New service
    pub service: Option<ServiceSelection>,
    /// New free-text requirements
    pub additional_requirements: Option<String>,
}

/// Appointment enriched with directory names for the admin dashboard
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminAppointmentView {
    /// The appointment
    pub appointment: Appointment,
    /// Customer login name, if the customer still resolves
    pub customer_username: Option<String>,
    /// Customer display name
    pub customer_name: Option<String>,
    /// Assigned employee display name
    pub employee_name: Option<String>,
}

// ============================================================================
// Change requests
// ============================================================================

/// Customer request to modify a booked appointment
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRequest {
    /// Request ID
    pub id: ChangeRequestId,
    /// Appointment the request is about
    pub appointment_id: AppointmentId,
    /// Requesting customer
    pub customer_id: UserId,
    /// Why the customer wants a change
    pub reason: String,
    /// Adjudication status
    pub status: ChangeRequestStatus,
    /// Admin note attached to the decision
    pub admin_response: Option<String>,
    /// When submitted
    pub requested_at: DateTime<Utc>,
    /// When decided
    pub responded_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Notifications
// ============================================================================

/// One inbox entry for one recipient
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Notification ID
    pub id: NotificationId,
    /// Owning recipient
    pub recipient: UserId,
    /// Appointment the notification is about
    pub appointment_id: Option<AppointmentId>,
    /// Short title
    pub title: String,
    /// Body text
    pub message: String,
    /// Notification type
    #[serde(rename = "type")]
    pub kind: NotificationType,
    /// Read flag
    pub is_read: bool,
    /// When created
    pub created_at: DateTime<Utc>,
    /// When marked read
    pub read_at: Option<DateTime<Utc>>,
}

impl Notification {
    /// Mark as read at `now`; returns false if it already was
    pub fn mark_read(&mut self, now: DateTime<Utc>) -> bool {
        if self.is_read {
            return false;
        }
        self.is_read = true;
        self.read_at = Some(now);
        true
    }
}

// ============================================================================
// Service capacity
// ============================================================================

/// Why a catalog service is currently inactive
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeactivationReason {
    /// The ledger ran out of daily slots
    Exhausted,
    /// An admin switched the service off
    Manual,
}

/// Catalog service with its live daily capacity
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceCapacity {
    /// Service ID
    pub id: ServiceId,
    /// Display name
    pub name: String,
    /// Category
    pub category: String,
    /// Configured slots per day
    pub max_daily_slots: u32,
    /// Slots left today
    pub available_slots: u32,
    /// Whether bookings are accepted
    pub is_active: bool,
    /// Why the service is inactive
    pub deactivation: Option<DeactivationReason>,
}

impl ServiceCapacity {
    /// A fresh, active service with a full day of slots
    #[must_use]
    pub fn new(name: impl Into<String>, category: impl Into<String>, max_daily_slots: u32) -> Self {
        Self {
            id: ServiceId::new(),
            name: name.into(),
            category: category.into(),
            max_daily_slots,
            available_slots: max_daily_slots,
            is_active: max_daily_slots > 0,
            deactivation: (max_daily_slots == 0).then_some(DeactivationReason::Exhausted),
        }
    }

    /// Slots taken today
    #[must_use]
    pub const fn booked(&self) -> u32 {
        self.max_daily_slots.saturating_sub(self.available_slots)
    }

    pub(crate) fn deactivate(&mut self, reason: DeactivationReason) {
        self.is_active = false;
        self.deactivation = Some(reason);
    }

    pub(crate) fn reactivate(&mut self) {
        self.is_active = true;
        self.deactivation = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_edges_follow_the_lifecycle() {
        use AppointmentStatus::{Cancelled, Completed, Confirmed, InService, Pending, Ready};

        assert!(Pending.can_transition_to(Confirmed));
        assert!(Confirmed.can_transition_to(InService));
        assert!(InService.can_transition_to(Ready));
        assert!(Ready.can_transition_to(Completed));
        assert!(Ready.can_transition_to(Cancelled));
        assert!(!Pending.can_transition_to(Ready));
        assert!(!Completed.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Pending));
        assert!(Completed.is_terminal() && Cancelled.is_terminal());
    }

    #[test]
    fn status_parses_uppercase_names_only() {
        assert_eq!("IN_SERVICE".parse::<AppointmentStatus>().ok(), Some(AppointmentStatus::InService));
        let err = "in_service".parse::<AppointmentStatus>();
        assert!(matches!(err, Err(GarageError::Validation(_))));
    }

    #[test]
    fn status_serializes_by_uppercase_name() {
        let json = serde_json::to_string(&AppointmentStatus::InService).ok();
        assert_eq!(json.as_deref(), Some("\"IN_SERVICE\""));
        let unknown: Result<AppointmentStatus, _> = serde_json::from_str("\"PARKED\"");
        assert!(unknown.is_err());
    }

    #[test]
    fn mark_read_sets_read_at_once() {
        let now = Utc::now();
        let mut notification = Notification {
            id: NotificationId::new(),
            recipient: UserId::new(),
            appointment_id: None,
            title: "t".to_string(),
            message: "m".to_string(),
            kind: NotificationType::General,
            is_read: false,
            created_at: now,
            read_at: None,
        };

        assert!(notification.mark_read(now));
        assert!(!notification.mark_read(now + chrono::Duration::seconds(5)));
        assert_eq!(notification.read_at, Some(now));
    }

    #[test]
    fn zero_capacity_service_starts_inactive() {
        let service = ServiceCapacity::new("Detailing", "Care", 0);
        assert!(!service.is_active);
        assert_eq!(service.deactivation, Some(DeactivationReason::Exhausted));
    }
}
