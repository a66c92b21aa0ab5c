//! Notification text, as data.
//!
//! Each appointment event maps to a fixed list of [`Template`]s, one per
//! audience. Status changes are looked up by destination status in
//! [`STATUS_TEMPLATES`]; any status without an entry gets [`STATUS_FALLBACK`].
//!
//! Messages use `{vehicle}`, `{plate}`, `{customer}`, `{employee}` and
//! `{status}` placeholders filled from a [`TemplateContext`].

use super::AppointmentEvent;
use crate::types::{AppointmentStatus, NotificationType};
use Audience::{Admins, AssignedEmployee, Customer};
use NotificationType as T;

/// Who receives a templated notification
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Audience {
    /// The appointment's owner
    Customer,
    /// The employee assigned to the appointment, if any
    AssignedEmployee,
    /// Every admin, plus one push on the admin broadcast channel
    Admins,
}

/// One notification to render for one audience
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Template {
    /// Recipients
    pub audience: Audience,
    /// Notification type
    pub kind: NotificationType,
    /// Title (no placeholders)
    pub title: &'static str,
    /// Message format
    pub message: &'static str,
}

/// Rendered title, message and type
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notice {
    /// Title
    pub title: String,
    /// Message
    pub message: String,
    /// Notification type
    pub kind: NotificationType,
}

impl Notice {
    /// Creates a new `Notice`
    #[must_use]
    pub fn new(title: impl Into<String>, message: impl Into<String>, kind: NotificationType) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            kind,
        }
    }
}

/// Values substituted into message formats
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TemplateContext {
    /// "Brand Model"
    pub vehicle: String,
    /// Registration plate
    pub plate: String,
    /// Customer display name
    pub customer: String,
    /// Assigned employee display name
    pub employee: String,
    /// Destination status name
    pub status: String,
}

const fn template(
    audience: Audience,
    kind: NotificationType,
    title: &'static str,
    message: &'static str,
) -> Template {
    Template {
        audience,
        kind,
        title,
        message,
    }
}

const CREATED: &[Template] = &[
    template(
        Customer,
        T::AppointmentCreated,
        "Appointment Created",
        "Your appointment for {vehicle} has been created successfully. Status: PENDING",
    ),
    template(
        Admins,
        T::AppointmentCreated,
        "New Appointment",
        "New appointment created by {customer} for {vehicle}",
    ),
];

const CONFIRMED: &[Template] = &[template(
    Customer,
    T::AppointmentConfirmed,
    "Appointment Confirmed",
    "Your appointment for {vehicle} has been confirmed by admin.",
)];

const REJECTED: &[Template] = &[template(
    Customer,
    T::AppointmentCancelled,
    "Appointment Cancelled",
    "Your appointment for {vehicle} has been cancelled by admin.",
)];

const EMPLOYEE_ASSIGNED: &[Template] = &[
    template(
        AssignedEmployee,
        T::EmployeeAssigned,
        "New Appointment Assigned",
        "You have been assigned to service {vehicle} (Reg: {plate})",
    ),
    template(
        Customer,
        T::StatusChangedInService,
        "Employee Assigned",
        "Employee {employee} has been assigned to your appointment. Service is now in progress.",
    ),
    template(
        Admins,
        T::StatusChangedInService,
        "Service Started",
        "Service started for {vehicle} (Customer: {customer})",
    ),
];

const CANCELLED_BY_CUSTOMER: &[Template] = &[
    template(
        Admins,
        T::AppointmentCancelled,
        "Appointment Cancelled by Customer",
        "Customer {customer} cancelled appointment for {vehicle}",
    ),
    template(
        AssignedEmployee,
        T::AppointmentCancelled,
        "Appointment Cancelled",
        "The appointment for {vehicle} has been cancelled by the customer.",
    ),
];

const UPDATED: &[Template] = &[template(
    Admins,
    T::AppointmentUpdated,
    "Appointment Updated",
    "Customer {customer} updated the appointment for {vehicle}",
)];

/// Status-change templates keyed by destination status
pub const STATUS_TEMPLATES: &[(AppointmentStatus, &[Template])] = &[
    (
        AppointmentStatus::InService,
        &[
            template(
                Customer,
                T::StatusChangedInService,
                "Service Started",
                "Your {vehicle} service has been started.",
            ),
            template(
                Admins,
                T::StatusChangedInService,
                "Service Started",
                "Service started for {vehicle} (Customer: {customer})",
            ),
        ],
    ),
    (
        AppointmentStatus::Ready,
        &[
            template(
                Customer,
                T::StatusChangedReady,
                "Vehicle Ready for Pickup",
                "Good news! Your {vehicle} is ready for pickup.",
            ),
            template(
                Admins,
                T::StatusChangedReady,
                "Vehicle Ready for Pickup",
                "{vehicle} is ready for pickup (Customer: {customer})",
            ),
        ],
    ),
    (
        AppointmentStatus::Completed,
        &[
            template(
                Customer,
                T::StatusChangedCompleted,
                "Service Completed",
                "Your {vehicle} service has been completed successfully. Thank you for choosing us!",
            ),
            template(
                Admins,
                T::StatusChangedCompleted,
                "Service Completed",
                "Service completed for {vehicle} (Customer: {customer})",
            ),
        ],
    ),
    (
        AppointmentStatus::Cancelled,
        &[
            template(
                Customer,
                T::AppointmentCancelled,
                "Appointment Cancelled",
                "Your appointment for {vehicle} has been cancelled.",
            ),
            template(
                Admins,
                T::AppointmentCancelled,
                "Appointment Cancelled",
                "Appointment cancelled for {vehicle}",
            ),
            template(
                AssignedEmployee,
                T::AppointmentCancelled,
                "Appointment Cancelled",
                "The appointment for {vehicle} has been cancelled.",
            ),
        ],
    ),
];

/// Status-change templates for destinations without an entry
pub const STATUS_FALLBACK: &[Template] = &[template(
    Customer,
    T::General,
    "Status Updated",
    "Your appointment for {vehicle} status has been updated to {status}",
)];

/// Templates for a status change into `to`
#[must_use]
pub fn for_status(to: AppointmentStatus) -> &'static [Template] {
    STATUS_TEMPLATES
        .iter()
        .find(|(status, _)| *status == to)
        .map_or(STATUS_FALLBACK, |(_, templates)| *templates)
}

/// Templates for an appointment event
#[must_use]
pub fn for_event(event: &AppointmentEvent) -> &'static [Template] {
    match event {
        AppointmentEvent::Created => CREATED,
        AppointmentEvent::Confirmed => CONFIRMED,
        AppointmentEvent::Rejected => REJECTED,
        AppointmentEvent::EmployeeAssigned { .. } => EMPLOYEE_ASSIGNED,
        AppointmentEvent::StatusChanged { to, .. } => for_status(*to),
        AppointmentEvent::CancelledByCustomer => CANCELLED_BY_CUSTOMER,
        AppointmentEvent::Updated => UPDATED,
    }
}

impl Template {
    /// Fill the message placeholders
    #[must_use]
    pub fn render(&self, context: &TemplateContext) -> Notice {
        let message = self
            .message
            .replace("{vehicle}", &context.vehicle)
            .replace("{plate}", &context.plate)
            .replace("{customer}", &context.customer)
            .replace("{employee}", &context.employee)
            .replace("{status}", &context.status);
        Notice::new(self.title, message, self.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UserId;

    fn context() -> TemplateContext {
        TemplateContext {
            vehicle: "Toyota Corolla".to_string(),
            plate: "AB-123".to_string(),
            customer: "Jane Doe".to_string(),
            employee: "Sam Wrench".to_string(),
            status: "CONFIRMED".to_string(),
        }
    }

    #[test]
    fn status_titles_are_keyed_by_destination() {
        let title = |status| for_status(status)[0].title;
        assert_eq!(title(AppointmentStatus::InService), "Service Started");
        assert_eq!(title(AppointmentStatus::Ready), "Vehicle Ready for Pickup");
        assert_eq!(title(AppointmentStatus::Completed), "Service Completed");
        assert_eq!(title(AppointmentStatus::Cancelled), "Appointment Cancelled");
        assert_eq!(title(AppointmentStatus::Confirmed), "Status Updated");
        assert_eq!(title(AppointmentStatus::Pending), "Status Updated");
    }

    #[test]
    fn fallback_notifies_only_the_customer() {
        let templates = for_status(AppointmentStatus::Confirmed);
        assert_eq!(templates.len(), 1);
        assert_eq!(templates[0].audience, Audience::Customer);
        assert_eq!(templates[0].kind, NotificationType::General);
    }

    #[test]
    fn cancellation_reaches_the_assigned_employee() {
        let audiences: Vec<Audience> = for_status(AppointmentStatus::Cancelled)
            .iter()
            .map(|t| t.audience)
            .collect();
        assert!(audiences.contains(&Audience::AssignedEmployee));
    }

    #[test]
    fn render_fills_every_placeholder() {
        let assigned = for_event(&AppointmentEvent::EmployeeAssigned {
            employee: UserId::new(),
        });
        let notices: Vec<Notice> = assigned.iter().map(|t| t.render(&context())).collect();

        assert_eq!(notices[0].message, "You have been assigned to service Toyota Corolla (Reg: AB-123)");
        assert!(notices[1].message.starts_with("Employee Sam Wrench"));
        assert_eq!(notices[2].message, "Service started for Toyota Corolla (Customer: Jane Doe)");
        assert!(notices.iter().all(|n| !n.message.contains('{')));
    }

    #[test]
    fn created_goes_to_customer_and_admins() {
        let audiences: Vec<Audience> = for_event(&AppointmentEvent::Created)
            .iter()
            .map(|t| t.audience)
            .collect();
        assert_eq!(audiences, vec![Audience::Customer, Audience::Admins]);
    }
}
