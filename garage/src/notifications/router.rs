//! Routes appointment events to their audiences.

use super::dispatcher::NotificationDispatcher;
use super::templates::{self, Audience, TemplateContext};
use super::{AppointmentEvent, AppointmentNotifier, FanOutReport};
use crate::directory::UserDirectory;
use crate::types::{Appointment, UserId};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, error, info};

/// [`AppointmentNotifier`] backed by the dispatcher and the user directory
pub struct NotificationRouter {
    dispatcher: Arc<NotificationDispatcher>,
    directory: Arc<dyn UserDirectory>,
}

impl NotificationRouter {
    /// Create a router
    #[must_use]
    pub fn new(dispatcher: Arc<NotificationDispatcher>, directory: Arc<dyn UserDirectory>) -> Self {
        Self {
            dispatcher,
            directory,
        }
    }

    async fn display_name(&self, user: Option<UserId>) -> String {
        let Some(user) = user else {
            return String::new();
        };
        match self.directory.resolve_user(&user.to_string()).await {
            Ok(Some(profile)) => profile.display_name,
            Ok(None) => user.to_string(),
            Err(e) => {
                debug!(user = %user, error = %e, "Directory lookup failed, using id");
                user.to_string()
            }
        }
    }

    async fn context(&self, event: &AppointmentEvent, appointment: &Appointment) -> TemplateContext {
        let employee = match event {
            AppointmentEvent::EmployeeAssigned { employee } => Some(*employee),
            _ => appointment.assigned_employee,
        };
        TemplateContext {
            vehicle: appointment.vehicle.label(),
            plate: appointment.vehicle.plate.clone(),
            customer: self.display_name(Some(appointment.customer_id)).await,
            employee: self.display_name(employee).await,
            status: appointment.status.to_string(),
        }
    }

    async fn route(&self, event: AppointmentEvent, appointment: Appointment) -> FanOutReport {
        let context = self.context(&event, &appointment).await;
        let mut report = FanOutReport::default();

        for template in templates::for_event(&event) {
            let notice = template.render(&context);
            let result = match template.audience {
                Audience::Customer => self
                    .dispatcher
                    .dispatch(appointment.customer_id, Some(appointment.id), notice)
                    .await
                    .map(|_| 1),
                Audience::AssignedEmployee => match appointment.assigned_employee {
                    Some(employee) => self
                        .dispatcher
                        .dispatch(employee, Some(appointment.id), notice)
                        .await
                        .map(|_| 1),
                    None => Ok(0),
                },
                Audience::Admins => self
                    .dispatcher
                    .dispatch_to_all_admins(Some(appointment.id), notice)
                    .await
                    .map(|rows| rows.len()),
            };

            match result {
                Ok(rows) => report.delivered += rows,
                Err(e) => {
                    error!(
                        appointment_id = %appointment.id,
                        audience = ?template.audience,
                        error = %e,
                        "Notification fan-out failed"
                    );
                    report.failed += 1;
                }
            }
        }

        info!(
            appointment_id = %appointment.id,
            event = ?event,
            delivered = report.delivered,
            failed = report.failed,
            "Notifications dispatched"
        );
        report
    }
}

impl AppointmentNotifier for NotificationRouter {
    fn notify(
        &self,
        event: AppointmentEvent,
        appointment: Appointment,
    ) -> Pin<Box<dyn Future<Output = FanOutReport> + Send + '_>> {
        Box::pin(self.route(event, appointment))
    }
}
