//! Appointment service - command handlers around the appointment reducer.
//!
//! Each command follows the same sequence:
//! 1. Load the record under its lock
//! 2. Reduce the command
//! 3. Persist the new record (only if it changed)
//! 4. Release the lock, then run the notification effects
//!
//! Booking and edit-apply also hold the target date's lock from the
//! booked-slot check until the record is written, and reserve capacity in the
//! ledger before anything is persisted.

use super::change_requests::ChangeRequestService;
use crate::aggregates::appointment::{
    AppointmentAction, AppointmentEnvironment, AppointmentReducer, AppointmentState,
};
use crate::directory::{require_user, UserDirectory};
use crate::error::{ConflictReason, GarageError};
use crate::ledger::{CapacityLedger, Reservation};
use crate::locks::RecordLocks;
use crate::metrics;
use crate::store::{AppointmentFilter, AppointmentStore};
use crate::types::{
    Actor, AdminAppointmentView, Appointment, AppointmentId, AppointmentStatus, AppointmentUpdate,
    BookingRequest, Role, ServiceId, UserId,
};
use chrono::NaiveDate;
use garage_core::effect::{execute, Effect};
use garage_core::reducer::Reducer;
use garage_core::SmallVec;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

type Effects = SmallVec<[Effect<AppointmentAction>; 4]>;

/// Command and query handler for appointments
pub struct AppointmentService {
    appointments: Arc<dyn AppointmentStore>,
    directory: Arc<dyn UserDirectory>,
    ledger: Arc<CapacityLedger>,
    change_requests: Arc<ChangeRequestService>,
    reducer: AppointmentReducer,
    env: AppointmentEnvironment,
    records: Arc<RecordLocks<AppointmentId>>,
    days: RecordLocks<NaiveDate>,
}

impl AppointmentService {
    /// Create a new appointment service.
    ///
    /// Record locks are shared with `change_requests`, so status changes,
    /// edits and change-request commands on one appointment serialize.
    #[must_use]
    pub fn new(
        appointments: Arc<dyn AppointmentStore>,
        directory: Arc<dyn UserDirectory>,
        ledger: Arc<CapacityLedger>,
        change_requests: Arc<ChangeRequestService>,
        env: AppointmentEnvironment,
    ) -> Self {
        Self {
            records: Arc::clone(change_requests.record_locks()),
            appointments,
            directory,
            ledger,
            change_requests,
            reducer: AppointmentReducer::new(),
            env,
            days: RecordLocks::new(),
        }
    }

    async fn load(&self, id: AppointmentId) -> Result<Appointment, GarageError> {
        self.appointments
            .get(id)
            .await?
            .ok_or_else(|| GarageError::not_found("Appointment", id))
    }

    fn outcome(mut state: AppointmentState, id: AppointmentId) -> Result<Appointment, GarageError> {
        if let Some(error) = state.last_error.take() {
            return Err(error);
        }
        state
            .appointment
            .ok_or_else(|| GarageError::not_found("Appointment", id))
    }

    async fn run_effects(effects: Effects) {
        for feedback in execute(effects).await {
            if let AppointmentAction::NotificationsDispatched { report } = feedback {
                metrics::record_fan_out(report);
                if report.failed > 0 {
                    warn!(failed = report.failed, "Some notifications were not delivered");
                }
            }
        }
    }

    async fn ensure_slot_free(&self, date: NaiveDate, time_slot: &str) -> Result<(), GarageError> {
        if self.ledger.booked_slots(date).await?.contains(time_slot) {
            warn!(%date, time_slot, "Time slot already booked");
            return Err(GarageError::conflict(
                ConflictReason::SlotTaken,
                format!("Time slot {time_slot} on {date} is already booked"),
            ));
        }
        Ok(())
    }

    async fn reserve(&self, service: ServiceId) -> Result<(), GarageError> {
        match self.ledger.reserve(service).await? {
            Reservation::Reserved { remaining } => {
                debug!(service_id = %service, remaining, "Capacity reserved");
                Ok(())
            }
            Reservation::Exhausted => {
                warn!(service_id = %service, "Service fully booked");
                Err(GarageError::conflict(
                    ConflictReason::CapacityExhausted,
                    "No slots left for this service today",
                ))
            }
            Reservation::Inactive => {
                warn!(service_id = %service, "Service inactive");
                Err(GarageError::conflict(
                    ConflictReason::ServiceInactive,
                    "This service is currently unavailable",
                ))
            }
        }
    }

    async fn release(&self, service: ServiceId) {
        if let Err(e) = self.ledger.release(service).await {
            error!(service_id = %service, error = %e, "Failed to give a slot back");
        }
    }

    /// Book an appointment.
    ///
    /// # Errors
    ///
    /// - [`GarageError::NotFound`] if the customer does not resolve
    /// - [`GarageError::Validation`] for malformed input
    /// - [`GarageError::Conflict`] if the slot is taken or the service has no
    ///   capacity or is inactive
    /// - [`GarageError::Storage`] on repository failure (capacity is given back)
    pub async fn create(
        &self,
        customer: UserId,
        booking: BookingRequest,
    ) -> Result<Appointment, GarageError> {
        let profile = require_user(self.directory.as_ref(), customer).await?;

        let id = AppointmentId::new();
        let mut state = AppointmentState::new();
        let effects = self.reducer.reduce(
            &mut state,
            AppointmentAction::Create {
                id,
                customer,
                booking,
            },
            &self.env,
        );
        let appointment = Self::outcome(state, id).inspect_err(|e| {
            warn!(customer = %profile.username, error = %e, "Booking rejected");
        })?;
        let service = appointment.service.service_id;

        let day = self.days.lock(&appointment.appointment_date).await;
        self.ensure_slot_free(appointment.appointment_date, &appointment.time_slot)
            .await
            .inspect_err(metrics::record_booking_refused)?;
        self.reserve(service)
            .await
            .inspect_err(metrics::record_booking_refused)?;
        if let Err(e) = self.appointments.insert(appointment.clone()).await {
            self.release(service).await;
            return Err(e.into());
        }
        drop(day);
        metrics::record_booked();

        info!(
            appointment_id = %id,
            customer = %profile.username,
            date = %appointment.appointment_date,
            time_slot = %appointment.time_slot,
            "Appointment booked"
        );
        Self::run_effects(effects).await;
        Ok(appointment)
    }

    /// Reduce one command over a stored record and persist the result
    async fn transition(
        &self,
        id: AppointmentId,
        action: AppointmentAction,
    ) -> Result<Appointment, GarageError> {
        let guard = self.records.lock(&id).await;
        let current = self.load(id).await?;
        let from = current.status;

        let mut state = AppointmentState::with(current.clone());
        let effects = self.reducer.reduce(&mut state, action, &self.env);
        let updated = Self::outcome(state, id).inspect_err(|e| {
            warn!(appointment_id = %id, status = %from, error = %e, "Appointment command rejected");
        })?;

        if updated == current {
            return Ok(updated);
        }
        self.appointments.update(updated.clone()).await?;
        drop(guard);

        if updated.status != from {
            metrics::record_status_transition(updated.status);
        }
        info!(appointment_id = %id, from = %from, to = %updated.status, "Appointment updated");
        Self::run_effects(effects).await;
        Ok(updated)
    }

    /// PENDING to CONFIRMED.
    ///
    /// # Errors
    ///
    /// [`GarageError::NotFound`], or [`GarageError::InvalidState`] unless PENDING.
    pub async fn approve(&self, id: AppointmentId) -> Result<Appointment, GarageError> {
        self.transition(id, AppointmentAction::Approve).await
    }

    /// Cancel on behalf of the garage.
    ///
    /// # Errors
    ///
    /// [`GarageError::NotFound`], or [`GarageError::InvalidState`] once terminal.
    pub async fn reject(&self, id: AppointmentId) -> Result<Appointment, GarageError> {
        self.transition(id, AppointmentAction::Reject).await
    }

    /// Assign an employee and start the service.
    ///
    /// # Errors
    ///
    /// - [`GarageError::NotFound`] for an unknown appointment or employee
    /// - [`GarageError::Validation`] if the user is not an employee
    /// - [`GarageError::InvalidState`] once terminal (or before confirmation
    ///   when configured)
    pub async fn assign_employee(
        &self,
        id: AppointmentId,
        employee: UserId,
    ) -> Result<Appointment, GarageError> {
        let profile = require_user(self.directory.as_ref(), employee).await?;
        if profile.role != Role::Employee {
            return Err(GarageError::Validation(format!(
                "User {} is not an employee",
                profile.username
            )));
        }
        self.transition(id, AppointmentAction::AssignEmployee { employee })
            .await
    }

    /// Move an appointment along its lifecycle.
    ///
    /// Setting the current status again changes nothing and notifies nobody.
    ///
    /// # Errors
    ///
    /// - [`GarageError::NotFound`] for an unknown appointment
    /// - [`GarageError::Forbidden`] for customers, or employees assigned elsewhere
    /// - [`GarageError::InvalidState`] for an illegal transition
    pub async fn set_status(
        &self,
        id: AppointmentId,
        status: AppointmentStatus,
        actor: Actor,
    ) -> Result<Appointment, GarageError> {
        self.transition(id, AppointmentAction::SetStatus { status, actor })
            .await
    }

    /// Owner cancels.
    ///
    /// # Errors
    ///
    /// [`GarageError::NotFound`], [`GarageError::Forbidden`] for non-owners, or
    /// [`GarageError::InvalidState`] for COMPLETED and CANCELLED appointments.
    pub async fn cancel(&self, id: AppointmentId, customer: UserId) -> Result<Appointment, GarageError> {
        self.transition(id, AppointmentAction::Cancel { customer })
            .await
    }

    /// Owner edits the booking under an approved change request.
    ///
    /// A new slot or service is secured before the old service's slot is
    /// given back; if anything fails the old booking stays as it was.
    ///
    /// # Errors
    ///
    /// - [`GarageError::Forbidden`] without ownership and an approved request
    /// - [`GarageError::InvalidState`] unless PENDING or CONFIRMED
    /// - [`GarageError::Validation`] for an unknown slot or past date
    /// - [`GarageError::Conflict`] if the new slot or service is unavailable
    pub async fn update_appointment(
        &self,
        id: AppointmentId,
        customer: UserId,
        update: AppointmentUpdate,
    ) -> Result<Appointment, GarageError> {
        let guard = self.records.lock(&id).await;
        if !self.change_requests.can_edit(id, customer).await? {
            warn!(appointment_id = %id, "Edit without an approved change request");
            return Err(GarageError::Forbidden(
                "An approved change request is required to update this appointment".to_string(),
            ));
        }

        let current = self.load(id).await?;
        let mut state = AppointmentState::with(current.clone());
        let effects = self.reducer.reduce(
            &mut state,
            AppointmentAction::ApplyEdit { customer, update },
            &self.env,
        );
        let updated = Self::outcome(state, id).inspect_err(|e| {
            warn!(appointment_id = %id, error = %e, "Appointment edit rejected");
        })?;

        let moved = updated.appointment_date != current.appointment_date
            || updated.time_slot != current.time_slot;
        let day = if moved {
            let day = self.days.lock(&updated.appointment_date).await;
            self.ensure_slot_free(updated.appointment_date, &updated.time_slot)
                .await?;
            Some(day)
        } else {
            None
        };

        let old_service = current.service.service_id;
        let new_service = updated.service.service_id;
        let switched = old_service != new_service;
        if switched {
            self.reserve(new_service).await?;
        }
        if let Err(e) = self.appointments.update(updated.clone()).await {
            if switched {
                self.release(new_service).await;
            }
            return Err(e.into());
        }
        if switched {
            self.release(old_service).await;
        }
        drop(day);
        drop(guard);

        info!(
            appointment_id = %id,
            date = %updated.appointment_date,
            time_slot = %updated.time_slot,
            service_changed = switched,
            "Appointment edited"
        );
        Self::run_effects(effects).await;
        Ok(updated)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Load one appointment.
    ///
    /// # Errors
    ///
    /// [`GarageError::NotFound`] for an unknown id.
    pub async fn get(&self, id: AppointmentId) -> Result<Appointment, GarageError> {
        self.load(id).await
    }

    /// Current status of one appointment.
    ///
    /// # Errors
    ///
    /// [`GarageError::NotFound`] for an unknown id.
    pub async fn status_of(&self, id: AppointmentId) -> Result<AppointmentStatus, GarageError> {
        Ok(self.load(id).await?.status)
    }

    async fn newest_first(&self, filter: AppointmentFilter) -> Result<Vec<Appointment>, GarageError> {
        let mut appointments = self.appointments.find(filter).await?;
        appointments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(appointments)
    }

    /// A customer's appointments, newest first.
    ///
    /// # Errors
    ///
    /// [`GarageError::Storage`] on repository failure.
    pub async fn list_for_customer(&self, customer: UserId) -> Result<Vec<Appointment>, GarageError> {
        self.newest_first(AppointmentFilter::Customer(customer)).await
    }

    /// Appointments assigned to an employee, newest first.
    ///
    /// # Errors
    ///
    /// [`GarageError::Storage`] on repository failure.
    pub async fn list_for_employee(&self, employee: UserId) -> Result<Vec<Appointment>, GarageError> {
        self.newest_first(AppointmentFilter::Employee(employee)).await
    }

    /// Every appointment, newest first.
    ///
    /// # Errors
    ///
    /// [`GarageError::Storage`] on repository failure.
    pub async fn list_all(&self) -> Result<Vec<Appointment>, GarageError> {
        self.newest_first(AppointmentFilter::All).await
    }

    /// Every appointment with customer and employee names, newest first.
    ///
    /// Users that no longer resolve are shown without a name.
    ///
    /// # Errors
    ///
    /// [`GarageError::Storage`] on repository or directory failure.
    pub async fn admin_view(&self) -> Result<Vec<AdminAppointmentView>, GarageError> {
        let appointments = self.list_all().await?;

        let mut names: HashMap<UserId, Option<(String, String)>> = HashMap::new();
        for user in appointments
            .iter()
            .flat_map(|a| std::iter::once(a.customer_id).chain(a.assigned_employee))
        {
            if names.contains_key(&user) {
                continue;
            }
            let profile = self.directory.resolve_user(&user.to_string()).await?;
            names.insert(user, profile.map(|p| (p.username, p.display_name)));
        }

        let name = |user: UserId| names.get(&user).cloned().flatten();
        Ok(appointments
            .into_iter()
            .map(|appointment| {
                let customer = name(appointment.customer_id);
                let employee_name = appointment
                    .assigned_employee
                    .and_then(name)
                    .map(|(_, display)| display);
                AdminAppointmentView {
                    customer_username: customer.as_ref().map(|(username, _)| username.clone()),
                    customer_name: customer.map(|(_, display)| display),
                    employee_name,
                    appointment,
                }
            })
            .collect())
    }

    /// Time slots already taken on `date`.
    ///
    /// # Errors
    ///
    /// [`GarageError::Storage`] on repository failure.
    pub async fn booked_slots(&self, date: NaiveDate) -> Result<BTreeSet<String>, GarageError> {
        self.ledger.booked_slots(date).await
    }
}
