//! Appointment state machine.
//!
//! One reducer instance handles one appointment record at a time. Commands are
//! validated against the record, turned into events, and the events are applied
//! to the state. Every status change returns exactly one notification effect;
//! rejected commands leave the record untouched and set `last_error`.
//!
//! ```text
//! PENDING ──approve──▶ CONFIRMED ──▶ IN_SERVICE ──▶ READY ──▶ COMPLETED
//!    │                    │              │            │
//!    └────────────────────┴──────────────┴────────────┴──▶ CANCELLED
//! ```
//!
//! Capacity and slot checks happen in the service layer before `Create` and
//! `ApplyEdit` reach the reducer; the reducer only validates the input shape.

use crate::config::SchedulingConfig;
use crate::error::GarageError;
use crate::notifications::{AppointmentEvent, AppointmentNotifier, FanOutReport};
use crate::types::{
    Actor, Appointment, AppointmentId, AppointmentStatus, AppointmentUpdate, BookingRequest, Role,
    ServiceSelection, UserId, Vehicle,
};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use garage_core::{async_effect, effect::Effect, environment::Clock, reducer::Reducer, smallvec, SmallVec};
use std::sync::Arc;
use tracing::debug;

/// Oldest accepted year of manufacture
pub const EARLIEST_VEHICLE_YEAR: i32 = 1886;

// ============================================================================
// Actions (Commands + Events)
// ============================================================================

/// Actions for the appointment aggregate
#[derive(Clone, Debug)]
pub enum AppointmentAction {
    // Commands
    /// Book a new appointment
    Create {
        /// ID for the new appointment
        id: AppointmentId,
        /// Booking customer
        customer: UserId,
        /// Booking details
        booking: BookingRequest,
    },

    /// Admin approves a PENDING appointment
    Approve,

    /// Admin rejects a not yet finished appointment
    Reject,

    /// Admin assigns an employee, which starts the service
    AssignEmployee {
        /// Employee to assign
        employee: UserId,
    },

    /// Staff moves the appointment along the lifecycle
    SetStatus {
        /// Destination status
        status: AppointmentStatus,
        /// Acting staff member
        actor: Actor,
    },

    /// Owner cancels
    Cancel {
        /// Requesting customer
        customer: UserId,
    },

    /// Owner edits under an approved change request
    ApplyEdit {
        /// Requesting customer
        customer: UserId,
        /// Fields to change
        update: AppointmentUpdate,
    },

    // Events
    /// Appointment was booked
    Created {
        /// The new record
        appointment: Appointment,
    },

    /// Status moved (and possibly the assignee with it)
    StatusChanged {
        /// New status
        to: AppointmentStatus,
        /// Assignee after the change
        assigned_employee: Option<UserId>,
        /// When
        at: DateTime<Utc>,
    },

    /// Booking details were edited
    Edited {
        /// Day
        date: NaiveDate,
        /// Time bucket
        time_slot: String,
        /// Service
        service: ServiceSelection,
        /// Free-text requirements
        additional_requirements: String,
        /// When
        at: DateTime<Utc>,
    },

    /// Command rejected
    ValidationFailed {
        /// Why
        error: GarageError,
    },

    /// Notification effect finished
    NotificationsDispatched {
        /// What was delivered
        report: FanOutReport,
    },
}

// ============================================================================
// State
// ============================================================================

/// The appointment under reduction
#[derive(Clone, Debug, Default)]
pub struct AppointmentState {
    /// The record, absent before `Create`
    pub appointment: Option<Appointment>,
    /// Error of the last rejected command
    pub last_error: Option<GarageError>,
}

impl AppointmentState {
    /// Empty state, ready for `Create`
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// State holding an existing record
    #[must_use]
    pub fn with(appointment: Appointment) -> Self {
        Self {
            appointment: Some(appointment),
            last_error: None,
        }
    }

    /// Current status
    #[must_use]
    pub fn status(&self) -> Option<AppointmentStatus> {
        self.appointment.as_ref().map(|a| a.status)
    }
}

// ============================================================================
// Environment
// ============================================================================

/// Environment dependencies for the appointment aggregate
#[derive(Clone)]
pub struct AppointmentEnvironment {
    /// Clock for timestamps and "today"
    pub clock: Arc<dyn Clock>,
    /// Notification fan-out
    pub notifier: Arc<dyn AppointmentNotifier>,
    /// Booking rules
    pub scheduling: SchedulingConfig,
}

impl AppointmentEnvironment {
    /// Creates a new `AppointmentEnvironment`
    #[must_use]
    pub fn new(
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn AppointmentNotifier>,
        scheduling: SchedulingConfig,
    ) -> Self {
        Self {
            clock,
            notifier,
            scheduling,
        }
    }

    /// Today's date
    #[must_use]
    pub fn today(&self) -> NaiveDate {
        self.clock.now().date_naive()
    }
}

// ============================================================================
// Validation
// ============================================================================

/// Check a date and slot label against the booking rules.
///
/// # Errors
///
/// Returns [`GarageError::Validation`] for an unknown slot or a past date.
pub fn validate_slot(
    date: NaiveDate,
    time_slot: &str,
    rules: &SchedulingConfig,
    today: NaiveDate,
) -> Result<(), GarageError> {
    if !rules.is_known_slot(time_slot) {
        return Err(GarageError::Validation(format!("Unknown time slot '{time_slot}'")));
    }
    if date < today && !rules.allow_past_dates {
        return Err(GarageError::Validation(format!("Cannot book {date}, it is in the past")));
    }
    Ok(())
}

fn validate_vehicle(vehicle: &Vehicle, today: NaiveDate) -> Result<(), GarageError> {
    for (field, value) in [
        ("Vehicle brand", &vehicle.brand),
        ("Vehicle model", &vehicle.model),
        ("Registration number", &vehicle.plate),
    ] {
        if value.trim().is_empty() {
            return Err(GarageError::Validation(format!("{field} must not be empty")));
        }
    }
    let latest = today.year() + 1;
    if !(EARLIEST_VEHICLE_YEAR..=latest).contains(&vehicle.year) {
        return Err(GarageError::Validation(format!(
            "Year of manufacture must be between {EARLIEST_VEHICLE_YEAR} and {latest}"
        )));
    }
    Ok(())
}

/// Check a booking before any capacity is touched.
///
/// # Errors
///
/// Returns [`GarageError::Validation`] describing the first problem found.
pub fn validate_booking(
    booking: &BookingRequest,
    rules: &SchedulingConfig,
    today: NaiveDate,
) -> Result<(), GarageError> {
    validate_vehicle(&booking.vehicle, today)?;
    validate_slot(booking.date, &booking.time_slot, rules, today)
}

// ============================================================================
// Reducer
// ============================================================================

/// Reducer for the appointment aggregate
#[derive(Clone, Debug, Default)]
pub struct AppointmentReducer;

type Effects = SmallVec<[Effect<AppointmentAction>; 4]>;

impl AppointmentReducer {
    /// Creates a new `AppointmentReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Applies an event to state
    fn apply_event(state: &mut AppointmentState, action: &AppointmentAction) {
        match action {
            AppointmentAction::Created { appointment } => {
                state.appointment = Some(appointment.clone());
                state.last_error = None;
            }

            AppointmentAction::StatusChanged {
                to,
                assigned_employee,
                at,
            } => {
                if let Some(appointment) = state.appointment.as_mut() {
                    appointment.status = *to;
                    appointment.assigned_employee = *assigned_employee;
                    appointment.updated_at = *at;
                }
                state.last_error = None;
            }

            AppointmentAction::Edited {
                date,
                time_slot,
                service,
                additional_requirements,
                at,
            } => {
                if let Some(appointment) = state.appointment.as_mut() {
                    appointment.appointment_date = *date;
                    appointment.time_slot.clone_from(time_slot);
                    appointment.service = service.clone();
                    appointment.additional_requirements.clone_from(additional_requirements);
                    appointment.updated_at = *at;
                }
                state.last_error = None;
            }

            AppointmentAction::ValidationFailed { error } => {
                state.last_error = Some(error.clone());
            }

            // Commands and effect feedback don't modify state
            AppointmentAction::Create { .. }
            | AppointmentAction::Approve
            | AppointmentAction::Reject
            | AppointmentAction::AssignEmployee { .. }
            | AppointmentAction::SetStatus { .. }
            | AppointmentAction::Cancel { .. }
            | AppointmentAction::ApplyEdit { .. }
            | AppointmentAction::NotificationsDispatched { .. } => {}
        }
    }

    fn fail(state: &mut AppointmentState, error: GarageError) -> Effects {
        debug!(error = %error, "Appointment command rejected");
        Self::apply_event(state, &AppointmentAction::ValidationFailed { error });
        SmallVec::new()
    }

    fn notify(env: &AppointmentEnvironment, event: AppointmentEvent, appointment: Appointment) -> Effects {
        let notifier = Arc::clone(&env.notifier);
        smallvec![async_effect! {
            let report = notifier.notify(event, appointment).await;
            Some(AppointmentAction::NotificationsDispatched { report })
        }]
    }

    /// Apply a status change and describe its fan-out
    fn transition(
        state: &mut AppointmentState,
        env: &AppointmentEnvironment,
        to: AppointmentStatus,
        assigned_employee: Option<UserId>,
        event: AppointmentEvent,
    ) -> Effects {
        Self::apply_event(
            state,
            &AppointmentAction::StatusChanged {
                to,
                assigned_employee,
                at: env.clock.now(),
            },
        );
        match state.appointment.clone() {
            Some(appointment) => Self::notify(env, event, appointment),
            None => SmallVec::new(),
        }
    }

    fn set_status(
        state: &mut AppointmentState,
        env: &AppointmentEnvironment,
        record: &Appointment,
        next: AppointmentStatus,
        actor: Actor,
    ) -> Effects {
        let current = record.status;
        if actor.role == Role::Customer {
            return Self::fail(
                state,
                GarageError::Forbidden("Customers cannot change appointment status".to_string()),
            );
        }
        if current == next {
            debug!(appointment_id = %record.id, status = %current, "Status unchanged, nothing to do");
            state.last_error = None;
            return SmallVec::new();
        }
        if !current.can_transition_to(next) {
            return Self::fail(
                state,
                GarageError::InvalidState(format!("Cannot move appointment from {current} to {next}")),
            );
        }

        let mut assignee = record.assigned_employee;
        if actor.role == Role::Employee {
            match assignee {
                Some(employee) if employee != actor.id => {
                    return Self::fail(
                        state,
                        GarageError::Forbidden(
                            "Appointment is assigned to another employee".to_string(),
                        ),
                    );
                }
                None if next == AppointmentStatus::InService => assignee = Some(actor.id),
                _ => {}
            }
        }
        if next == AppointmentStatus::InService && assignee.is_none() {
            return Self::fail(
                state,
                GarageError::InvalidState("Assign an employee before starting service".to_string()),
            );
        }

        Self::transition(
            state,
            env,
            next,
            assignee,
            AppointmentEvent::StatusChanged {
                from: current,
                to: next,
            },
        )
    }

    fn apply_edit(
        state: &mut AppointmentState,
        env: &AppointmentEnvironment,
        record: &Appointment,
        customer: UserId,
        update: AppointmentUpdate,
    ) -> Effects {
        if !record.is_owned_by(customer) {
            return Self::fail(
                state,
                GarageError::Forbidden("You can only update your own appointments".to_string()),
            );
        }
        if !record.status.is_editable() {
            return Self::fail(
                state,
                GarageError::InvalidState(format!(
                    "Cannot update appointments in {} state",
                    record.status
                )),
            );
        }

        let date = update.date.unwrap_or(record.appointment_date);
        let time_slot = update.time_slot.unwrap_or_else(|| record.time_slot.clone());
        let moved = date != record.appointment_date || time_slot != record.time_slot;
        if moved {
            if let Err(error) = validate_slot(date, &time_slot, &env.scheduling, env.today()) {
                return Self::fail(state, error);
            }
        }

        Self::apply_event(
            state,
            &AppointmentAction::Edited {
                date,
                time_slot,
                service: update.service.unwrap_or_else(|| record.service.clone()),
                additional_requirements: update
                    .additional_requirements
                    .unwrap_or_else(|| record.additional_requirements.clone()),
                at: env.clock.now(),
            },
        );
        match state.appointment.clone() {
            Some(appointment) => Self::notify(env, AppointmentEvent::Updated, appointment),
            None => SmallVec::new(),
        }
    }
}

impl Reducer for AppointmentReducer {
    type State = AppointmentState;
    type Action = AppointmentAction;
    type Environment = AppointmentEnvironment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        if let AppointmentAction::Create { id, customer, booking } = action {
            if state.appointment.is_some() {
                return Self::fail(state, GarageError::InvalidState(format!("Appointment {id} already exists")));
            }
            if let Err(error) = validate_booking(&booking, &env.scheduling, env.today()) {
                return Self::fail(state, error);
            }
            let appointment = Appointment::book(id, customer, booking, env.clock.now());
            Self::apply_event(
                state,
                &AppointmentAction::Created {
                    appointment: appointment.clone(),
                },
            );
            return Self::notify(env, AppointmentEvent::Created, appointment);
        }

        // Events are applied as-is
        if matches!(
            action,
            AppointmentAction::Created { .. }
                | AppointmentAction::StatusChanged { .. }
                | AppointmentAction::Edited { .. }
                | AppointmentAction::ValidationFailed { .. }
                | AppointmentAction::NotificationsDispatched { .. }
        ) {
            Self::apply_event(state, &action);
            return SmallVec::new();
        }

        let Some(record) = state.appointment.clone() else {
            return Self::fail(state, GarageError::InvalidState("Appointment does not exist".to_string()));
        };
        let status = record.status;

        match action {
            AppointmentAction::Approve => {
                if status != AppointmentStatus::Pending {
                    return Self::fail(
                        state,
                        GarageError::InvalidState("Only pending appointments can be approved".to_string()),
                    );
                }
                Self::transition(
                    state,
                    env,
                    AppointmentStatus::Confirmed,
                    record.assigned_employee,
                    AppointmentEvent::Confirmed,
                )
            }

            AppointmentAction::Reject => {
                if status.is_terminal() {
                    return Self::fail(
                        state,
                        GarageError::InvalidState(format!("Cannot reject a {status} appointment")),
                    );
                }
                Self::transition(
                    state,
                    env,
                    AppointmentStatus::Cancelled,
                    record.assigned_employee,
                    AppointmentEvent::Rejected,
                )
            }

            AppointmentAction::AssignEmployee { employee } => {
                if status.is_terminal() {
                    return Self::fail(
                        state,
                        GarageError::InvalidState(format!(
                            "Cannot assign an employee to a {status} appointment"
                        )),
                    );
                }
                if env.scheduling.assign_requires_confirmed && status != AppointmentStatus::Confirmed {
                    return Self::fail(
                        state,
                        GarageError::InvalidState(
                            "Only confirmed appointments can be assigned".to_string(),
                        ),
                    );
                }
                Self::transition(
                    state,
                    env,
                    AppointmentStatus::InService,
                    Some(employee),
                    AppointmentEvent::EmployeeAssigned { employee },
                )
            }

            AppointmentAction::SetStatus { status: next, actor } => {
                Self::set_status(state, env, &record, next, actor)
            }

            AppointmentAction::Cancel { customer } => {
                if !record.is_owned_by(customer) {
                    return Self::fail(
                        state,
                        GarageError::Forbidden(
                            "You are not authorized to cancel this appointment".to_string(),
                        ),
                    );
                }
                match status {
                    AppointmentStatus::Completed => Self::fail(
                        state,
                        GarageError::InvalidState(
                            "Completed appointments cannot be cancelled".to_string(),
                        ),
                    ),
                    AppointmentStatus::Cancelled => Self::fail(
                        state,
                        GarageError::InvalidState("Appointment is already cancelled".to_string()),
                    ),
                    _ => Self::transition(
                        state,
                        env,
                        AppointmentStatus::Cancelled,
                        record.assigned_employee,
                        AppointmentEvent::CancelledByCustomer,
                    ),
                }
            }

            AppointmentAction::ApplyEdit { customer, update } => {
                Self::apply_edit(state, env, &record, customer, update)
            }

            // Handled above
            AppointmentAction::Create { .. }
            | AppointmentAction::Created { .. }
            | AppointmentAction::StatusChanged { .. }
            | AppointmentAction::Edited { .. }
            | AppointmentAction::ValidationFailed { .. }
            | AppointmentAction::NotificationsDispatched { .. } => SmallVec::new(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::ServiceId;
    use garage_core::effect::execute;
    use garage_testing::{assertions, test_clock, ReducerTest};
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingNotifier {
        events: Mutex<Vec<AppointmentEvent>>,
    }

    impl AppointmentNotifier for RecordingNotifier {
        fn notify(
            &self,
            event: AppointmentEvent,
            _appointment: Appointment,
        ) -> Pin<Box<dyn Future<Output = FanOutReport> + Send + '_>> {
            self.events.lock().unwrap().push(event);
            Box::pin(async {
                FanOutReport {
                    delivered: 1,
                    failed: 0,
                }
            })
        }
    }

    fn env_with(scheduling: SchedulingConfig) -> AppointmentEnvironment {
        AppointmentEnvironment::new(
            Arc::new(test_clock()),
            Arc::new(RecordingNotifier::default()),
            scheduling,
        )
    }

    fn env() -> AppointmentEnvironment {
        env_with(SchedulingConfig {
            slot_labels: vec!["09:00-10:00".to_string(), "10:00-11:00".to_string()],
            booked_slots_include_completed: true,
            assign_requires_confirmed: false,
            allow_past_dates: false,
        })
    }

    fn booking() -> BookingRequest {
        BookingRequest {
            vehicle: Vehicle {
                vehicle_type: "Car".to_string(),
                brand: "Toyota".to_string(),
                model: "Corolla".to_string(),
                year: 2018,
                plate: "AB-123".to_string(),
                fuel_type: "Petrol".to_string(),
            },
            service: ServiceSelection {
                service_id: ServiceId::new(),
                category: "Maintenance".to_string(),
                service_type: "Oil change".to_string(),
            },
            additional_requirements: String::new(),
            date: NaiveDate::from_ymd_opt(2025, 1, 2).unwrap(),
            time_slot: "09:00-10:00".to_string(),
        }
    }

    fn record(status: AppointmentStatus) -> Appointment {
        let mut appointment = Appointment::book(
            AppointmentId::new(),
            UserId::new(),
            booking(),
            test_clock().now(),
        );
        appointment.status = status;
        appointment
    }

    fn admin() -> Actor {
        Actor::new(UserId::new(), Role::Admin)
    }

    #[test]
    fn create_books_a_pending_appointment() {
        let customer = UserId::new();
        ReducerTest::new(AppointmentReducer::new())
            .with_env(env())
            .given_state(AppointmentState::new())
            .when_action(AppointmentAction::Create {
                id: AppointmentId::new(),
                customer,
                booking: booking(),
            })
            .then_state(move |state| {
                let appointment = state.appointment.as_ref().unwrap();
                assert_eq!(appointment.status, AppointmentStatus::Pending);
                assert_eq!(appointment.customer_id, customer);
                assert_eq!(appointment.assigned_employee, None);
                assert!(state.last_error.is_none());
            })
            .then_effects(|effects| {
                assertions::assert_effects_count(effects, 1);
                assertions::assert_has_future_effect(effects);
            })
            .run();
    }

    #[test]
    fn create_rejects_bad_input() {
        let mut past = booking();
        past.date = NaiveDate::from_ymd_opt(2024, 12, 31).unwrap();
        let mut unknown_slot = booking();
        unknown_slot.time_slot = "23:00-24:00".to_string();
        let mut no_plate = booking();
        no_plate.vehicle.plate = "  ".to_string();
        let mut future_car = booking();
        future_car.vehicle.year = 2030;

        for bad in [past, unknown_slot, no_plate, future_car] {
            ReducerTest::new(AppointmentReducer::new())
                .with_env(env())
                .given_state(AppointmentState::new())
                .when_action(AppointmentAction::Create {
                    id: AppointmentId::new(),
                    customer: UserId::new(),
                    booking: bad,
                })
                .then_state(|state| {
                    assert!(state.appointment.is_none());
                    assert!(matches!(state.last_error, Some(GarageError::Validation(_))));
                })
                .then_effects(assertions::assert_no_effects)
                .run();
        }
    }

    #[test]
    fn past_dates_are_accepted_when_configured() {
        let mut past = booking();
        past.date = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let mut scheduling = env().scheduling;
        scheduling.allow_past_dates = true;

        ReducerTest::new(AppointmentReducer::new())
            .with_env(env_with(scheduling))
            .given_state(AppointmentState::new())
            .when_action(AppointmentAction::Create {
                id: AppointmentId::new(),
                customer: UserId::new(),
                booking: past,
            })
            .then_state(|state| assert!(state.appointment.is_some()))
            .run();
    }

    #[test]
    fn approve_only_from_pending() {
        ReducerTest::new(AppointmentReducer::new())
            .with_env(env())
            .given_state(AppointmentState::with(record(AppointmentStatus::Pending)))
            .when_action(AppointmentAction::Approve)
            .then_state(|state| assert_eq!(state.status(), Some(AppointmentStatus::Confirmed)))
            .then_effects(assertions::assert_has_future_effect)
            .run();

        ReducerTest::new(AppointmentReducer::new())
            .with_env(env())
            .given_state(AppointmentState::with(record(AppointmentStatus::Confirmed)))
            .when_action(AppointmentAction::Approve)
            .then_state(|state| {
                assert_eq!(state.status(), Some(AppointmentStatus::Confirmed));
                assert!(matches!(state.last_error, Some(GarageError::InvalidState(_))));
            })
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn reject_cancels_any_open_appointment() {
        ReducerTest::new(AppointmentReducer::new())
            .with_env(env())
            .given_state(AppointmentState::with(record(AppointmentStatus::Ready)))
            .when_action(AppointmentAction::Reject)
            .then_state(|state| assert_eq!(state.status(), Some(AppointmentStatus::Cancelled)))
            .then_effects(assertions::assert_has_future_effect)
            .run();
    }

    #[test]
    fn assign_starts_service_with_the_employee() {
        let employee = UserId::new();
        ReducerTest::new(AppointmentReducer::new())
            .with_env(env())
            .given_state(AppointmentState::with(record(AppointmentStatus::Pending)))
            .when_action(AppointmentAction::AssignEmployee { employee })
            .then_state(move |state| {
                let appointment = state.appointment.as_ref().unwrap();
                assert_eq!(appointment.status, AppointmentStatus::InService);
                assert_eq!(appointment.assigned_employee, Some(employee));
            })
            .then_effects(|effects| assertions::assert_effects_count(effects, 1))
            .run();
    }

    #[test]
    fn assign_can_require_confirmation() {
        let mut scheduling = env().scheduling;
        scheduling.assign_requires_confirmed = true;

        ReducerTest::new(AppointmentReducer::new())
            .with_env(env_with(scheduling))
            .given_state(AppointmentState::with(record(AppointmentStatus::Pending)))
            .when_action(AppointmentAction::AssignEmployee {
                employee: UserId::new(),
            })
            .then_state(|state| {
                assert_eq!(state.status(), Some(AppointmentStatus::Pending));
                assert!(matches!(state.last_error, Some(GarageError::InvalidState(_))));
            })
            .run();
    }

    #[test]
    fn set_status_to_current_is_a_silent_noop() {
        ReducerTest::new(AppointmentReducer::new())
            .with_env(env())
            .given_state(AppointmentState::with(record(AppointmentStatus::Confirmed)))
            .when_action(AppointmentAction::SetStatus {
                status: AppointmentStatus::Confirmed,
                actor: admin(),
            })
            .then_state(|state| {
                assert_eq!(state.status(), Some(AppointmentStatus::Confirmed));
                assert!(state.last_error.is_none());
            })
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn set_status_follows_edges_only() {
        ReducerTest::new(AppointmentReducer::new())
            .with_env(env())
            .given_state(AppointmentState::with(record(AppointmentStatus::Pending)))
            .when_action(AppointmentAction::SetStatus {
                status: AppointmentStatus::Ready,
                actor: admin(),
            })
            .then_state(|state| {
                assert_eq!(state.status(), Some(AppointmentStatus::Pending));
                assert!(matches!(state.last_error, Some(GarageError::InvalidState(_))));
            })
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn customers_cannot_set_status() {
        ReducerTest::new(AppointmentReducer::new())
            .with_env(env())
            .given_state(AppointmentState::with(record(AppointmentStatus::Confirmed)))
            .when_action(AppointmentAction::SetStatus {
                status: AppointmentStatus::Cancelled,
                actor: Actor::new(UserId::new(), Role::Customer),
            })
            .then_state(|state| {
                assert!(matches!(state.last_error, Some(GarageError::Forbidden(_))));
            })
            .run();
    }

    #[test]
    fn employee_starting_service_becomes_assignee() {
        let employee = Actor::new(UserId::new(), Role::Employee);
        ReducerTest::new(AppointmentReducer::new())
            .with_env(env())
            .given_state(AppointmentState::with(record(AppointmentStatus::Confirmed)))
            .when_action(AppointmentAction::SetStatus {
                status: AppointmentStatus::InService,
                actor: employee,
            })
            .then_state(move |state| {
                let appointment = state.appointment.as_ref().unwrap();
                assert_eq!(appointment.status, AppointmentStatus::InService);
                assert_eq!(appointment.assigned_employee, Some(employee.id));
            })
            .run();
    }

    #[test]
    fn admin_cannot_start_unassigned_service() {
        ReducerTest::new(AppointmentReducer::new())
            .with_env(env())
            .given_state(AppointmentState::with(record(AppointmentStatus::Confirmed)))
            .when_action(AppointmentAction::SetStatus {
                status: AppointmentStatus::InService,
                actor: admin(),
            })
            .then_state(|state| {
                assert_eq!(state.status(), Some(AppointmentStatus::Confirmed));
                assert!(matches!(state.last_error, Some(GarageError::InvalidState(_))));
            })
            .run();
    }

    #[test]
    fn other_employees_cannot_move_an_assigned_appointment() {
        let mut assigned = record(AppointmentStatus::InService);
        assigned.assigned_employee = Some(UserId::new());

        ReducerTest::new(AppointmentReducer::new())
            .with_env(env())
            .given_state(AppointmentState::with(assigned))
            .when_action(AppointmentAction::SetStatus {
                status: AppointmentStatus::Ready,
                actor: Actor::new(UserId::new(), Role::Employee),
            })
            .then_state(|state| {
                assert!(matches!(state.last_error, Some(GarageError::Forbidden(_))));
            })
            .run();
    }

    #[test]
    fn owner_cancel_rules() {
        let open = record(AppointmentStatus::Confirmed);
        let owner = open.customer_id;
        ReducerTest::new(AppointmentReducer::new())
            .with_env(env())
            .given_state(AppointmentState::with(open))
            .when_action(AppointmentAction::Cancel { customer: owner })
            .then_state(|state| assert_eq!(state.status(), Some(AppointmentStatus::Cancelled)))
            .then_effects(assertions::assert_has_future_effect)
            .run();

        for (status, message) in [
            (AppointmentStatus::Completed, "Completed appointments cannot be cancelled"),
            (AppointmentStatus::Cancelled, "Appointment is already cancelled"),
        ] {
            let done = record(status);
            let owner = done.customer_id;
            ReducerTest::new(AppointmentReducer::new())
                .with_env(env())
                .given_state(AppointmentState::with(done))
                .when_action(AppointmentAction::Cancel { customer: owner })
                .then_state(move |state| {
                    assert_eq!(state.status(), Some(status));
                    assert_eq!(
                        state.last_error,
                        Some(GarageError::InvalidState(message.to_string()))
                    );
                })
                .then_effects(assertions::assert_no_effects)
                .run();
        }

        ReducerTest::new(AppointmentReducer::new())
            .with_env(env())
            .given_state(AppointmentState::with(record(AppointmentStatus::Pending)))
            .when_action(AppointmentAction::Cancel {
                customer: UserId::new(),
            })
            .then_state(|state| {
                assert!(matches!(state.last_error, Some(GarageError::Forbidden(_))));
            })
            .run();
    }

    #[test]
    fn edit_changes_only_given_fields() {
        let open = record(AppointmentStatus::Confirmed);
        let owner = open.customer_id;
        let service = open.service.clone();
        let new_date = NaiveDate::from_ymd_opt(2025, 1, 5).unwrap();

        ReducerTest::new(AppointmentReducer::new())
            .with_env(env())
            .given_state(AppointmentState::with(open))
            .when_action(AppointmentAction::ApplyEdit {
                customer: owner,
                update: AppointmentUpdate {
                    date: Some(new_date),
                    time_slot: Some("10:00-11:00".to_string()),
                    ..AppointmentUpdate::default()
                },
            })
            .then_state(move |state| {
                let appointment = state.appointment.as_ref().unwrap();
                assert_eq!(appointment.appointment_date, new_date);
                assert_eq!(appointment.time_slot, "10:00-11:00");
                assert_eq!(appointment.service, service);
            })
            .then_effects(assertions::assert_has_future_effect)
            .run();
    }

    #[test]
    fn edit_refused_once_service_started() {
        let started = record(AppointmentStatus::InService);
        let owner = started.customer_id;
        ReducerTest::new(AppointmentReducer::new())
            .with_env(env())
            .given_state(AppointmentState::with(started))
            .when_action(AppointmentAction::ApplyEdit {
                customer: owner,
                update: AppointmentUpdate::default(),
            })
            .then_state(|state| {
                assert!(matches!(state.last_error, Some(GarageError::InvalidState(_))));
            })
            .run();
    }

    #[test]
    fn replayed_history_drives_the_lifecycle() {
        let employee = UserId::new();
        ReducerTest::new(AppointmentReducer::new())
            .with_env(env())
            .given_state(AppointmentState::with(record(AppointmentStatus::Pending)))
            .given_actions([
                AppointmentAction::Approve,
                AppointmentAction::AssignEmployee { employee },
                AppointmentAction::SetStatus {
                    status: AppointmentStatus::Ready,
                    actor: Actor::new(employee, Role::Employee),
                },
            ])
            .when_action(AppointmentAction::SetStatus {
                status: AppointmentStatus::Completed,
                actor: admin(),
            })
            .then_state(|state| assert_eq!(state.status(), Some(AppointmentStatus::Completed)))
            .then_effects(|effects| assertions::assert_effects_count(effects, 1))
            .run();
    }

    #[tokio::test]
    async fn notification_effect_reports_back() {
        let notifier = Arc::new(RecordingNotifier::default());
        let env = AppointmentEnvironment::new(Arc::new(test_clock()), notifier.clone(), env().scheduling);
        let mut state = AppointmentState::with(record(AppointmentStatus::Pending));

        let effects = AppointmentReducer::new().reduce(&mut state, AppointmentAction::Approve, &env);
        let feedback = execute(effects).await;

        assert_eq!(notifier.events.lock().unwrap().as_slice(), &[AppointmentEvent::Confirmed]);
        assert!(matches!(
            feedback.as_slice(),
            [AppointmentAction::NotificationsDispatched { report }] if report.delivered == 1
        ));
    }
}
