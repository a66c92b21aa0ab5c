//! Change requests for one appointment.
//!
//! The state is the appointment's full request history, oldest first. At most
//! one request is PENDING at a time; the customer may edit the appointment only
//! while the latest request is APPROVED.

use crate::error::{ConflictReason, GarageError};
use crate::types::{
    AppointmentId, AppointmentStatus, ChangeRequest, ChangeRequestId, ChangeRequestStatus, UserId,
};
use chrono::{DateTime, Utc};
use garage_core::{effect::Effect, environment::Clock, reducer::Reducer, SmallVec};
use std::sync::Arc;
use tracing::debug;

/// Actions for the change-request aggregate
#[derive(Clone, Debug)]
pub enum ChangeRequestAction {
    // Commands
    /// Customer asks to modify the appointment
    Submit {
        /// ID for the new request
        id: ChangeRequestId,
        /// Requesting customer
        customer: UserId,
        /// Why
        reason: String,
        /// Owner of the appointment
        owner: UserId,
        /// Appointment status at submission time
        appointment_status: AppointmentStatus,
    },

    /// Admin approves a pending request
    Approve {
        /// Request to decide
        request_id: ChangeRequestId,
        /// Optional admin note
        note: Option<String>,
    },

    /// Admin rejects a pending request
    Reject {
        /// Request to decide
        request_id: ChangeRequestId,
        /// Optional admin note
        note: Option<String>,
    },

    // Events
    /// Request recorded
    Submitted {
        /// The new request
        request: ChangeRequest,
    },

    /// Request decided
    Decided {
        /// Decided request
        request_id: ChangeRequestId,
        /// APPROVED or REJECTED
        status: ChangeRequestStatus,
        /// Admin note
        note: Option<String>,
        /// When
        at: DateTime<Utc>,
    },

    /// Command rejected
    ValidationFailed {
        /// Why
        error: GarageError,
    },
}

/// Request history of one appointment
#[derive(Clone, Debug)]
pub struct ChangeRequestState {
    /// The appointment
    pub appointment_id: AppointmentId,
    /// All requests, oldest first
    pub history: Vec<ChangeRequest>,
    /// Error of the last rejected command
    pub last_error: Option<GarageError>,
}

impl ChangeRequestState {
    /// History loaded from the store, oldest first
    #[must_use]
    pub fn new(appointment_id: AppointmentId, history: Vec<ChangeRequest>) -> Self {
        Self {
            appointment_id,
            history,
            last_error: None,
        }
    }

    /// The open request, if any
    #[must_use]
    pub fn pending(&self) -> Option<&ChangeRequest> {
        self.history
            .iter()
            .find(|r| r.status == ChangeRequestStatus::Pending)
    }

    /// Most recent request
    #[must_use]
    pub fn latest(&self) -> Option<&ChangeRequest> {
        self.history.last()
    }

    /// Whether `customer` may edit the appointment right now
    #[must_use]
    pub fn can_edit(&self, customer: UserId) -> bool {
        self.latest().is_some_and(|r| {
            r.status == ChangeRequestStatus::Approved && r.customer_id == customer
        })
    }

    fn find(&self, id: ChangeRequestId) -> Option<&ChangeRequest> {
        self.history.iter().find(|r| r.id == id)
    }
}

/// Environment dependencies for the change-request aggregate
#[derive(Clone)]
pub struct ChangeRequestEnvironment {
    /// Clock for timestamps
    pub clock: Arc<dyn Clock>,
}

impl ChangeRequestEnvironment {
    /// Creates a new `ChangeRequestEnvironment`
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

/// Reducer for the change-request aggregate
#[derive(Clone, Debug, Default)]
pub struct ChangeRequestReducer;

impl ChangeRequestReducer {
    /// Creates a new `ChangeRequestReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn apply_event(state: &mut ChangeRequestState, action: &ChangeRequestAction) {
        match action {
            ChangeRequestAction::Submitted { request } => {
                state.history.push(request.clone());
                state.last_error = None;
            }
            ChangeRequestAction::Decided {
                request_id,
                status,
                note,
                at,
            } => {
                if let Some(request) = state.history.iter_mut().find(|r| r.id == *request_id) {
                    request.status = *status;
                    request.admin_response.clone_from(note);
                    request.responded_at = Some(*at);
                }
                state.last_error = None;
            }
            ChangeRequestAction::ValidationFailed { error } => {
                state.last_error = Some(error.clone());
            }
            ChangeRequestAction::Submit { .. }
            | ChangeRequestAction::Approve { .. }
            | ChangeRequestAction::Reject { .. } => {}
        }
    }

    fn fail(state: &mut ChangeRequestState, error: GarageError) {
        debug!(appointment_id = %state.appointment_id, error = %error, "Change request command rejected");
        Self::apply_event(state, &ChangeRequestAction::ValidationFailed { error });
    }

    fn submit(
        state: &mut ChangeRequestState,
        env: &ChangeRequestEnvironment,
        id: ChangeRequestId,
        customer: UserId,
        reason: String,
        owner: UserId,
        appointment_status: AppointmentStatus,
    ) {
        if customer != owner {
            return Self::fail(
                state,
                GarageError::Forbidden(
                    "You can only request changes to your own appointments".to_string(),
                ),
            );
        }
        if !appointment_status.is_editable() {
            return Self::fail(
                state,
                GarageError::InvalidState(format!(
                    "Cannot request changes to appointments in {appointment_status} state"
                )),
            );
        }
        if state.pending().is_some() {
            return Self::fail(
                state,
                GarageError::conflict(
                    ConflictReason::PendingRequestExists,
                    "There is already a pending change request for this appointment",
                ),
            );
        }
        let reason = reason.trim().to_string();
        if reason.is_empty() {
            return Self::fail(
                state,
                GarageError::Validation("Reason must not be empty".to_string()),
            );
        }

        let request = ChangeRequest {
            id,
            appointment_id: state.appointment_id,
            customer_id: customer,
            reason,
            status: ChangeRequestStatus::Pending,
            admin_response: None,
            requested_at: env.clock.now(),
            responded_at: None,
        };
        Self::apply_event(state, &ChangeRequestAction::Submitted { request });
    }

    fn decide(
        state: &mut ChangeRequestState,
        env: &ChangeRequestEnvironment,
        request_id: ChangeRequestId,
        status: ChangeRequestStatus,
        note: Option<String>,
    ) {
        let Some(request) = state.find(request_id) else {
            return Self::fail(state, GarageError::not_found("Change request", request_id));
        };
        if request.status != ChangeRequestStatus::Pending {
            return Self::fail(
                state,
                GarageError::InvalidState("Request has already been processed".to_string()),
            );
        }
        Self::apply_event(
            state,
            &ChangeRequestAction::Decided {
                request_id,
                status,
                note: note.filter(|n| !n.trim().is_empty()),
                at: env.clock.now(),
            },
        );
    }
}

impl Reducer for ChangeRequestReducer {
    type State = ChangeRequestState;
    type Action = ChangeRequestAction;
    type Environment = ChangeRequestEnvironment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            ChangeRequestAction::Submit {
                id,
                customer,
                reason,
                owner,
                appointment_status,
            } => Self::submit(state, env, id, customer, reason, owner, appointment_status),
            ChangeRequestAction::Approve { request_id, note } => {
                Self::decide(state, env, request_id, ChangeRequestStatus::Approved, note);
            }
            ChangeRequestAction::Reject { request_id, note } => {
                Self::decide(state, env, request_id, ChangeRequestStatus::Rejected, note);
            }
            event @ (ChangeRequestAction::Submitted { .. }
            | ChangeRequestAction::Decided { .. }
            | ChangeRequestAction::ValidationFailed { .. }) => Self::apply_event(state, &event),
        }
        SmallVec::new()
    }
}
