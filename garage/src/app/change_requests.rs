//! Change-request service: submit, adjudicate and query modification requests.

use crate::aggregates::change_request::{
    ChangeRequestAction, ChangeRequestEnvironment, ChangeRequestReducer, ChangeRequestState,
};
use crate::error::GarageError;
use crate::locks::RecordLocks;
use crate::store::{AppointmentStore, ChangeRequestFilter, ChangeRequestStore};
use crate::metrics;
use crate::types::{
    Appointment, AppointmentId, ChangeRequest, ChangeRequestId, ChangeRequestStatus, UserId,
};
use garage_core::effect::{execute, Effect};
use garage_core::reducer::Reducer;
use garage_core::SmallVec;
use std::sync::Arc;
use tracing::{debug, info, warn};

type Effects = SmallVec<[Effect<ChangeRequestAction>; 4]>;

/// Command handler for change requests.
///
/// Every command on one appointment's requests runs under that appointment's
/// record lock, the same lock the appointment service takes for status
/// changes and edits. Two concurrent submissions can never both become
/// PENDING, and a submission never races a cancellation.
pub struct ChangeRequestService {
    requests: Arc<dyn ChangeRequestStore>,
    appointments: Arc<dyn AppointmentStore>,
    reducer: ChangeRequestReducer,
    env: ChangeRequestEnvironment,
    locks: Arc<RecordLocks<AppointmentId>>,
}

impl ChangeRequestService {
    /// Create a new change-request service.
    ///
    /// `locks` must be the appointment record locks shared with the
    /// [`AppointmentService`](super::AppointmentService).
    #[must_use]
    pub fn new(
        requests: Arc<dyn ChangeRequestStore>,
        appointments: Arc<dyn AppointmentStore>,
        locks: Arc<RecordLocks<AppointmentId>>,
        env: ChangeRequestEnvironment,
    ) -> Self {
        Self {
            requests,
            appointments,
            reducer: ChangeRequestReducer::new(),
            env,
            locks,
        }
    }

    /// Appointment record locks shared with the appointment service
    #[must_use]
    pub fn record_locks(&self) -> &Arc<RecordLocks<AppointmentId>> {
        &self.locks
    }

    async fn run_effects(effects: Effects) {
        for feedback in execute(effects).await {
            debug!(action = ?feedback, "Change request effect fed back");
        }
    }

    async fn appointment(&self, id: AppointmentId) -> Result<Appointment, GarageError> {
        self.appointments
            .get(id)
            .await?
            .ok_or_else(|| GarageError::not_found("Appointment", id))
    }

    async fn history(&self, appointment_id: AppointmentId) -> Result<ChangeRequestState, GarageError> {
        let history = self
            .requests
            .find(ChangeRequestFilter::Appointment(appointment_id))
            .await?;
        Ok(ChangeRequestState::new(appointment_id, history))
    }

    /// Ask to modify an appointment.
    ///
    /// # Errors
    ///
    /// - [`GarageError::NotFound`] for an unknown appointment
    /// - [`GarageError::Forbidden`] if `customer` does not own it
    /// - [`GarageError::InvalidState`] unless it is PENDING or CONFIRMED
    /// - [`GarageError::Conflict`] if a request is already pending
    /// - [`GarageError::Validation`] for an empty reason
    pub async fn submit(
        &self,
        appointment_id: AppointmentId,
        customer: UserId,
        reason: &str,
    ) -> Result<ChangeRequest, GarageError> {
        let guard = self.locks.lock(&appointment_id).await;
        let appointment = self.appointment(appointment_id).await?;
        let mut state = self.history(appointment_id).await?;

        let id = ChangeRequestId::new();
        let effects = self.reducer.reduce(
            &mut state,
            ChangeRequestAction::Submit {
                id,
                customer,
                reason: reason.to_string(),
                owner: appointment.customer_id,
                appointment_status: appointment.status,
            },
            &self.env,
        );
        if let Some(error) = state.last_error.take() {
            warn!(appointment_id = %appointment_id, error = %error, "Change request refused");
            return Err(error);
        }

        let request = state
            .latest()
            .cloned()
            .ok_or_else(|| GarageError::not_found("Change request", id))?;
        self.requests.insert(request.clone()).await?;
        drop(guard);

        info!(appointment_id = %appointment_id, request_id = %id, "Change request submitted");
        Self::run_effects(effects).await;
        Ok(request)
    }

    /// Approve a pending request; the customer may then edit the appointment.
    ///
    /// # Errors
    ///
    /// [`GarageError::NotFound`] for an unknown request, or
    /// [`GarageError::InvalidState`] if it was already decided.
    pub async fn approve(
        &self,
        request_id: ChangeRequestId,
        note: Option<String>,
    ) -> Result<ChangeRequest, GarageError> {
        self.decide(request_id, ChangeRequestAction::Approve { request_id, note })
            .await
    }

    /// Reject a pending request.
    ///
    /// # Errors
    ///
    /// [`GarageError::NotFound`] for an unknown request, or
    /// [`GarageError::InvalidState`] if it was already decided.
    pub async fn reject(
        &self,
        request_id: ChangeRequestId,
        note: Option<String>,
    ) -> Result<ChangeRequest, GarageError> {
        self.decide(request_id, ChangeRequestAction::Reject { request_id, note })
            .await
    }

    async fn decide(
        &self,
        request_id: ChangeRequestId,
        action: ChangeRequestAction,
    ) -> Result<ChangeRequest, GarageError> {
        let appointment_id = self
            .requests
            .get(request_id)
            .await?
            .ok_or_else(|| GarageError::not_found("Change request", request_id))?
            .appointment_id;

        let guard = self.locks.lock(&appointment_id).await;
        let mut state = self.history(appointment_id).await?;
        let effects = self.reducer.reduce(&mut state, action, &self.env);
        if let Some(error) = state.last_error.take() {
            warn!(request_id = %request_id, error = %error, "Change request decision refused");
            return Err(error);
        }

        let decided = state
            .history
            .into_iter()
            .find(|r| r.id == request_id)
            .ok_or_else(|| GarageError::not_found("Change request", request_id))?;
        self.requests.update(decided.clone()).await?;
        drop(guard);

        metrics::record_change_request_decision(decided.status);
        info!(
            appointment_id = %appointment_id,
            request_id = %request_id,
            status = %decided.status,
            "Change request decided"
        );
        Self::run_effects(effects).await;
        Ok(decided)
    }

    /// Whether `customer` may edit the appointment now.
    ///
    /// Reads without the record lock; callers that act on the answer must
    /// hold [`Self::record_locks`] for the appointment.
    ///
    /// # Errors
    ///
    /// [`GarageError::Storage`] if requests cannot be listed.
    pub async fn can_edit(
        &self,
        appointment_id: AppointmentId,
        customer: UserId,
    ) -> Result<bool, GarageError> {
        Ok(self.history(appointment_id).await?.can_edit(customer))
    }

    async fn newest_first(&self, filter: ChangeRequestFilter) -> Result<Vec<ChangeRequest>, GarageError> {
        let mut requests = self.requests.find(filter).await?;
        requests.reverse();
        Ok(requests)
    }

    /// Requests submitted by a customer, newest first.
    ///
    /// # Errors
    ///
    /// [`GarageError::Storage`] on repository failure.
    pub async fn list_for_customer(&self, customer: UserId) -> Result<Vec<ChangeRequest>, GarageError> {
        self.newest_first(ChangeRequestFilter::Customer(customer)).await
    }

    /// Requests awaiting a decision, newest first.
    ///
    /// # Errors
    ///
    /// [`GarageError::Storage`] on repository failure.
    pub async fn list_pending(&self) -> Result<Vec<ChangeRequest>, GarageError> {
        self.newest_first(ChangeRequestFilter::Status(ChangeRequestStatus::Pending))
            .await
    }

    /// Every request, newest first.
    ///
    /// # Errors
    ///
    /// [`GarageError::Storage`] on repository failure.
    pub async fn list_all(&self) -> Result<Vec<ChangeRequest>, GarageError> {
        self.newest_first(ChangeRequestFilter::All).await
    }

    /// One appointment's requests, oldest first.
    ///
    /// # Errors
    ///
    /// [`GarageError::Storage`] on repository failure.
    pub async fn history_of(&self, appointment_id: AppointmentId) -> Result<Vec<ChangeRequest>, GarageError> {
        Ok(self.history(appointment_id).await?.history)
    }
}
