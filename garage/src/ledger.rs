//! Capacity ledger: daily slots per catalog service and booked time slots per date.
//!
//! Every write to a service row happens under that service's exclusive lock, so
//! concurrent `reserve`/`release`/`reset_all` calls never lose an update and
//! `0 <= available_slots <= max_daily_slots` holds at all times.
//!
//! Exhaustion is an ordinary outcome ([`Reservation::Exhausted`]), not an error.

use crate::error::GarageError;
use crate::locks::RecordLocks;
use crate::store::{AppointmentFilter, AppointmentStore, ServiceCapacityStore};
use crate::types::{AppointmentStatus, DeactivationReason, ServiceCapacity, ServiceId};
use chrono::NaiveDate;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of [`CapacityLedger::reserve`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reservation {
    /// One slot taken
    Reserved {
        /// Slots left after this reservation
        remaining: u32,
    },
    /// No daily slot left
    Exhausted,
    /// Service switched off by an admin
    Inactive,
}

/// Knobs of the ledger
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LedgerPolicy {
    /// COMPLETED appointments keep their slot in `booked_slots`
    pub include_completed: bool,
    /// `reset_all` also re-enables manually deactivated services
    pub reactivate_manual: bool,
}

impl Default for LedgerPolicy {
    fn default() -> Self {
        Self {
            include_completed: true,
            reactivate_manual: false,
        }
    }
}

/// What a `reset_all` run changed
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Services visited
    pub services: usize,
    /// Services that were re-activated
    pub reactivated: usize,
}

/// Daily capacity accounting and service catalog
pub struct CapacityLedger {
    services: Arc<dyn ServiceCapacityStore>,
    appointments: Arc<dyn AppointmentStore>,
    locks: RecordLocks<ServiceId>,
    policy: LedgerPolicy,
}

impl CapacityLedger {
    /// Create a ledger over the given stores
    #[must_use]
    pub fn new(
        services: Arc<dyn ServiceCapacityStore>,
        appointments: Arc<dyn AppointmentStore>,
        policy: LedgerPolicy,
    ) -> Self {
        Self {
            services,
            appointments,
            locks: RecordLocks::new(),
            policy,
        }
    }

    async fn load(&self, id: ServiceId) -> Result<ServiceCapacity, GarageError> {
        self.services
            .get(id)
            .await?
            .ok_or_else(|| GarageError::not_found("Service", id))
    }

    /// Take one daily slot of a service.
    ///
    /// Taking the last slot deactivates the service until a release or the
    /// next sweep.
    ///
    /// # Errors
    ///
    /// Returns [`GarageError::NotFound`] for an unknown service, or
    /// [`GarageError::Storage`] if the catalog cannot be read or written.
    pub async fn reserve(&self, id: ServiceId) -> Result<Reservation, GarageError> {
        let _guard = self.locks.lock(&id).await;
        let mut service = self.load(id).await?;

        if service.available_slots == 0 {
            debug!(service_id = %id, "No daily slots left");
            return Ok(Reservation::Exhausted);
        }
        if !service.is_active {
            debug!(service_id = %id, reason = ?service.deactivation, "Service inactive");
            return Ok(Reservation::Inactive);
        }

        service.available_slots -= 1;
        if service.available_slots == 0 {
            service.deactivate(DeactivationReason::Exhausted);
            info!(service_id = %id, name = %service.name, "Service exhausted for today");
        }
        let remaining = service.available_slots;
        self.services.update(service).await?;
        Ok(Reservation::Reserved { remaining })
    }

    /// Give one daily slot back.
    ///
    /// Returns the slots available afterwards, never more than the maximum.
    ///
    /// # Errors
    ///
    /// Returns [`GarageError::NotFound`] for an unknown service, or
    /// [`GarageError::Storage`] on catalog failure.
    pub async fn release(&self, id: ServiceId) -> Result<u32, GarageError> {
        let _guard = self.locks.lock(&id).await;
        let mut service = self.load(id).await?;

        service.available_slots = (service.available_slots + 1).min(service.max_daily_slots);
        if service.deactivation == Some(DeactivationReason::Exhausted) && service.available_slots > 0 {
            service.reactivate();
        }
        let available = service.available_slots;
        self.services.update(service).await?;
        debug!(service_id = %id, available, "Slot released");
        Ok(available)
    }

    /// Restore every service to its full daily capacity.
    ///
    /// Services deactivated for exhaustion become active again; manually
    /// deactivated ones only when the policy says so.
    ///
    /// # Errors
    ///
    /// Returns [`GarageError::Storage`] on catalog failure. Services reset
    /// before the failure stay reset.
    pub async fn reset_all(&self) -> Result<SweepReport, GarageError> {
        let mut report = SweepReport::default();

        for listed in self.services.list().await? {
            let _guard = self.locks.lock(&listed.id).await;
            // Re-read under the lock; the listed row may be stale
            let Some(mut service) = self.services.get(listed.id).await? else {
                continue;
            };

            service.available_slots = service.max_daily_slots;
            let reactivate = match service.deactivation {
                Some(DeactivationReason::Exhausted) => true,
                Some(DeactivationReason::Manual) => self.policy.reactivate_manual,
                None => false,
            };
            if reactivate && service.max_daily_slots > 0 {
                service.reactivate();
                report.reactivated += 1;
            }
            self.services.update(service).await?;
            report.services += 1;
        }

        info!(
            services = report.services,
            reactivated = report.reactivated,
            "Daily capacity reset"
        );
        Ok(report)
    }

    /// Time slots already used on `date`.
    ///
    /// CANCELLED appointments never hold a slot; COMPLETED ones do unless the
    /// policy excludes them.
    ///
    /// # Errors
    ///
    /// Returns [`GarageError::Storage`] if appointments cannot be listed.
    pub async fn booked_slots(&self, date: NaiveDate) -> Result<BTreeSet<String>, GarageError> {
        Ok(self
            .appointments
            .find(AppointmentFilter::Date(date))
            .await?
            .into_iter()
            .filter(|appointment| match appointment.status {
                AppointmentStatus::Cancelled => false,
                AppointmentStatus::Completed => self.policy.include_completed,
                _ => true,
            })
            .map(|appointment| appointment.time_slot)
            .collect())
    }

    // ========================================================================
    // Catalog
    // ========================================================================

    /// Add a service to the catalog.
    ///
    /// # Errors
    ///
    /// Returns [`GarageError::Validation`] for an empty name, or
    /// [`GarageError::Storage`] on catalog failure.
    pub async fn register_service(
        &self,
        name: &str,
        category: &str,
        max_daily_slots: u32,
    ) -> Result<ServiceCapacity, GarageError> {
        if name.trim().is_empty() {
            return Err(GarageError::Validation("Service name must not be empty".to_string()));
        }
        let service = ServiceCapacity::new(name.trim(), category.trim(), max_daily_slots);
        self.services.insert(service.clone()).await?;
        info!(service_id = %service.id, name = %service.name, max_daily_slots, "Service registered");
        Ok(service)
    }

    /// Change the daily maximum, keeping today's bookings counted.
    ///
    /// # Errors
    ///
    /// Returns [`GarageError::NotFound`] for an unknown service, or
    /// [`GarageError::Storage`] on catalog failure.
    pub async fn update_max_slots(
        &self,
        id: ServiceId,
        max_daily_slots: u32,
    ) -> Result<ServiceCapacity, GarageError> {
        let _guard = self.locks.lock(&id).await;
        let mut service = self.load(id).await?;

        let booked = service.booked();
        service.max_daily_slots = max_daily_slots;
        service.available_slots = max_daily_slots.saturating_sub(booked);
        match service.deactivation {
            None if service.available_slots == 0 => {
                service.deactivate(DeactivationReason::Exhausted);
            }
            Some(DeactivationReason::Exhausted) if service.available_slots > 0 => {
                service.reactivate();
            }
            _ => {}
        }

        self.services.update(service.clone()).await?;
        info!(service_id = %id, max_daily_slots, available = service.available_slots, "Service capacity changed");
        Ok(service)
    }

    /// Switch a service on with a full day of slots.
    ///
    /// # Errors
    ///
    /// Returns [`GarageError::NotFound`] for an unknown service, or
    /// [`GarageError::Storage`] on catalog failure.
    pub async fn activate(&self, id: ServiceId) -> Result<ServiceCapacity, GarageError> {
        let _guard = self.locks.lock(&id).await;
        let mut service = self.load(id).await?;

        service.available_slots = service.max_daily_slots;
        if service.max_daily_slots > 0 {
            service.reactivate();
        } else {
            warn!(service_id = %id, "Activating a service with no daily slots");
            service.deactivate(DeactivationReason::Exhausted);
        }
        self.services.update(service.clone()).await?;
        info!(service_id = %id, "Service activated");
        Ok(service)
    }

    /// Switch a service off until an admin activates it again.
    ///
    /// # Errors
    ///
    /// Returns [`GarageError::NotFound`] for an unknown service, or
    /// [`GarageError::Storage`] on catalog failure.
    pub async fn deactivate(&self, id: ServiceId) -> Result<ServiceCapacity, GarageError> {
        let _guard = self.locks.lock(&id).await;
        let mut service = self.load(id).await?;

        service.deactivate(DeactivationReason::Manual);
        self.services.update(service.clone()).await?;
        info!(service_id = %id, "Service deactivated");
        Ok(service)
    }

    /// Load one service.
    ///
    /// # Errors
    ///
    /// Returns [`GarageError::NotFound`] for an unknown service.
    pub async fn get(&self, id: ServiceId) -> Result<ServiceCapacity, GarageError> {
        self.load(id).await
    }

    /// The whole catalog, ordered by name.
    ///
    /// # Errors
    ///
    /// Returns [`GarageError::Storage`] on catalog failure.
    pub async fn list(&self) -> Result<Vec<ServiceCapacity>, GarageError> {
        Ok(self.services.list().await?)
    }
}
