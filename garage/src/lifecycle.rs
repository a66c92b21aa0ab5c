//! Application lifecycle: wiring, background sweep and graceful shutdown.
//!
//! [`GarageBuilder`] wires stores, directory, push channel and clock into the
//! ledger, dispatcher and services. Anything not supplied falls back to the
//! in-memory implementations and the system clock.
//!
//! ```rust,ignore
//! let directory = Arc::new(InMemoryDirectory::new());
//! let mut garage = GarageBuilder::new()
//!     .with_config(Config::from_env())
//!     .with_directory(directory.clone())
//!     .build();
//!
//! garage.start();
//! // ...
//! garage.shutdown().await;
//! ```

use crate::aggregates::appointment::AppointmentEnvironment;
use crate::aggregates::change_request::ChangeRequestEnvironment;
use crate::app::{AppointmentService, ChangeRequestService};
use crate::config::Config;
use crate::directory::{InMemoryDirectory, UserDirectory};
use crate::ledger::{CapacityLedger, LedgerPolicy};
use crate::locks::RecordLocks;
use crate::notifications::{NotificationDispatcher, NotificationRouter};
use crate::scheduler::DailySweep;
use crate::store::{
    AppointmentStore, ChangeRequestStore, InMemoryAppointmentStore, InMemoryChangeRequestStore,
    InMemoryNotificationStore, InMemoryServiceStore, NotificationStore, ServiceCapacityStore,
};
use garage_core::environment::{Clock, SystemClock};
use garage_core::push::{BroadcastPushChannel, PushChannel};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Builder for a fully wired [`Garage`]
#[derive(Default)]
pub struct GarageBuilder {
    config: Option<Config>,
    clock: Option<Arc<dyn Clock>>,
    directory: Option<Arc<dyn UserDirectory>>,
    push: Option<Arc<dyn PushChannel>>,
    appointments: Option<Arc<dyn AppointmentStore>>,
    change_requests: Option<Arc<dyn ChangeRequestStore>>,
    notifications: Option<Arc<dyn NotificationStore>>,
    services: Option<Arc<dyn ServiceCapacityStore>>,
}

impl GarageBuilder {
    /// Start with every component defaulted
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use this configuration instead of [`Config::default`]
    #[must_use]
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Use this clock instead of the system clock
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Identity lookup and admin roster
    #[must_use]
    pub fn with_directory(mut self, directory: Arc<dyn UserDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    /// Live push transport
    #[must_use]
    pub fn with_push_channel(mut self, push: Arc<dyn PushChannel>) -> Self {
        self.push = Some(push);
        self
    }

    /// Appointment repository
    #[must_use]
    pub fn with_appointment_store(mut self, store: Arc<dyn AppointmentStore>) -> Self {
        self.appointments = Some(store);
        self
    }

    /// Change-request repository
    #[must_use]
    pub fn with_change_request_store(mut self, store: Arc<dyn ChangeRequestStore>) -> Self {
        self.change_requests = Some(store);
        self
    }

    /// Notification repository
    #[must_use]
    pub fn with_notification_store(mut self, store: Arc<dyn NotificationStore>) -> Self {
        self.notifications = Some(store);
        self
    }

    /// Service catalog repository
    #[must_use]
    pub fn with_service_store(mut self, store: Arc<dyn ServiceCapacityStore>) -> Self {
        self.services = Some(store);
        self
    }

    /// Wire everything together
    #[must_use]
    pub fn build(self) -> Garage {
        let config = self.config.unwrap_or_default();
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let directory = self
            .directory
            .unwrap_or_else(|| Arc::new(InMemoryDirectory::new()));
        let push = self.push.unwrap_or_else(|| {
            Arc::new(BroadcastPushChannel::new(
                config.notifications.push_channel_capacity,
            ))
        });
        let appointments = self
            .appointments
            .unwrap_or_else(|| Arc::new(InMemoryAppointmentStore::new()));
        let change_request_store = self
            .change_requests
            .unwrap_or_else(|| Arc::new(InMemoryChangeRequestStore::new()));
        let notifications = self
            .notifications
            .unwrap_or_else(|| Arc::new(InMemoryNotificationStore::new()));
        let services = self
            .services
            .unwrap_or_else(|| Arc::new(InMemoryServiceStore::new()));

        let ledger = Arc::new(CapacityLedger::new(
            services,
            Arc::clone(&appointments),
            LedgerPolicy {
                include_completed: config.scheduling.booked_slots_include_completed,
                reactivate_manual: config.sweep.reactivate_manual,
            },
        ));
        let dispatcher = Arc::new(NotificationDispatcher::new(
            notifications,
            Arc::clone(&directory),
            push,
            Arc::clone(&clock),
            config.notifications.push_timeout(),
        ));
        let notifier = Arc::new(NotificationRouter::new(
            Arc::clone(&dispatcher),
            Arc::clone(&directory),
        ));
        // One lock per appointment, shared by both services
        let records = Arc::new(RecordLocks::new());
        let change_requests = Arc::new(ChangeRequestService::new(
            change_request_store,
            Arc::clone(&appointments),
            records,
            ChangeRequestEnvironment::new(Arc::clone(&clock)),
        ));
        let appointment_service = Arc::new(AppointmentService::new(
            appointments,
            directory,
            Arc::clone(&ledger),
            Arc::clone(&change_requests),
            AppointmentEnvironment::new(Arc::clone(&clock), notifier, config.scheduling.clone()),
        ));
        let sweep = Arc::new(DailySweep::new(
            Arc::clone(&ledger),
            clock,
            config.sweep.utc_offset_minutes,
        ));
        let (shutdown_tx, _) = broadcast::channel(1);

        info!(
            slots = config.scheduling.slot_labels.len(),
            sweep_enabled = config.sweep.enabled,
            "Garage wired"
        );
        Garage {
            config,
            ledger,
            dispatcher,
            appointments: appointment_service,
            change_requests,
            sweep,
            shutdown_tx,
            tasks: Vec::new(),
        }
    }
}

/// The running garage: one instance per process, holding every component
pub struct Garage {
    config: Config,
    ledger: Arc<CapacityLedger>,
    dispatcher: Arc<NotificationDispatcher>,
    appointments: Arc<AppointmentService>,
    change_requests: Arc<ChangeRequestService>,
    sweep: Arc<DailySweep>,
    shutdown_tx: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
}

impl Garage {
    /// Shorthand for [`GarageBuilder::new`]
    #[must_use]
    pub fn builder() -> GarageBuilder {
        GarageBuilder::new()
    }

    /// Spawn background tasks (the daily sweep, when enabled).
    ///
    /// Must be called from inside a tokio runtime.
    pub fn start(&mut self) {
        if !self.config.sweep.enabled {
            info!("Daily sweep disabled");
            return;
        }
        if !self.tasks.is_empty() {
            warn!("Garage already started");
            return;
        }
        let sweep = Arc::clone(&self.sweep);
        self.tasks
            .push(tokio::spawn(sweep.run(self.shutdown_tx.subscribe())));
    }

    /// Signal background tasks to stop and wait for them.
    ///
    /// Each task gets `SHUTDOWN_TIMEOUT` seconds before it is abandoned.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        let timeout = self.config.sweep.shutdown_timeout();

        for (idx, handle) in self.tasks.into_iter().enumerate() {
            match tokio::time::timeout(timeout, handle).await {
                Ok(Ok(())) => info!(task = idx, "Background task stopped gracefully"),
                Ok(Err(e)) => warn!(task = idx, error = %e, "Background task failed"),
                Err(_) => warn!(task = idx, "Background task shutdown timed out"),
            }
        }
        info!("Garage shut down");
    }

    /// Active configuration
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Capacity ledger and service catalog
    #[must_use]
    pub fn ledger(&self) -> &Arc<CapacityLedger> {
        &self.ledger
    }

    /// Inbox and push delivery
    #[must_use]
    pub fn notifications(&self) -> &Arc<NotificationDispatcher> {
        &self.dispatcher
    }

    /// Appointment commands and queries
    #[must_use]
    pub fn appointments(&self) -> &Arc<AppointmentService> {
        &self.appointments
    }

    /// Change-request commands and queries
    #[must_use]
    pub fn change_requests(&self) -> &Arc<ChangeRequestService> {
        &self.change_requests
    }

    /// The daily sweep, for running it by hand
    #[must_use]
    pub fn sweep(&self) -> &Arc<DailySweep> {
        &self.sweep
    }

    /// Number of spawned background tasks
    #[must_use]
    pub fn running_tasks(&self) -> usize {
        self.tasks.len()
    }
}
