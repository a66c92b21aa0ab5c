//! Persistence seams for the four garage entities.
//!
//! Each repository trait is dyn-compatible (explicit `Pin<Box<dyn Future>>`
//! returns) so the services can hold them as `Arc<dyn ...>`. The in-memory
//! implementations back the demo binary and the test suite.
//!
//! Repositories are plain row stores: they enforce uniqueness of ids and
//! nothing else. Read-modify-write atomicity is the caller's job (see
//! [`crate::locks::RecordLocks`]).

use crate::types::{
    Appointment, AppointmentId, ChangeRequest, ChangeRequestId, ChangeRequestStatus, Notification,
    NotificationId, ServiceCapacity, ServiceId, UserId,
};
use chrono::NaiveDate;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use tokio::sync::RwLock;

/// Errors that can occur in a repository
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Insert with an id that already exists
    #[error("{entity} {id} already exists")]
    Duplicate {
        /// Entity kind
        entity: &'static str,
        /// Conflicting id
        id: String,
    },

    /// Update or delete of a row that does not exist
    #[error("{entity} {id} is missing")]
    Missing {
        /// Entity kind
        entity: &'static str,
        /// Missing id
        id: String,
    },

    /// Backend unavailable or failed
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Boxed future returned by every repository method
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Predicate for listing appointments
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AppointmentFilter {
    /// Every appointment
    All,
    /// Appointments owned by a customer
    Customer(UserId),
    /// Appointments assigned to an employee
    Employee(UserId),
    /// Appointments on a date
    Date(NaiveDate),
}

impl AppointmentFilter {
    /// Whether `appointment` matches
    #[must_use]
    pub fn matches(&self, appointment: &Appointment) -> bool {
        match self {
            Self::All => true,
            Self::Customer(id) => appointment.customer_id == *id,
            Self::Employee(id) => appointment.assigned_employee == Some(*id),
            Self::Date(date) => appointment.appointment_date == *date,
        }
    }
}

/// Predicate for listing change requests
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeRequestFilter {
    /// Every request
    All,
    /// Requests about one appointment
    Appointment(AppointmentId),
    /// Requests submitted by a customer
    Customer(UserId),
    /// Requests in a status
    Status(ChangeRequestStatus),
}

impl ChangeRequestFilter {
    /// Whether `request` matches
    #[must_use]
    pub fn matches(&self, request: &ChangeRequest) -> bool {
        match self {
            Self::All => true,
            Self::Appointment(id) => request.appointment_id == *id,
            Self::Customer(id) => request.customer_id == *id,
            Self::Status(status) => request.status == *status,
        }
    }
}

/// Appointment repository
pub trait AppointmentStore: Send + Sync {
    /// Persist a new appointment
    fn insert(&self, appointment: Appointment) -> StoreFuture<'_, ()>;
    /// Overwrite an existing appointment
    fn update(&self, appointment: Appointment) -> StoreFuture<'_, ()>;
    /// Load one appointment
    fn get(&self, id: AppointmentId) -> StoreFuture<'_, Option<Appointment>>;
    /// List appointments matching a filter, in no particular order
    fn find(&self, filter: AppointmentFilter) -> StoreFuture<'_, Vec<Appointment>>;
}

/// Change-request repository
pub trait ChangeRequestStore: Send + Sync {
    /// Persist a new request
    fn insert(&self, request: ChangeRequest) -> StoreFuture<'_, ()>;
    /// Overwrite an existing request
    fn update(&self, request: ChangeRequest) -> StoreFuture<'_, ()>;
    /// Load one request
    fn get(&self, id: ChangeRequestId) -> StoreFuture<'_, Option<ChangeRequest>>;
    /// List requests matching a filter, oldest first
    fn find(&self, filter: ChangeRequestFilter) -> StoreFuture<'_, Vec<ChangeRequest>>;
}

/// Notification inbox repository
pub trait NotificationStore: Send + Sync {
    /// Persist a new row
    fn insert(&self, notification: Notification) -> StoreFuture<'_, ()>;
    /// Overwrite an existing row
    fn update(&self, notification: Notification) -> StoreFuture<'_, ()>;
    /// Load one row
    fn get(&self, id: NotificationId) -> StoreFuture<'_, Option<Notification>>;
    /// Remove a row
    fn delete(&self, id: NotificationId) -> StoreFuture<'_, ()>;
    /// Inbox of a recipient, newest first
    fn list_for(&self, recipient: UserId, unread_only: bool) -> StoreFuture<'_, Vec<Notification>>;
}

/// Service catalog and capacity repository
pub trait ServiceCapacityStore: Send + Sync {
    /// Persist a new service
    fn insert(&self, service: ServiceCapacity) -> StoreFuture<'_, ()>;
    /// Overwrite an existing service
    fn update(&self, service: ServiceCapacity) -> StoreFuture<'_, ()>;
    /// Load one service
    fn get(&self, id: ServiceId) -> StoreFuture<'_, Option<ServiceCapacity>>;
    /// Every service, ordered by name
    fn list(&self) -> StoreFuture<'_, Vec<ServiceCapacity>>;
}

// ============================================================================
// In-memory implementations
// ============================================================================

/// Insertion-ordered rows keyed by id
#[derive(Debug)]
struct Table<K, V> {
    rows: HashMap<K, (u64, V)>,
    next_seq: u64,
}

impl<K, V> Default for Table<K, V> {
    fn default() -> Self {
        Self {
            rows: HashMap::new(),
            next_seq: 0,
        }
    }
}

impl<K, V> Table<K, V>
where
    K: std::hash::Hash + Eq + std::fmt::Display,
    V: Clone,
{
    fn insert(&mut self, entity: &'static str, key: K, value: V) -> Result<(), StoreError> {
        if self.rows.contains_key(&key) {
            return Err(StoreError::Duplicate {
                entity,
                id: key.to_string(),
            });
        }
        self.rows.insert(key, (self.next_seq, value));
        self.next_seq += 1;
        Ok(())
    }

    fn update(&mut self, entity: &'static str, key: &K, value: V) -> Result<(), StoreError> {
        match self.rows.get_mut(key) {
            Some((_, row)) => {
                *row = value;
                Ok(())
            }
            None => Err(StoreError::Missing {
                entity,
                id: key.to_string(),
            }),
        }
    }

    fn get(&self, key: &K) -> Option<V> {
        self.rows.get(key).map(|(_, row)| row.clone())
    }

    /// Matching rows as `(insertion sequence, row)`, oldest first
    fn select(&self, keep: impl Fn(&V) -> bool) -> Vec<(u64, V)> {
        let mut rows: Vec<(u64, V)> = self
            .rows
            .values()
            .filter(|(_, row)| keep(row))
            .map(|(seq, row)| (*seq, row.clone()))
            .collect();
        rows.sort_by_key(|(seq, _)| *seq);
        rows
    }
}

/// In-memory [`AppointmentStore`]
#[derive(Debug, Default)]
pub struct InMemoryAppointmentStore {
    table: RwLock<Table<AppointmentId, Appointment>>,
}

impl InMemoryAppointmentStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl AppointmentStore for InMemoryAppointmentStore {
    fn insert(&self, appointment: Appointment) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.table
                .write()
                .await
                .insert("Appointment", appointment.id, appointment)
        })
    }

    fn update(&self, appointment: Appointment) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let id = appointment.id;
            self.table.write().await.update("Appointment", &id, appointment)
        })
    }

    fn get(&self, id: AppointmentId) -> StoreFuture<'_, Option<Appointment>> {
        Box::pin(async move { Ok(self.table.read().await.get(&id)) })
    }

    fn find(&self, filter: AppointmentFilter) -> StoreFuture<'_, Vec<Appointment>> {
        Box::pin(async move {
            Ok(self
                .table
                .read()
                .await
                .select(|appointment| filter.matches(appointment))
                .into_iter()
                .map(|(_, appointment)| appointment)
                .collect())
        })
    }
}

/// In-memory [`ChangeRequestStore`]
#[derive(Debug, Default)]
pub struct InMemoryChangeRequestStore {
    table: RwLock<Table<ChangeRequestId, ChangeRequest>>,
}

impl InMemoryChangeRequestStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChangeRequestStore for InMemoryChangeRequestStore {
    fn insert(&self, request: ChangeRequest) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.table
                .write()
                .await
                .insert("ChangeRequest", request.id, request)
        })
    }

    fn update(&self, request: ChangeRequest) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let id = request.id;
            self.table.write().await.update("ChangeRequest", &id, request)
        })
    }

    fn get(&self, id: ChangeRequestId) -> StoreFuture<'_, Option<ChangeRequest>> {
        Box::pin(async move { Ok(self.table.read().await.get(&id)) })
    }

    fn find(&self, filter: ChangeRequestFilter) -> StoreFuture<'_, Vec<ChangeRequest>> {
        Box::pin(async move {
            Ok(self
                .table
                .read()
                .await
                .select(|request| filter.matches(request))
                .into_iter()
                .map(|(_, request)| request)
                .collect())
        })
    }
}

/// In-memory [`NotificationStore`].
///
/// Rows created within the same clock tick keep a stable newest-first order
/// through their insertion sequence.
#[derive(Debug, Default)]
pub struct InMemoryNotificationStore {
    table: RwLock<Table<NotificationId, Notification>>,
}

impl InMemoryNotificationStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of rows across all inboxes
    pub async fn len(&self) -> usize {
        self.table.read().await.rows.len()
    }

    /// Whether no inbox has any row
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl NotificationStore for InMemoryNotificationStore {
    fn insert(&self, notification: Notification) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.table
                .write()
                .await
                .insert("Notification", notification.id, notification)
        })
    }

    fn update(&self, notification: Notification) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let id = notification.id;
            self.table
                .write()
                .await
                .update("Notification", &id, notification)
        })
    }

    fn get(&self, id: NotificationId) -> StoreFuture<'_, Option<Notification>> {
        Box::pin(async move { Ok(self.table.read().await.get(&id)) })
    }

    fn delete(&self, id: NotificationId) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            match self.table.write().await.rows.remove(&id) {
                Some(_) => Ok(()),
                None => Err(StoreError::Missing {
                    entity: "Notification",
                    id: id.to_string(),
                }),
            }
        })
    }

    fn list_for(&self, recipient: UserId, unread_only: bool) -> StoreFuture<'_, Vec<Notification>> {
        Box::pin(async move {
            let mut rows = self.table.read().await.select(|notification| {
                notification.recipient == recipient && !(unread_only && notification.is_read)
            });
            rows.sort_by(|(seq_a, a), (seq_b, b)| {
                b.created_at.cmp(&a.created_at).then(seq_b.cmp(seq_a))
            });
            Ok(rows.into_iter().map(|(_, notification)| notification).collect())
        })
    }
}

/// In-memory [`ServiceCapacityStore`]
#[derive(Debug, Default)]
pub struct InMemoryServiceStore {
    table: RwLock<Table<ServiceId, ServiceCapacity>>,
}

impl InMemoryServiceStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ServiceCapacityStore for InMemoryServiceStore {
    fn insert(&self, service: ServiceCapacity) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.table.write().await.insert("Service", service.id, service)
        })
    }

    fn update(&self, service: ServiceCapacity) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let id = service.id;
            self.table.write().await.update("Service", &id, service)
        })
    }

    fn get(&self, id: ServiceId) -> StoreFuture<'_, Option<ServiceCapacity>> {
        Box::pin(async move { Ok(self.table.read().await.get(&id)) })
    }

    fn list(&self) -> StoreFuture<'_, Vec<ServiceCapacity>> {
        Box::pin(async move {
            let mut services: Vec<ServiceCapacity> = self
                .table
                .read()
                .await
                .select(|_| true)
                .into_iter()
                .map(|(_, service)| service)
                .collect();
            services.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(services)
        })
    }
}
