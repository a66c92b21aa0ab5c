//! Notification dispatcher: inbox rows first, live push second.
//!
//! The persisted row is the source of truth. A push that fails or exceeds the
//! configured timeout is logged and dropped; the recipient still finds the row
//! on the next inbox read.

use super::templates::Notice;
use crate::directory::UserDirectory;
use crate::error::GarageError;
use crate::locks::RecordLocks;
use crate::store::NotificationStore;
use crate::types::{AppointmentId, Notification, NotificationId, NotificationType, UserId};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use garage_core::environment::Clock;
use garage_core::push::{ChannelKey, PushChannel, PushError, PushStream};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// JSON payload published on push channels
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushMessage {
    /// Inbox row, absent on the admin broadcast (one row per admin)
    pub id: Option<NotificationId>,
    /// Appointment the message is about
    pub appointment_id: Option<AppointmentId>,
    /// Title
    pub title: String,
    /// Message
    pub message: String,
    /// Notification type
    #[serde(rename = "type")]
    pub kind: NotificationType,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl From<&Notification> for PushMessage {
    fn from(notification: &Notification) -> Self {
        Self {
            id: Some(notification.id),
            appointment_id: notification.appointment_id,
            title: notification.title.clone(),
            message: notification.message.clone(),
            kind: notification.kind,
            created_at: notification.created_at,
        }
    }
}

/// Writes inbox rows and pushes them to live subscribers
pub struct NotificationDispatcher {
    store: Arc<dyn NotificationStore>,
    directory: Arc<dyn UserDirectory>,
    push: Arc<dyn PushChannel>,
    clock: Arc<dyn Clock>,
    push_timeout: Duration,
    locks: RecordLocks<NotificationId>,
}

impl NotificationDispatcher {
    /// Create a dispatcher
    #[must_use]
    pub fn new(
        store: Arc<dyn NotificationStore>,
        directory: Arc<dyn UserDirectory>,
        push: Arc<dyn PushChannel>,
        clock: Arc<dyn Clock>,
        push_timeout: Duration,
    ) -> Self {
        Self {
            store,
            directory,
            push,
            clock,
            push_timeout,
            locks: RecordLocks::new(),
        }
    }

    /// Persist one row for `recipient` and push it on `user.<recipient>`.
    ///
    /// # Errors
    ///
    /// Returns [`GarageError::Storage`] if the row cannot be written. Push
    /// failures never surface.
    pub async fn dispatch(
        &self,
        recipient: UserId,
        appointment_id: Option<AppointmentId>,
        notice: Notice,
    ) -> Result<Notification, GarageError> {
        let notification = self.persist(recipient, appointment_id, notice).await?;
        self.publish(&ChannelKey::user(recipient), &PushMessage::from(&notification))
            .await;
        Ok(notification)
    }

    /// Persist one row per admin (concurrently), then push once on `admin.broadcast`.
    ///
    /// With no admins on the roster nothing is persisted but the broadcast
    /// still goes out.
    ///
    /// # Errors
    ///
    /// Returns [`GarageError::Storage`] if the roster cannot be read or any
    /// row cannot be written. Rows written before the failure are kept.
    pub async fn dispatch_to_all_admins(
        &self,
        appointment_id: Option<AppointmentId>,
        notice: Notice,
    ) -> Result<Vec<Notification>, GarageError> {
        let admins = self.directory.admins().await?;

        let rows = join_all(
            admins
                .iter()
                .map(|admin| self.dispatch(admin.id, appointment_id, notice.clone())),
        )
        .await
        .into_iter()
        .collect::<Result<Vec<_>, _>>()?;

        let broadcast = PushMessage {
            id: None,
            appointment_id,
            title: notice.title,
            message: notice.message,
            kind: notice.kind,
            created_at: self.clock.now(),
        };
        self.publish(&ChannelKey::AdminBroadcast, &broadcast).await;

        info!(admins = rows.len(), kind = ?broadcast.kind, "Admin broadcast dispatched");
        Ok(rows)
    }

    async fn persist(
        &self,
        recipient: UserId,
        appointment_id: Option<AppointmentId>,
        notice: Notice,
    ) -> Result<Notification, GarageError> {
        let notification = Notification {
            id: NotificationId::new(),
            recipient,
            appointment_id,
            title: notice.title,
            message: notice.message,
            kind: notice.kind,
            is_read: false,
            created_at: self.clock.now(),
            read_at: None,
        };

        if let Err(e) = self.store.insert(notification.clone()).await {
            error!(recipient = %recipient, error = %e, "Failed to persist notification");
            return Err(e.into());
        }
        debug!(notification_id = %notification.id, recipient = %recipient, "Notification persisted");
        Ok(notification)
    }

    async fn publish(&self, key: &ChannelKey, message: &PushMessage) {
        let payload = match serde_json::to_string(message) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(channel = %key, error = %e, "Failed to serialize push message");
                return;
            }
        };

        match tokio::time::timeout(self.push_timeout, self.push.publish(key, payload)).await {
            Ok(Ok(())) => debug!(channel = %key, "Push delivered"),
            Ok(Err(e)) => warn!(channel = %key, error = %e, "Push failed"),
            Err(_) => {
                let timeout = PushError::Timeout {
                    channel: key.to_string(),
                    timeout_ms: u64::try_from(self.push_timeout.as_millis()).unwrap_or(u64::MAX),
                };
                warn!(channel = %key, error = %timeout, "Push timed out");
            }
        }
    }

    async fn owned(
        &self,
        id: NotificationId,
        requester: UserId,
    ) -> Result<Notification, GarageError> {
        let notification = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| GarageError::not_found("Notification", id))?;
        if notification.recipient != requester {
            warn!(notification_id = %id, requester = %requester, "Notification belongs to someone else");
            return Err(GarageError::Forbidden(
                "Notifications can only be changed by their recipient".to_string(),
            ));
        }
        Ok(notification)
    }

    /// Mark one notification as read.
    ///
    /// Marking an already read notification keeps its original `read_at`.
    ///
    /// # Errors
    ///
    /// Returns [`GarageError::NotFound`] for an unknown id,
    /// [`GarageError::Forbidden`] if `requester` is not the recipient, or
    /// [`GarageError::Storage`] on store failure.
    pub async fn mark_read(
        &self,
        id: NotificationId,
        requester: UserId,
    ) -> Result<Notification, GarageError> {
        let _guard = self.locks.lock(&id).await;
        let mut notification = self.owned(id, requester).await?;
        if notification.mark_read(self.clock.now()) {
            self.store.update(notification.clone()).await?;
        }
        Ok(notification)
    }

    /// Mark every unread notification of `requester` as read.
    ///
    /// Returns how many rows changed.
    ///
    /// # Errors
    ///
    /// Returns [`GarageError::Storage`] on store failure.
    pub async fn mark_all_read(&self, requester: UserId) -> Result<usize, GarageError> {
        let mut changed = 0;
        for unread in self.store.list_for(requester, true).await? {
            let _guard = self.locks.lock(&unread.id).await;
            // Re-read under the lock; it may have been read or deleted meanwhile
            let Some(mut notification) = self.store.get(unread.id).await? else {
                continue;
            };
            if notification.mark_read(self.clock.now()) {
                self.store.update(notification).await?;
                changed += 1;
            }
        }
        debug!(recipient = %requester, changed, "Inbox marked read");
        Ok(changed)
    }

    /// Delete one notification.
    ///
    /// # Errors
    ///
    /// Returns [`GarageError::NotFound`] for an unknown id,
    /// [`GarageError::Forbidden`] if `requester` is not the recipient, or
    /// [`GarageError::Storage`] on store failure.
    pub async fn delete(&self, id: NotificationId, requester: UserId) -> Result<(), GarageError> {
        let _guard = self.locks.lock(&id).await;
        self.owned(id, requester).await?;
        self.store.delete(id).await?;
        debug!(notification_id = %id, "Notification deleted");
        Ok(())
    }

    /// Number of unread notifications of `recipient`.
    ///
    /// # Errors
    ///
    /// Returns [`GarageError::Storage`] on store failure.
    pub async fn unread_count(&self, recipient: UserId) -> Result<usize, GarageError> {
        Ok(self.store.list_for(recipient, true).await?.len())
    }

    /// Inbox of `recipient`, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`GarageError::Storage`] on store failure.
    pub async fn list(&self, recipient: UserId) -> Result<Vec<Notification>, GarageError> {
        Ok(self.store.list_for(recipient, false).await?)
    }

    /// Unread part of the inbox of `recipient`, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`GarageError::Storage`] on store failure.
    pub async fn list_unread(&self, recipient: UserId) -> Result<Vec<Notification>, GarageError> {
        Ok(self.store.list_for(recipient, true).await?)
    }

    /// Live stream of `user.<recipient>`.
    ///
    /// # Errors
    ///
    /// Returns [`PushError::SubscriptionFailed`] if the channel refuses.
    pub async fn subscribe(&self, recipient: UserId) -> Result<PushStream, PushError> {
        self.push.subscribe(&ChannelKey::user(recipient)).await
    }

    /// Live stream of `admin.broadcast`.
    ///
    /// # Errors
    ///
    /// Returns [`PushError::SubscriptionFailed`] if the channel refuses.
    pub async fn subscribe_admin_broadcast(&self) -> Result<PushStream, PushError> {
        self.push.subscribe(&ChannelKey::AdminBroadcast).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::directory::InMemoryDirectory;
    use crate::store::{InMemoryNotificationStore, StoreError, StoreFuture};
    use crate::types::Role;
    use futures::StreamExt;
    use garage_testing::{test_clock, FailingPushChannel, InMemoryPushChannel, StalledPushChannel};

    struct Fixture {
        dispatcher: NotificationDispatcher,
        directory: Arc<InMemoryDirectory>,
        push: Arc<InMemoryPushChannel>,
    }

    fn fixture() -> Fixture {
        let directory = Arc::new(InMemoryDirectory::new());
        let push = Arc::new(InMemoryPushChannel::new());
        let dispatcher = NotificationDispatcher::new(
            Arc::new(InMemoryNotificationStore::new()),
            directory.clone(),
            push.clone(),
            Arc::new(test_clock()),
            Duration::from_millis(200),
        );
        Fixture {
            dispatcher,
            directory,
            push,
        }
    }

    fn notice(title: &str) -> Notice {
        Notice::new(title, "body", NotificationType::General)
    }

    #[tokio::test]
    async fn dispatch_persists_and_pushes_json() {
        let fx = fixture();
        let me = UserId::new();
        let mut live = fx.dispatcher.subscribe(me).await.unwrap();

        let row = fx.dispatcher.dispatch(me, None, notice("Hello")).await.unwrap();

        assert!(!row.is_read);
        assert_eq!(row.read_at, None);
        let payload = live.next().await.unwrap();
        let message: PushMessage = serde_json::from_str(&payload).unwrap();
        assert_eq!(message.id, Some(row.id));
        assert_eq!(message.title, "Hello");
        assert!(payload.contains("\"type\":\"GENERAL\""));
    }

    #[tokio::test]
    async fn admin_broadcast_writes_one_row_per_admin() {
        let fx = fixture();
        let a = fx.directory.add("a", "Admin A", Role::Admin);
        let b = fx.directory.add("b", "Admin B", Role::Admin);
        fx.directory.add("c", "Customer C", Role::Customer);

        let rows = fx
            .dispatcher
            .dispatch_to_all_admins(None, notice("New Appointment"))
            .await
            .unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(fx.dispatcher.unread_count(a.id).await.unwrap(), 1);
        assert_eq!(fx.dispatcher.unread_count(b.id).await.unwrap(), 1);
        assert_eq!(fx.push.published_to(&ChannelKey::AdminBroadcast).len(), 1);
    }

    #[tokio::test]
    async fn only_the_recipient_may_touch_a_notification() {
        let fx = fixture();
        let owner = UserId::new();
        let row = fx.dispatcher.dispatch(owner, None, notice("Mine")).await.unwrap();

        let stranger = UserId::new();
        assert!(matches!(
            fx.dispatcher.mark_read(row.id, stranger).await,
            Err(GarageError::Forbidden(_))
        ));
        assert!(matches!(
            fx.dispatcher.delete(row.id, stranger).await,
            Err(GarageError::Forbidden(_))
        ));

        let read = fx.dispatcher.mark_read(row.id, owner).await.unwrap();
        assert!(read.is_read);
        assert_eq!(read.read_at, Some(test_clock().now()));

        fx.dispatcher.delete(row.id, owner).await.unwrap();
        assert!(matches!(
            fx.dispatcher.mark_read(row.id, owner).await,
            Err(GarageError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn mark_all_read_clears_the_unread_list() {
        let fx = fixture();
        let me = UserId::new();
        for title in ["one", "two", "three"] {
            fx.dispatcher.dispatch(me, None, notice(title)).await.unwrap();
        }

        let listed: Vec<String> = fx
            .dispatcher
            .list(me)
            .await
            .unwrap()
            .into_iter()
            .map(|n| n.title)
            .collect();
        assert_eq!(listed, vec!["three", "two", "one"]);

        assert_eq!(fx.dispatcher.mark_all_read(me).await.unwrap(), 3);
        assert!(fx.dispatcher.list_unread(me).await.unwrap().is_empty());
        assert_eq!(fx.dispatcher.mark_all_read(me).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn push_failures_do_not_fail_dispatch() {
        let store = Arc::new(InMemoryNotificationStore::new());
        let failing = NotificationDispatcher::new(
            store.clone(),
            Arc::new(InMemoryDirectory::new()),
            Arc::new(FailingPushChannel::new()),
            Arc::new(test_clock()),
            Duration::from_millis(50),
        );
        let stalled = NotificationDispatcher::new(
            store.clone(),
            Arc::new(InMemoryDirectory::new()),
            Arc::new(StalledPushChannel),
            Arc::new(test_clock()),
            Duration::from_millis(20),
        );

        let me = UserId::new();
        assert!(failing.dispatch(me, None, notice("a")).await.is_ok());
        assert!(stalled.dispatch(me, None, notice("b")).await.is_ok());
        assert_eq!(store.len().await, 2);
    }

    struct BrokenStore;

    impl NotificationStore for BrokenStore {
        fn insert(&self, _: Notification) -> StoreFuture<'_, ()> {
            Box::pin(async { Err(StoreError::Unavailable("disk full".to_string())) })
        }
        fn update(&self, _: Notification) -> StoreFuture<'_, ()> {
            Box::pin(async { Err(StoreError::Unavailable("disk full".to_string())) })
        }
        fn get(&self, _: NotificationId) -> StoreFuture<'_, Option<Notification>> {
            Box::pin(async { Ok(None) })
        }
        fn delete(&self, _: NotificationId) -> StoreFuture<'_, ()> {
            Box::pin(async { Ok(()) })
        }
        fn list_for(&self, _: UserId, _: bool) -> StoreFuture<'_, Vec<Notification>> {
            Box::pin(async { Ok(Vec::new()) })
        }
    }

    #[tokio::test]
    async fn storage_failures_surface_and_skip_the_push() {
        let push = Arc::new(InMemoryPushChannel::new());
        let dispatcher = NotificationDispatcher::new(
            Arc::new(BrokenStore),
            Arc::new(InMemoryDirectory::new()),
            push.clone(),
            Arc::new(test_clock()),
            Duration::from_millis(50),
        );

        let result = dispatcher.dispatch(UserId::new(), None, notice("lost")).await;
        assert!(matches!(result, Err(GarageError::Storage(_))));
        assert_eq!(push.publish_count(), 0);
    }
}
