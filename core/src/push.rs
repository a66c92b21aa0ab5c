//! Push channel abstraction for real-time notification delivery.
//!
//! The persisted inbox row is the source of truth for every notification. The push
//! channel is a best-effort side channel: a subscriber that is offline simply misses
//! the live message and finds it on the next inbox poll.
//!
//! # Channel Keys
//!
//! - `user.<recipient-id>` - private stream for one recipient
//! - `admin.broadcast` - shared stream for admin dashboards
//!
//! # Example
//!
//! ```rust,ignore
//! use futures::StreamExt;
//! use garage_core::push::{ChannelKey, PushChannel};
//!
//! async fn example(channel: impl PushChannel) {
//!     let key = ChannelKey::user("42");
//!     let mut stream = channel.subscribe(&key).await?;
//!     channel.publish(&key, r#"{"title":"Service Started"}"#.to_string()).await?;
//!     while let Some(payload) = stream.next().await {
//!         println!("{payload}");
//!     }
//! }
//! ```

use futures::Stream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

/// Fixed key of the admin broadcast channel
pub const ADMIN_BROADCAST_KEY: &str = "admin.broadcast";

/// Prefix of every private recipient channel
pub const USER_CHANNEL_PREFIX: &str = "user.";

/// Errors that can occur during push channel operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PushError {
    /// Failed to publish a payload
    #[error("Publish failed for channel '{channel}': {reason}")]
    PublishFailed {
        /// The channel that failed
        channel: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to subscribe to a channel
    #[error("Subscription failed for channel '{channel}': {reason}")]
    SubscriptionFailed {
        /// The channel that failed
        channel: String,
        /// The reason for failure
        reason: String,
    },

    /// The publish did not complete within the configured bound
    #[error("Publish to channel '{channel}' timed out after {timeout_ms}ms")]
    Timeout {
        /// The channel that timed out
        channel: String,
        /// The bound that was exceeded
        timeout_ms: u64,
    },

    /// Network or transport error
    #[error("Transport error: {0}")]
    TransportError(String),
}

/// Routing key of a push channel.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelKey {
    /// Private channel of one recipient
    User(String),
    /// Shared admin broadcast channel
    AdminBroadcast,
}

impl ChannelKey {
    /// Private channel key for a recipient
    #[must_use]
    pub fn user(recipient: impl fmt::Display) -> Self {
        Self::User(recipient.to_string())
    }

    /// Parse a wire key such as `user.42` or `admin.broadcast`
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        if raw == ADMIN_BROADCAST_KEY {
            return Some(Self::AdminBroadcast);
        }
        raw.strip_prefix(USER_CHANNEL_PREFIX)
            .filter(|id| !id.is_empty())
            .map(|id| Self::User(id.to_string()))
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(id) => write!(f, "{USER_CHANNEL_PREFIX}{id}"),
            Self::AdminBroadcast => f.write_str(ADMIN_BROADCAST_KEY),
        }
    }
}

/// Stream of serialized payloads from a subscription.
pub type PushStream = Pin<Box<dyn Stream<Item = String> + Send>>;

/// Trait for push channel implementations.
///
/// Delivery is fire-and-forget: `publish` succeeds even when nobody is subscribed.
///
/// # Dyn Compatibility
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn`
/// so it can be shared as `Arc<dyn PushChannel>` between the dispatcher and the
/// effects it creates.
pub trait PushChannel: Send + Sync {
    /// Publish a serialized payload on a channel.
    ///
    /// # Errors
    ///
    /// Returns [`PushError::PublishFailed`] if the transport rejects the payload.
    fn publish(
        &self,
        key: &ChannelKey,
        payload: String,
    ) -> Pin<Box<dyn Future<Output = Result<(), PushError>> + Send + '_>>;

    /// Subscribe to a channel and receive every payload published after this call.
    ///
    /// # Errors
    ///
    /// Returns [`PushError::SubscriptionFailed`] if the subscription cannot be opened.
    fn subscribe(
        &self,
        key: &ChannelKey,
    ) -> Pin<Box<dyn Future<Output = Result<PushStream, PushError>> + Send + '_>>;
}

/// In-process push channel built on `tokio::sync::broadcast`.
///
/// One broadcast sender per channel key, created lazily on first subscribe and
/// dropped once its last subscriber is gone. Publishing to a key nobody
/// subscribed to is a successful no-op. Slow
/// subscribers that lag behind `capacity` messages skip the oldest payloads.
#[derive(Debug)]
pub struct BroadcastPushChannel {
    senders: Mutex<HashMap<ChannelKey, broadcast::Sender<String>>>,
    capacity: usize,
}

impl BroadcastPushChannel {
    /// Create a channel whose per-key buffers hold `capacity` payloads
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            senders: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    fn senders(&self) -> MutexGuard<'_, HashMap<ChannelKey, broadcast::Sender<String>>> {
        match self.senders.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Number of channel keys with a sender
    #[must_use]
    pub fn tracked_keys(&self) -> usize {
        self.senders().len()
    }

    /// Number of live subscribers on a channel
    #[must_use]
    pub fn subscriber_count(&self, key: &ChannelKey) -> usize {
        self.senders()
            .get(key)
            .map_or(0, broadcast::Sender::receiver_count)
    }
}

impl Default for BroadcastPushChannel {
    fn default() -> Self {
        Self::new(64)
    }
}

impl PushChannel for BroadcastPushChannel {
    fn publish(
        &self,
        key: &ChannelKey,
        payload: String,
    ) -> Pin<Box<dyn Future<Output = Result<(), PushError>> + Send + '_>> {
        let sender = {
            let mut senders = self.senders();
            let abandoned = senders
                .get(key)
                .is_some_and(|sender| sender.receiver_count() == 0);
            if abandoned {
                senders.remove(key);
            }
            senders.get(key).cloned()
        };
        Box::pin(async move {
            if let Some(sender) = sender {
                // Err only means every subscriber has gone away
                let _ = sender.send(payload);
            }
            Ok(())
        })
    }

    fn subscribe(
        &self,
        key: &ChannelKey,
    ) -> Pin<Box<dyn Future<Output = Result<PushStream, PushError>> + Send + '_>> {
        let receiver = {
            let mut senders = self.senders();
            // Forget keys whose subscribers have all gone away
            senders.retain(|_, sender| sender.receiver_count() > 0);
            senders
                .entry(key.clone())
                .or_insert_with(|| broadcast::channel(self.capacity).0)
                .subscribe()
        };
        Box::pin(async move {
            let stream: PushStream =
                Box::pin(BroadcastStream::new(receiver).filter_map(Result::ok));
            Ok(stream)
        })
    }
}
