//! In-memory push channels for notification tests
//!
//! - [`InMemoryPushChannel`]: live delivery plus a log of every publish
//! - [`FailingPushChannel`]: every publish is rejected by the transport
//! - [`StalledPushChannel`]: every publish hangs forever (exercises timeouts)

use garage_core::push::{BroadcastPushChannel, ChannelKey, PushChannel, PushError, PushStream};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Push channel that delivers like the production broadcast channel and keeps a
/// log of every `(key, payload)` published, in publish order.
///
/// # Example
///
/// ```
/// use garage_core::push::{ChannelKey, PushChannel};
/// use garage_testing::InMemoryPushChannel;
///
/// # tokio_test::block_on(async {
/// let channel = InMemoryPushChannel::new();
/// channel.publish(&ChannelKey::AdminBroadcast, "hi".to_string()).await.ok();
/// assert_eq!(channel.published_to(&ChannelKey::AdminBroadcast), vec!["hi".to_string()]);
/// # });
/// ```
#[derive(Debug, Default, Clone)]
pub struct InMemoryPushChannel {
    inner: Arc<BroadcastPushChannel>,
    published: Arc<Mutex<Vec<(ChannelKey, String)>>>,
}

impl InMemoryPushChannel {
    /// Create an empty channel
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn log(&self) -> MutexGuard<'_, Vec<(ChannelKey, String)>> {
        match self.published.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Every publish so far
    #[must_use]
    pub fn published(&self) -> Vec<(ChannelKey, String)> {
        self.log().clone()
    }

    /// Payloads published on one key
    #[must_use]
    pub fn published_to(&self, key: &ChannelKey) -> Vec<String> {
        self.log()
            .iter()
            .filter(|(published_key, _)| published_key == key)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    /// Total number of publishes
    #[must_use]
    pub fn publish_count(&self) -> usize {
        self.log().len()
    }

    /// Forget the publish log (for test isolation)
    pub fn clear(&self) {
        self.log().clear();
    }
}

impl PushChannel for InMemoryPushChannel {
    fn publish(
        &self,
        key: &ChannelKey,
        payload: String,
    ) -> Pin<Box<dyn Future<Output = Result<(), PushError>> + Send + '_>> {
        self.log().push((key.clone(), payload.clone()));
        self.inner.publish(key, payload)
    }

    fn subscribe(
        &self,
        key: &ChannelKey,
    ) -> Pin<Box<dyn Future<Output = Result<PushStream, PushError>> + Send + '_>> {
        self.inner.subscribe(key)
    }
}

/// Push channel whose transport rejects every publish.
#[derive(Debug, Default)]
pub struct FailingPushChannel {
    attempts: AtomicUsize,
}

impl FailingPushChannel {
    /// Create a failing channel
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// How many publishes were attempted
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl PushChannel for FailingPushChannel {
    fn publish(
        &self,
        key: &ChannelKey,
        _payload: String,
    ) -> Pin<Box<dyn Future<Output = Result<(), PushError>> + Send + '_>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let channel = key.to_string();
        Box::pin(async move {
            Err(PushError::PublishFailed {
                channel,
                reason: "transport unavailable".to_string(),
            })
        })
    }

    fn subscribe(
        &self,
        key: &ChannelKey,
    ) -> Pin<Box<dyn Future<Output = Result<PushStream, PushError>> + Send + '_>> {
        let channel = key.to_string();
        Box::pin(async move {
            Err(PushError::SubscriptionFailed {
                channel,
                reason: "transport unavailable".to_string(),
            })
        })
    }
}

/// Push channel whose publishes never complete.
#[derive(Debug, Default)]
pub struct StalledPushChannel;

impl PushChannel for StalledPushChannel {
    fn publish(
        &self,
        _key: &ChannelKey,
        _payload: String,
    ) -> Pin<Box<dyn Future<Output = Result<(), PushError>> + Send + '_>> {
        Box::pin(futures::future::pending())
    }

    fn subscribe(
        &self,
        _key: &ChannelKey,
    ) -> Pin<Box<dyn Future<Output = Result<PushStream, PushError>> + Send + '_>> {
        Box::pin(async {
            let stream: PushStream = Box::pin(futures::stream::empty());
            Ok(stream)
        })
    }
}
