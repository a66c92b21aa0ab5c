//! # Garage Testing
//!
//! Testing utilities for the garage appointment engine.
//!
//! This crate provides:
//! - Deterministic clocks ([`FixedClock`], [`SteppingClock`])
//! - A Given-When-Then harness for reducers ([`ReducerTest`])
//! - In-memory push channels that record every publish
//!   ([`InMemoryPushChannel`], [`FailingPushChannel`], [`StalledPushChannel`])
//!
//! ## Example
//!
//! ```ignore
//! use garage_testing::{test_clock, InMemoryPushChannel};
//!
//! #[tokio::test]
//! async fn test_inbox() {
//!     let channel = Arc::new(InMemoryPushChannel::new());
//!     let garage = GarageBuilder::new()
//!         .with_clock(Arc::new(test_clock()))
//!         .with_push_channel(channel.clone())
//!         .build();
//!     // ...
//!     assert_eq!(channel.published_to(&ChannelKey::AdminBroadcast).len(), 1);
//! }
//! ```

use chrono::{DateTime, Duration, Utc};
use garage_core::environment::Clock;

pub mod push_mocks;
pub mod reducer_test;

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Duration, Utc};
    use std::sync::Mutex;

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use garage_testing::mocks::FixedClock;
    /// use garage_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that advances by a fixed step on every reading.
    ///
    /// Used where ordering by creation time matters (newest-first inbox listings).
    #[derive(Debug)]
    pub struct SteppingClock {
        next: Mutex<DateTime<Utc>>,
        step: Duration,
    }

    impl SteppingClock {
        /// Create a clock starting at `start` that moves `step` forward per reading
        #[must_use]
        pub const fn new(start: DateTime<Utc>, step: Duration) -> Self {
            Self {
                next: Mutex::new(start),
                step,
            }
        }
    }

    impl Clock for SteppingClock {
        fn now(&self) -> DateTime<Utc> {
            let mut next = match self.next.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let now = *next;
            *next = now + self.step;
            now
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Test helpers and utilities
pub mod helpers {
    /// Install a `tracing` subscriber that writes through the test harness.
    ///
    /// Safe to call from every test; only the first call installs the subscriber.
    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    }
}

// Re-export commonly used items
pub use helpers::init_tracing;
pub use mocks::{test_clock, FixedClock, SteppingClock};
pub use push_mocks::{FailingPushChannel, InMemoryPushChannel, StalledPushChannel};
pub use reducer_test::{assertions, ReducerTest};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        let time1 = clock.now();
        let time2 = clock.now();
        assert_eq!(time1, time2);
    }

    #[test]
    fn test_stepping_clock_advances() {
        let start = test_clock().now();
        let clock = SteppingClock::new(start, Duration::seconds(1));
        assert_eq!(clock.now(), start);
        assert_eq!(clock.now(), start + Duration::seconds(1));
        assert_eq!(clock.now(), start + Duration::seconds(2));
    }
}
