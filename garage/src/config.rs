//! Configuration management for the garage engine.
//!
//! Loads configuration from environment variables with sensible defaults.

use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Slot labels offered when `SLOT_LABELS` is not set
pub const DEFAULT_SLOT_LABELS: [&str; 9] = [
    "08:00-09:00",
    "09:00-10:00",
    "10:00-11:00",
    "11:00-12:00",
    "12:00-13:00",
    "13:00-14:00",
    "14:00-15:00",
    "15:00-16:00",
    "16:00-17:00",
];

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Booking rules
    pub scheduling: SchedulingConfig,
    /// Notification delivery
    pub notifications: NotificationConfig,
    /// Daily capacity sweep
    pub sweep: SweepConfig,
    /// Process-level settings
    pub server: ServerConfig,
}

/// Booking rules
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulingConfig {
    /// Allowed time-slot labels
    pub slot_labels: Vec<String>,
    /// Whether COMPLETED appointments keep their slot in `booked_slots`
    pub booked_slots_include_completed: bool,
    /// Only allow employee assignment on CONFIRMED appointments
    pub assign_requires_confirmed: bool,
    /// Accept bookings for dates before today
    pub allow_past_dates: bool,
}

impl SchedulingConfig {
    /// Whether `label` is one of the configured slots
    #[must_use]
    pub fn is_known_slot(&self, label: &str) -> bool {
        self.slot_labels.iter().any(|known| known == label)
    }
}

/// Notification delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Upper bound for one push publish, in milliseconds
    pub push_timeout_ms: u64,
    /// Buffered payloads per push channel key
    pub push_channel_capacity: usize,
}

impl NotificationConfig {
    /// Push timeout as a [`Duration`]
    #[must_use]
    pub const fn push_timeout(&self) -> Duration {
        Duration::from_millis(self.push_timeout_ms)
    }
}

/// Daily capacity sweep
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Spawn the sweep on `Garage::start`
    pub enabled: bool,
    /// Offset of the business's local time from UTC, in minutes
    pub utc_offset_minutes: i32,
    /// Also re-enable services an admin switched off
    pub reactivate_manual: bool,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout: u64,
}

impl SweepConfig {
    /// Shutdown timeout as a [`Duration`]
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout)
    }
}

/// Process-level settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Port for the Prometheus scrape endpoint; unset keeps metrics in-process
    pub metrics_port: Option<u16>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Unset or unparseable variables fall back to their defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let parsed = |key: &str| lookup(key).and_then(|raw| raw.trim().parse().ok());

        Self {
            scheduling: SchedulingConfig {
                slot_labels: lookup("SLOT_LABELS")
                    .map(|raw| parse_slot_labels(&raw))
                    .filter(|labels| !labels.is_empty())
                    .unwrap_or_else(default_slot_labels),
                booked_slots_include_completed: parsed("BOOKED_SLOTS_INCLUDE_COMPLETED")
                    .unwrap_or(true),
                assign_requires_confirmed: parsed("ASSIGN_REQUIRES_CONFIRMED").unwrap_or(false),
                allow_past_dates: parsed("ALLOW_PAST_DATES").unwrap_or(false),
            },
            notifications: NotificationConfig {
                push_timeout_ms: parse_or(&lookup, "PUSH_TIMEOUT_MS", 2000),
                push_channel_capacity: parse_or(&lookup, "PUSH_CHANNEL_CAPACITY", 64),
            },
            sweep: SweepConfig {
                enabled: parsed("SWEEP_ENABLED").unwrap_or(true),
                utc_offset_minutes: parse_or(&lookup, "SWEEP_UTC_OFFSET_MINUTES", 0),
                reactivate_manual: parsed("SWEEP_REACTIVATE_MANUAL").unwrap_or(false),
                shutdown_timeout: parse_or(&lookup, "SHUTDOWN_TIMEOUT", 10),
            },
            server: ServerConfig {
                log_level: lookup("RUST_LOG").unwrap_or_else(|| "info".to_string()),
                metrics_port: lookup("METRICS_PORT").and_then(|raw| raw.trim().parse().ok()),
            },
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    lookup(key)
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_slot_labels(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|label| !label.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn default_slot_labels() -> Vec<String> {
    DEFAULT_SLOT_LABELS.iter().map(ToString::to_string).collect()
}
