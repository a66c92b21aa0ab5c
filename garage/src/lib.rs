//! Garage Service Appointments - booking, lifecycle and notifications for a
//! vehicle repair shop.
//!
//! Customers book a time slot on a date for a catalog service; staff move the
//! appointment through its lifecycle; customers can ask to change a booking
//! and admins decide; every status change fans out inbox notifications and
//! live pushes.
//!
//! # Architecture
//!
//! ```text
//!                    ┌──────────────────────┐
//!   commands ──────▶ │ AppointmentService   │──▶ AppointmentReducer (pure)
//!                    │ ChangeRequestService │──▶ ChangeRequestReducer (pure)
//!                    └──────────┬───────────┘
//!                               │ reserve / release / booked_slots
//!                               ▼
//!                    ┌──────────────────────┐        ┌─────────────┐
//!                    │   CapacityLedger     │ ◀───── │ DailySweep  │
//!                    └──────────────────────┘ reset  └─────────────┘
//!
//!   effects ───▶ NotificationRouter ──▶ NotificationDispatcher ──▶ inbox rows
//!                                                              └─▶ push channel
//! ```
//!
//! # Key Features
//!
//! ## 1. Capacity without lost updates
//!
//! Each catalog service has a daily slot budget. Reserve, release and the
//! nightly reset all run under a per-service lock:
//!
//! ```text
//! N customers race for K < N slots  →  exactly K bookings succeed
//! last slot taken                   →  service deactivated (Exhausted)
//! midnight sweep                    →  slots restored, Exhausted re-activated
//! ```
//!
//! ## 2. State changes commit before fan-out
//!
//! Reducers return notification effects; services persist the new record and
//! only then execute them. A failed notification never rolls anything back.
//!
//! # Usage
//!
//! Build a [`Garage`] with [`GarageBuilder`], then use its services.

#![forbid(unsafe_code)]

pub mod aggregates;
pub mod app;
pub mod config;
pub mod directory;
pub mod error;
pub mod ledger;
pub mod lifecycle;
pub mod locks;
pub mod metrics;
pub mod notifications;
pub mod scheduler;
pub mod store;
pub mod types;

pub use app::{AppointmentService, ChangeRequestService};
pub use config::Config;
pub use directory::{InMemoryDirectory, UserDirectory};
pub use error::{ConflictReason, ErrorKind, GarageError};
pub use ledger::{CapacityLedger, LedgerPolicy, Reservation, SweepReport};
pub use lifecycle::{Garage, GarageBuilder};
pub use notifications::{AppointmentEvent, AppointmentNotifier, FanOutReport, NotificationDispatcher};
pub use scheduler::DailySweep;
pub use types::*;
