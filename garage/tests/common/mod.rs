//! Shared fixtures for the integration tests.

#![allow(dead_code)]
#![allow(clippy::unwrap_used)]

use chrono::NaiveDate;
use garage::store::InMemoryNotificationStore;
use garage::types::{BookingRequest, ServiceCapacity, ServiceSelection, Vehicle};
use garage::{Config, Garage, InMemoryDirectory};
use garage_core::push::PushChannel;
use garage_testing::{test_clock, InMemoryPushChannel};
use std::sync::Arc;

/// A wired garage plus handles on the fakes behind it
pub struct Harness {
    pub garage: Garage,
    pub directory: Arc<InMemoryDirectory>,
    pub inbox: Arc<InMemoryNotificationStore>,
}

/// Test configuration: no sweep task, short push timeout
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.sweep.enabled = false;
    config.notifications.push_timeout_ms = 50;
    config
}

pub fn harness_with(push: Arc<dyn PushChannel>, config: Config) -> Harness {
    let directory = Arc::new(InMemoryDirectory::new());
    let inbox = Arc::new(InMemoryNotificationStore::new());
    let garage = Garage::builder()
        .with_config(config)
        .with_clock(Arc::new(test_clock()))
        .with_directory(directory.clone())
        .with_notification_store(inbox.clone())
        .with_push_channel(push)
        .build();
    Harness {
        garage,
        directory,
        inbox,
    }
}

pub fn harness() -> (Harness, Arc<InMemoryPushChannel>) {
    let push = Arc::new(InMemoryPushChannel::new());
    (harness_with(push.clone(), test_config()), push)
}

/// A day in January 2025, after the test clock's "today"
pub fn day(n: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, n).unwrap()
}

pub fn booking(service: &ServiceCapacity, date: NaiveDate, time_slot: &str) -> BookingRequest {
    BookingRequest {
        vehicle: Vehicle {
            vehicle_type: "Car".to_string(),
            brand: "Volkswagen".to_string(),
            model: "Golf".to_string(),
            year: 2017,
            plate: "VW-2017".to_string(),
            fuel_type: "Diesel".to_string(),
        },
        service: ServiceSelection {
            service_id: service.id,
            category: service.category.clone(),
            service_type: service.name.clone(),
        },
        additional_requirements: "Please check the tyre pressure".to_string(),
        date,
        time_slot: time_slot.to_string(),
    }
}
