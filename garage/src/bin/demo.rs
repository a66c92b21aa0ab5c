//! In-memory garage walkthrough.
//!
//! Seeds a small catalog and a few users, then books, adjudicates and services
//! appointments while logging every outcome. Configure through environment
//! variables (or a `.env` file); `RUST_LOG` controls verbosity and
//! `METRICS_PORT` exposes the business counters for Prometheus. Without it the
//! counters are logged at the end of the run.

use chrono::{Days, Utc};
use garage::types::{
    AppointmentStatus, AppointmentUpdate, BookingRequest, Role, ServiceCapacity, ServiceSelection,
    Vehicle,
};
use garage::{Config, Garage, InMemoryDirectory};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn booking(service: &ServiceCapacity, days_ahead: u64, time_slot: &str, plate: &str) -> BookingRequest {
    BookingRequest {
        vehicle: Vehicle {
            vehicle_type: "Car".to_string(),
            brand: "Toyota".to_string(),
            model: "Corolla".to_string(),
            year: 2019,
            plate: plate.to_string(),
            fuel_type: "Petrol".to_string(),
        },
        service: ServiceSelection {
            service_id: service.id,
            category: service.category.clone(),
            service_type: service.name.clone(),
        },
        additional_requirements: String::new(),
        date: Utc::now().date_naive() + Days::new(days_ahead),
        time_slot: time_slot.to_string(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let config = Config::from_env();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.server.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting garage demo");

    let metrics_handle = match config.server.metrics_port {
        Some(port) => {
            PrometheusBuilder::new()
                .with_http_listener(([0, 0, 0, 0], port))
                .install()?;
            info!(port, "Prometheus metrics available at /metrics");
            None
        }
        None => Some(PrometheusBuilder::new().install_recorder()?),
    };
    garage::metrics::register_business_metrics();

    let directory = Arc::new(InMemoryDirectory::new());
    let jane = directory.add("jane", "Jane Doe", Role::Customer);
    let omar = directory.add("omar", "Omar Haddad", Role::Customer);
    let sam = directory.add("sam", "Sam Wrench", Role::Employee);
    let boss = directory.add("boss", "Big Boss", Role::Admin);

    let first_slot = config
        .scheduling
        .slot_labels
        .first()
        .cloned()
        .unwrap_or_default();
    let second_slot = config
        .scheduling
        .slot_labels
        .get(1)
        .cloned()
        .unwrap_or_else(|| first_slot.clone());

    let mut garage = Garage::builder()
        .with_config(config)
        .with_directory(directory)
        .build();
    garage.start();

    let oil = garage
        .ledger()
        .register_service("Oil change", "Maintenance", 1)
        .await?;
    let brakes = garage
        .ledger()
        .register_service("Brake inspection", "Safety", 4)
        .await?;

    // Booking and capacity
    let appointments = garage.appointments();
    let first = appointments
        .create(jane.id, booking(&oil, 1, &first_slot, "JD-001"))
        .await?;
    info!(appointment_id = %first.id, "Jane booked the last oil change");

    match appointments
        .create(omar.id, booking(&oil, 2, &first_slot, "OH-777"))
        .await
    {
        Ok(_) => warn!("Omar should not have found an oil change slot"),
        Err(e) => info!(error = %e, "Omar was turned away"),
    }

    let report = garage.sweep().run_once().await?;
    info!(reactivated = report.reactivated, "Capacity reset by hand");
    let second = appointments
        .create(omar.id, booking(&oil, 2, &first_slot, "OH-777"))
        .await?;
    info!(appointment_id = %second.id, "Omar booked after the reset");

    // Lifecycle
    appointments.approve(first.id).await?;
    appointments.assign_employee(first.id, sam.id).await?;
    appointments
        .set_status(first.id, AppointmentStatus::Ready, sam.actor())
        .await?;
    let done = appointments
        .set_status(first.id, AppointmentStatus::Completed, boss.actor())
        .await?;
    info!(appointment_id = %done.id, status = %done.status, "Jane's car is done");

    if let Err(e) = appointments.cancel(first.id, jane.id).await {
        info!(error = %e, "Completed appointments stay completed");
    }

    // Change request
    let requests = garage.change_requests();
    let request = requests
        .submit(second.id, omar.id, "I need a brake check instead")
        .await?;
    requests
        .approve(request.id, Some("Go ahead".to_string()))
        .await?;
    let edited = appointments
        .update_appointment(
            second.id,
            omar.id,
            AppointmentUpdate {
                time_slot: Some(second_slot),
                service: Some(ServiceSelection {
                    service_id: brakes.id,
                    category: brakes.category.clone(),
                    service_type: brakes.name.clone(),
                }),
                ..AppointmentUpdate::default()
            },
        )
        .await?;
    info!(
        appointment_id = %edited.id,
        time_slot = %edited.time_slot,
        service = %edited.service.service_type,
        "Omar switched service"
    );

    // Inboxes
    let notifications = garage.notifications();
    for user in [&jane, &omar, &sam, &boss] {
        let unread = notifications.unread_count(user.id).await?;
        info!(user = %user.username, unread, "Inbox");
    }
    let marked = notifications.mark_all_read(boss.id).await?;
    info!(marked, "Admin cleared their inbox");

    for view in appointments.admin_view().await? {
        info!(
            appointment_id = %view.appointment.id,
            customer = view.customer_name.as_deref().unwrap_or("?"),
            employee = view.employee_name.as_deref().unwrap_or("-"),
            status = %view.appointment.status,
            "Dashboard"
        );
    }

    if let Some(handle) = metrics_handle {
        for line in handle.render().lines().filter(|l| l.starts_with("garage_")) {
            info!(metric = line, "Business metric");
        }
    }

    garage.shutdown().await;
    Ok(())
}
