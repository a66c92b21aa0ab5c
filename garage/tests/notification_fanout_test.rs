//! Notification fan-out through the appointment services.
//!
//! Covers who gets an inbox row for each lifecycle event, the single admin
//! broadcast push, and that a broken push transport never blocks a state
//! change.

#![allow(clippy::expect_used, clippy::unwrap_used)] // Test code can use unwrap/expect

mod common;

use common::{booking, day, harness, harness_with, test_config};
use garage::types::{AppointmentStatus, NotificationType, Role};
use garage::{ErrorKind, GarageError};
use garage_core::push::{ChannelKey, PushChannel};
use garage_testing::{FailingPushChannel, StalledPushChannel};
use std::sync::Arc;

/// Test: booking with R admins on the roster.
///
/// For R in 0, 1 and 3:
/// - The customer gets one row and one private push
/// - Every admin gets one row and one private push
/// - Exactly one message goes out on `admin.broadcast`
#[tokio::test]
async fn booking_notifies_customer_and_every_admin() {
    for admins in [0usize, 1, 3] {
        let (h, push) = harness();
        let customer = h.directory.add("ana", "Ana Lopez", Role::Customer);
        let roster: Vec<_> = (0..admins)
            .map(|i| h.directory.add(&format!("admin-{i}"), &format!("Admin {i}"), Role::Admin))
            .collect();
        let service = h
            .garage
            .ledger()
            .register_service("Oil change", "Maintenance", 5)
            .await
            .unwrap();

        let appointment = h
            .garage
            .appointments()
            .create(customer.id, booking(&service, day(3), "09:00-10:00"))
            .await
            .unwrap();

        println!("  admins: {admins}, rows: {}", h.inbox.len().await);
        assert_eq!(h.inbox.len().await, 1 + admins);
        assert_eq!(push.published_to(&ChannelKey::AdminBroadcast).len(), 1);
        assert_eq!(push.published_to(&ChannelKey::user(customer.id)).len(), 1);

        let inbox = h.garage.notifications().list(customer.id).await.unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].kind, NotificationType::AppointmentCreated);
        assert_eq!(inbox[0].appointment_id, Some(appointment.id));
        assert!(!inbox[0].is_read);

        for admin in &roster {
            let rows = h.garage.notifications().list(admin.id).await.unwrap();
            assert_eq!(rows.len(), 1);
            assert_eq!(rows[0].title, "New Appointment");
            assert!(rows[0].message.contains("Ana Lopez"));
            assert_eq!(push.published_to(&ChannelKey::user(admin.id)).len(), 1);
        }
    }
}

/// Test: the broadcast payload is the JSON rendition of the notice.
#[tokio::test]
async fn admin_broadcast_payload_is_json() {
    let (h, push) = harness();
    let customer = h.directory.add("ana", "Ana Lopez", Role::Customer);
    h.directory.add("boss", "Big Boss", Role::Admin);
    let service = h
        .garage
        .ledger()
        .register_service("Oil change", "Maintenance", 5)
        .await
        .unwrap();

    let appointment = h
        .garage
        .appointments()
        .create(customer.id, booking(&service, day(3), "09:00-10:00"))
        .await
        .unwrap();

    let payloads = push.published_to(&ChannelKey::AdminBroadcast);
    let message: serde_json::Value = serde_json::from_str(&payloads[0]).unwrap();
    assert_eq!(message["title"], "New Appointment");
    assert_eq!(message["appointment_id"], appointment.id.to_string());
    assert!(message["id"].is_null());
}

/// Test: a status change to the current status notifies nobody.
#[tokio::test]
async fn unchanged_status_writes_no_rows() {
    let (h, push) = harness();
    let customer = h.directory.add("ana", "Ana Lopez", Role::Customer);
    let admin = h.directory.add("boss", "Big Boss", Role::Admin);
    let service = h
        .garage
        .ledger()
        .register_service("Oil change", "Maintenance", 5)
        .await
        .unwrap();
    let appointment = h
        .garage
        .appointments()
        .create(customer.id, booking(&service, day(3), "09:00-10:00"))
        .await
        .unwrap();
    h.garage.appointments().approve(appointment.id).await.unwrap();

    let rows = h.inbox.len().await;
    let pushes = push.publish_count();
    let same = h
        .garage
        .appointments()
        .set_status(appointment.id, AppointmentStatus::Confirmed, admin.actor())
        .await
        .unwrap();

    assert_eq!(same.status, AppointmentStatus::Confirmed);
    assert_eq!(h.inbox.len().await, rows);
    assert_eq!(push.publish_count(), pushes);
}

/// Test: push transport failures never fail the command.
///
/// - A channel that errors on every publish
/// - A channel whose publishes never complete (bounded by the push timeout)
///
/// In both cases the appointment is stored and the inbox rows are written.
#[tokio::test]
async fn broken_push_channels_do_not_block_state_changes() {
    let failing = Arc::new(FailingPushChannel::new());
    let stalled: Arc<dyn PushChannel> = Arc::new(StalledPushChannel);
    let cases = [
        ("failing", Arc::clone(&failing) as Arc<dyn PushChannel>),
        ("stalled", stalled),
    ];

    for (name, push) in cases {
        let h = harness_with(push, test_config());
        let customer = h.directory.add("ana", "Ana Lopez", Role::Customer);
        h.directory.add("boss", "Big Boss", Role::Admin);
        let service = h
            .garage
            .ledger()
            .register_service("Oil change", "Maintenance", 5)
            .await
            .unwrap();

        let appointment = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            h.garage
                .appointments()
                .create(customer.id, booking(&service, day(3), "09:00-10:00")),
        )
        .await
        .expect("create must not hang on the push channel")
        .unwrap();
        h.garage.appointments().approve(appointment.id).await.unwrap();

        println!("  {name}: {} rows", h.inbox.len().await);
        assert_eq!(
            h.garage.appointments().status_of(appointment.id).await.unwrap(),
            AppointmentStatus::Confirmed
        );
        // created: customer + admin, confirmed: customer
        assert_eq!(h.inbox.len().await, 3);
    }
    assert!(failing.attempts() > 0);
}

/// Test: who is notified as the appointment moves through its lifecycle.
///
/// - Assignment notifies the employee, the customer and the admins
/// - READY and COMPLETED notify the customer and the admins
/// - Admin rejection notifies only the customer
#[tokio::test]
async fn lifecycle_events_reach_their_audiences() {
    let (h, _) = harness();
    let customer = h.directory.add("ana", "Ana Lopez", Role::Customer);
    let employee = h.directory.add("sam", "Sam Wrench", Role::Employee);
    let admin = h.directory.add("boss", "Big Boss", Role::Admin);
    let service = h
        .garage
        .ledger()
        .register_service("Brakes", "Safety", 5)
        .await
        .unwrap();
    let appointments = h.garage.appointments();
    let notifications = h.garage.notifications();

    let first = appointments
        .create(customer.id, booking(&service, day(4), "10:00-11:00"))
        .await
        .unwrap();
    appointments.approve(first.id).await.unwrap();
    appointments
        .assign_employee(first.id, employee.id)
        .await
        .unwrap();

    let employee_inbox = notifications.list(employee.id).await.unwrap();
    assert_eq!(employee_inbox.len(), 1);
    assert_eq!(employee_inbox[0].kind, NotificationType::EmployeeAssigned);
    assert!(employee_inbox[0].message.contains("VW-2017"));
    let latest = &notifications.list(customer.id).await.unwrap()[0];
    assert!(latest.message.contains("Sam Wrench"));

    appointments
        .set_status(first.id, AppointmentStatus::Ready, employee.actor())
        .await
        .unwrap();
    appointments
        .set_status(first.id, AppointmentStatus::Completed, admin.actor())
        .await
        .unwrap();

    let kinds: Vec<_> = notifications
        .list(customer.id)
        .await
        .unwrap()
        .into_iter()
        .map(|n| n.kind)
        .collect();
    for kind in [
        NotificationType::AppointmentCreated,
        NotificationType::AppointmentConfirmed,
        NotificationType::StatusChangedInService,
        NotificationType::StatusChangedReady,
        NotificationType::StatusChangedCompleted,
    ] {
        assert!(kinds.contains(&kind), "customer missing {kind:?}");
    }
    // created, service started, ready, completed
    assert_eq!(notifications.list(admin.id).await.unwrap().len(), 4);

    let second = appointments
        .create(customer.id, booking(&service, day(5), "10:00-11:00"))
        .await
        .unwrap();
    let admin_rows = notifications.list(admin.id).await.unwrap().len();
    appointments.reject(second.id).await.unwrap();
    assert_eq!(notifications.list(admin.id).await.unwrap().len(), admin_rows);
    let latest = &notifications.list(customer.id).await.unwrap()[0];
    assert_eq!(latest.title, "Appointment Cancelled");
    assert_eq!(latest.appointment_id, Some(second.id));
}

/// Test: only the recipient may read or delete a notification.
#[tokio::test]
async fn inbox_is_private_to_its_recipient() {
    let (h, _) = harness();
    let customer = h.directory.add("ana", "Ana Lopez", Role::Customer);
    let stranger = h.directory.add("eve", "Eve Other", Role::Customer);
    let service = h
        .garage
        .ledger()
        .register_service("Oil change", "Maintenance", 5)
        .await
        .unwrap();
    h.garage
        .appointments()
        .create(customer.id, booking(&service, day(3), "09:00-10:00"))
        .await
        .unwrap();

    let notifications = h.garage.notifications();
    let row = notifications.list(customer.id).await.unwrap().remove(0);

    let err = notifications.mark_read(row.id, stranger.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
    let err = notifications.delete(row.id, stranger.id).await.unwrap_err();
    assert!(matches!(err, GarageError::Forbidden(_)));

    let read = notifications.mark_read(row.id, customer.id).await.unwrap();
    assert!(read.is_read);
    let again = notifications.mark_read(row.id, customer.id).await.unwrap();
    assert_eq!(again.read_at, read.read_at);
    assert_eq!(notifications.unread_count(customer.id).await.unwrap(), 0);

    notifications.delete(row.id, customer.id).await.unwrap();
    assert!(notifications.list(customer.id).await.unwrap().is_empty());
    let err = notifications.delete(row.id, customer.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}
