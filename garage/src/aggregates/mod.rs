//! Reducers holding the garage's business rules.
//!
//! Both aggregates are pure: they never touch a store. The services in
//! [`crate::app`] load a record, reduce one command over it, persist the result
//! and only then run the returned effects.

pub mod appointment;
pub mod change_request;

pub use appointment::{
    validate_booking, validate_slot, AppointmentAction, AppointmentEnvironment, AppointmentReducer,
    AppointmentState,
};
pub use change_request::{
    ChangeRequestAction, ChangeRequestEnvironment, ChangeRequestReducer, ChangeRequestState,
};
