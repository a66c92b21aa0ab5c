//! Application services - command handlers that load, reduce, persist and
//! then run effects.

pub mod appointments;
pub mod change_requests;

pub use appointments::AppointmentService;
pub use change_requests::ChangeRequestService;
