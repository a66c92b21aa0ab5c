//! Error types for the garage engine.
//!
//! [`GarageError`] is what every public operation returns. Transport layers map
//! it through [`GarageError::kind`] instead of matching variants.

use crate::store::StoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Machine-readable reason of a [`GarageError::Conflict`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictReason {
    /// The time slot is already booked on that date
    SlotTaken,
    /// The service has no daily slots left
    CapacityExhausted,
    /// The service was switched off by an admin
    ServiceInactive,
    /// The appointment already has a change request awaiting a decision
    PendingRequestExists,
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::SlotTaken => "SLOT_TAKEN",
            Self::CapacityExhausted => "CAPACITY_EXHAUSTED",
            Self::ServiceInactive => "SERVICE_INACTIVE",
            Self::PendingRequestExists => "PENDING_REQUEST_EXISTS",
        })
    }
}

/// Coarse classification of a [`GarageError`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Referenced entity does not exist
    NotFound,
    /// Caller may not perform the operation
    Forbidden,
    /// Operation is illegal in the entity's current state
    InvalidState,
    /// Operation collides with existing bookings or requests
    Conflict,
    /// Malformed input
    Validation,
    /// Persistence or directory failure
    Storage,
}

/// Errors returned by garage operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GarageError {
    /// Entity not found
    #[error("{entity} {id} not found")]
    NotFound {
        /// Entity kind ("Appointment", "Service", ...)
        entity: &'static str,
        /// Identifier that was looked up
        id: String,
    },

    /// Caller is not allowed to do this
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Illegal in the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Collides with existing state
    #[error("Conflict ({reason}): {message}")]
    Conflict {
        /// Sub-reason
        reason: ConflictReason,
        /// Human-readable detail
        message: String,
    },

    /// Malformed input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Persistence failure
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

impl GarageError {
    /// Shorthand for [`GarageError::NotFound`]
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl fmt::Display) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Shorthand for [`GarageError::Conflict`]
    #[must_use]
    pub fn conflict(reason: ConflictReason, message: impl Into<String>) -> Self {
        Self::Conflict {
            reason,
            message: message.into(),
        }
    }

    /// Classification for transport layers
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::InvalidState(_) => ErrorKind::InvalidState,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Storage(_) => ErrorKind::Storage,
        }
    }

    /// Conflict sub-reason, if this is a conflict
    #[must_use]
    pub const fn conflict_reason(&self) -> Option<ConflictReason> {
        match self {
            Self::Conflict { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}
