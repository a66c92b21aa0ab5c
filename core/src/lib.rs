//! # Garage Core
//!
//! Core traits and types for the garage appointment engine.
//!
//! Every aggregate in the engine (appointments, change requests) is written as a
//! reducer: a pure function that validates a command against the current record,
//! applies the resulting event, and returns descriptions of the side effects that
//! must follow (notification fan-out). The service layer commits the record first
//! and only then executes those effects, so a failing side effect can never undo
//! a committed state change.
//!
//! ## Core Concepts
//!
//! - **State**: the record an aggregate owns (one appointment, one appointment's
//!   change-request history)
//! - **Action**: commands and the events they produce
//! - **Reducer**: `(State, Action, Environment) → (State, Effects)`
//! - **Effect**: a side-effect description, executed by [`effect::execute`]
//! - **Environment**: injected dependencies ([`environment::Clock`], channels)
//!
//! ## Example
//!
//! ```ignore
//! use garage_core::*;
//!
//! impl Reducer for AppointmentReducer {
//!     type State = AppointmentState;
//!     type Action = AppointmentAction;
//!     type Environment = AppointmentEnvironment;
//!
//!     fn reduce(
//!         &self,
//!         state: &mut AppointmentState,
//!         action: AppointmentAction,
//!         env: &AppointmentEnvironment,
//!     ) -> SmallVec<[Effect<AppointmentAction>; 4]> {
//!         smallvec![Effect::None]
//!     }
//! }
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};
pub use smallvec::{smallvec, SmallVec};

/// Push channel abstraction for real-time notification delivery
pub mod push;

/// Declarative helpers for building effects
pub mod effect_macros;

/// Reducer module - the core trait for business logic
///
/// Reducers are pure functions: `(State, Action, Environment) → (State, Effects)`.
/// They hold all transition rules and are deterministic and testable without
/// any runtime.
pub mod reducer {
    use super::effect::Effect;
    use smallvec::SmallVec;

    /// The Reducer trait - core abstraction for business logic
    ///
    /// # Type Parameters
    ///
    /// - `State`: The record this reducer operates on
    /// - `Action`: The commands and events this reducer processes
    /// - `Environment`: The injected dependencies this reducer needs
    pub trait Reducer {
        /// The state type this reducer operates on
        type State;

        /// The action type this reducer processes
        type Action;

        /// The environment type with injected dependencies
        type Environment;

        /// Reduce an action into state changes and effects
        ///
        /// 1. Validates the command
        /// 2. Updates state in place
        /// 3. Returns effect descriptions to be executed after the state is committed
        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            env: &Self::Environment,
        ) -> SmallVec<[Effect<Self::Action>; 4]>;
    }
}

/// Effect module - side effect descriptions and their execution
///
/// Effects are values returned by reducers. Nothing happens until they are
/// handed to [`effect::execute`], which runs them and collects any feedback
/// actions they produce.
pub mod effect {
    use std::future::Future;
    use std::pin::Pin;

    /// Effect type - describes a side effect to be executed
    ///
    /// # Type Parameters
    ///
    /// - `Action`: The action type that effects can produce (feedback loop)
    pub enum Effect<Action> {
        /// No-op effect
        None,

        /// Arbitrary async computation
        ///
        /// Returns `Option<Action>` - if Some, the action is handed back to the caller
        Future(Pin<Box<dyn Future<Output = Option<Action>> + Send>>),
    }

    // Manual Debug implementation since Future doesn't implement Debug
    impl<Action> std::fmt::Debug for Effect<Action> {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Effect::None => write!(f, "Effect::None"),
                Effect::Future(_) => write!(f, "Effect::Future(<future>)"),
            }
        }
    }

    impl<Action> Effect<Action> {
        /// Returns true if executing this effect would do nothing
        #[must_use]
        pub const fn is_none(&self) -> bool {
            matches!(self, Effect::None)
        }
    }

    /// Execute a batch of effects in order and collect the feedback actions
    /// they produce.
    pub async fn execute<Action, I>(effects: I) -> Vec<Action>
    where
        I: IntoIterator<Item = Effect<Action>>,
    {
        let mut feedback = Vec::new();
        for effect in effects {
            if let Effect::Future(fut) = effect {
                feedback.extend(fut.await);
            }
        }
        feedback
    }
}

/// Environment module - dependency injection traits
///
/// All external dependencies are abstracted behind traits and injected
/// through a reducer's Environment parameter.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
