//! Ergonomic testing utilities for reducers
//!
//! This module provides a fluent API for testing reducers with readable Given-When-Then syntax.

#![allow(clippy::module_name_repetitions)] // ReducerTest is the natural name

use garage_core::{effect::Effect, reducer::Reducer};

/// Type alias for state assertion functions
type StateAssertion<S> = Box<dyn FnOnce(&S)>;

/// Type alias for effect assertion functions
type EffectAssertion<A> = Box<dyn FnOnce(&[Effect<A>])>;

/// Fluent API for testing reducers with Given-When-Then syntax
///
/// # Example
///
/// ```ignore
/// use garage_testing::ReducerTest;
///
/// ReducerTest::new(AppointmentReducer::new())
///     .with_env(test_environment())
///     .given_state(AppointmentState::with(pending_appointment()))
///     .when_action(AppointmentAction::Approve)
///     .then_state(|state| {
///         assert_eq!(state.status(), Some(AppointmentStatus::Confirmed));
///     })
///     .then_effects(|effects| {
///         assertions::assert_has_future_effect(effects);
///     })
///     .run();
/// ```
pub struct ReducerTest<R, S, A, E>
where
    R: Reducer<State = S, Action = A, Environment = E>,
{
    reducer: R,
    environment: Option<E>,
    initial_state: Option<S>,
    history: Vec<A>,
    action: Option<A>,
    state_assertions: Vec<StateAssertion<S>>,
    effect_assertions: Vec<EffectAssertion<A>>,
}

impl<R, S, A, E> ReducerTest<R, S, A, E>
where
    R: Reducer<State = S, Action = A, Environment = E>,
    S: Clone,
    A: Clone,
{
    /// Create a new reducer test with the given reducer
    #[must_use]
    pub const fn new(reducer: R) -> Self {
        Self {
            reducer,
            environment: None,
            initial_state: None,
            history: Vec::new(),
            action: None,
            state_assertions: Vec::new(),
            effect_assertions: Vec::new(),
        }
    }

    /// Set the environment for the test
    #[must_use]
    pub fn with_env(mut self, env: E) -> Self {
        self.environment = Some(env);
        self
    }

    /// Set the initial state (Given)
    #[must_use]
    pub fn given_state(mut self, state: S) -> Self {
        self.initial_state = Some(state);
        self
    }

    /// Replay actions on top of the initial state before the action under test.
    ///
    /// Effects produced while replaying are dropped; only the effects of the
    /// action under test reach `then_effects`.
    #[must_use]
    pub fn given_actions(mut self, actions: impl IntoIterator<Item = A>) -> Self {
        self.history.extend(actions);
        self
    }

    /// Set the action to test (When)
    #[must_use]
    pub fn when_action(mut self, action: A) -> Self {
        self.action = Some(action);
        self
    }

    /// Add an assertion about the resulting state (Then)
    #[must_use]
    pub fn then_state<F>(mut self, assertion: F) -> Self
    where
        F: FnOnce(&S) + 'static,
    {
        self.state_assertions.push(Box::new(assertion));
        self
    }

    /// Add an assertion about the resulting effects (Then)
    #[must_use]
    pub fn then_effects<F>(mut self, assertion: F) -> Self
    where
        F: FnOnce(&[Effect<A>]) + 'static,
    {
        self.effect_assertions.push(Box::new(assertion));
        self
    }

    /// Run the test and execute all assertions
    ///
    /// # Panics
    ///
    /// Panics if initial state, action, or environment is not set,
    /// or if any assertions fail.
    #[allow(clippy::panic)] // Test code can panic
    #[allow(clippy::expect_used)] // Test code can use expect
    pub fn run(self) {
        let mut state = self
            .initial_state
            .expect("Initial state must be set with given_state()");

        let action = self.action.expect("Action must be set with when_action()");

        let env = self
            .environment
            .expect("Environment must be set with with_env()");

        for past in self.history {
            let _ = self.reducer.reduce(&mut state, past, &env);
        }

        // Execute reducer
        let effects = self.reducer.reduce(&mut state, action, &env);

        // Run state assertions
        for assertion in self.state_assertions {
            assertion(&state);
        }

        // Run effect assertions
        for assertion in self.effect_assertions {
            assertion(&effects);
        }
    }
}

/// Helper assertions for effects
pub mod assertions {
    use garage_core::effect::Effect;

    /// Assert that there are no effects
    ///
    /// # Panics
    ///
    /// Panics if effects is not empty.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_no_effects<A: std::fmt::Debug>(effects: &[Effect<A>]) {
        assert!(
            effects.is_empty() || matches!(effects, [Effect::None]),
            "Expected no effects, but found {}: {:?}",
            effects.len(),
            effects
        );
    }

    /// Assert the number of effects
    ///
    /// # Panics
    ///
    /// Panics if the number of effects doesn't match expected.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_effects_count<A>(effects: &[Effect<A>], expected: usize) {
        assert_eq!(
            effects.len(),
            expected,
            "Expected {} effects, but found {}",
            expected,
            effects.len()
        );
    }

    /// Assert that effects contain at least one Future effect
    ///
    /// # Panics
    ///
    /// Panics if no Future effect is found.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_has_future_effect<A>(effects: &[Effect<A>]) {
        assert!(
            effects.iter().any(|e| matches!(e, Effect::Future(_))),
            "Expected at least one Future effect, but none found"
        );
    }

    /// Assert that no effect would do anything when executed
    ///
    /// # Panics
    ///
    /// Panics if any effect carries work.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_only_none_effects<A: std::fmt::Debug>(effects: &[Effect<A>]) {
        assert!(
            effects.iter().all(Effect::is_none),
            "Expected only no-op effects, but found {effects:?}"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use garage_core::effect::Effect;
    use garage_core::reducer::Reducer;
    use garage_core::{smallvec, SmallVec};

    #[derive(Clone, Debug)]
    struct BayState {
        occupied: u32,
        capacity: u32,
    }

    #[derive(Clone, Debug)]
    enum BayAction {
        VehicleIn,
        VehicleOut,
        BayFull,
    }

    struct BayReducer;

    struct BayEnv;

    impl Reducer for BayReducer {
        type State = BayState;
        type Action = BayAction;
        type Environment = BayEnv;

        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            _env: &Self::Environment,
        ) -> SmallVec<[Effect<Self::Action>; 4]> {
            match action {
                BayAction::VehicleIn if state.occupied < state.capacity => {
                    state.occupied += 1;
                    smallvec![Effect::None]
                },
                BayAction::VehicleIn => {
                    smallvec![Effect::Future(Box::pin(async { Some(BayAction::BayFull) }))]
                },
                BayAction::VehicleOut => {
                    state.occupied = state.occupied.saturating_sub(1);
                    SmallVec::new()
                },
                BayAction::BayFull => SmallVec::new(),
            }
        }
    }

    #[test]
    fn vehicle_in_takes_a_bay() {
        ReducerTest::new(BayReducer)
            .with_env(BayEnv)
            .given_state(BayState { occupied: 0, capacity: 2 })
            .when_action(BayAction::VehicleIn)
            .then_state(|state| {
                assert_eq!(state.occupied, 1);
            })
            .then_effects(|effects| {
                assertions::assert_no_effects(effects);
                assertions::assert_only_none_effects(effects);
            })
            .run();
    }

    #[test]
    fn full_bay_reports_through_an_effect() {
        ReducerTest::new(BayReducer)
            .with_env(BayEnv)
            .given_state(BayState { occupied: 2, capacity: 2 })
            .when_action(BayAction::VehicleIn)
            .then_state(|state| {
                assert_eq!(state.occupied, 2);
            })
            .then_effects(|effects| {
                assertions::assert_effects_count(effects, 1);
                assertions::assert_has_future_effect(effects);
            })
            .run();
    }

    #[test]
    fn history_is_replayed_before_the_action() {
        ReducerTest::new(BayReducer)
            .with_env(BayEnv)
            .given_state(BayState { occupied: 0, capacity: 2 })
            .given_actions([BayAction::VehicleIn, BayAction::VehicleIn])
            .when_action(BayAction::VehicleIn)
            .then_state(|state| {
                assert_eq!(state.occupied, 2);
            })
            .then_effects(|effects| {
                assertions::assert_has_future_effect(effects);
            })
            .run();
    }

    #[test]
    fn vehicle_out_frees_a_bay() {
        ReducerTest::new(BayReducer)
            .with_env(BayEnv)
            .given_state(BayState { occupied: 1, capacity: 2 })
            .when_action(BayAction::VehicleOut)
            .then_state(|state| {
                assert_eq!(state.occupied, 0);
            })
            .then_effects(|effects| {
                assertions::assert_effects_count(effects, 0);
            })
            .run();
    }
}
