//! Injectable failure strategies for order processing.
//!
//! Processing is a stand-in for a downstream call that can fail
//! transiently. The orchestrator asks a [`FailurePredicate`] whether each
//! attempt fails, so tests can script exact success/failure sequences.

use std::{
    collections::VecDeque,
    fmt,
    sync::{Arc, Mutex},
};

use orderflow_core::Order;
use rand::Rng;

use crate::error::{DeliveryError, Result};

/// Default probability that a processing attempt fails.
pub const DEFAULT_FAILURE_RATE: f64 = 0.2;

/// Decides whether a processing attempt for an order fails.
pub trait FailurePredicate: Send + Sync + fmt::Debug {
    /// Returns `true` if this attempt should fail.
    fn should_fail(&self, order: &Order) -> bool;
}

/// Fails each attempt independently with a fixed probability.
#[derive(Debug, Clone, Copy)]
pub struct RandomFailure {
    probability: f64,
}

impl RandomFailure {
    /// Creates a predicate failing with `probability` in `[0.0, 1.0]`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the probability is out of range.
    pub fn new(probability: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&probability) {
            return Err(DeliveryError::configuration(format!(
                "failure probability must be between 0.0 and 1.0, got {probability}"
            )));
        }
        Ok(Self { probability })
    }

    /// Configured failure probability.
    pub fn probability(&self) -> f64 {
        self.probability
    }
}

impl Default for RandomFailure {
    fn default() -> Self {
        Self { probability: DEFAULT_FAILURE_RATE }
    }
}

impl FailurePredicate for RandomFailure {
    fn should_fail(&self, _order: &Order) -> bool {
        rand::rng().random_bool(self.probability)
    }
}

/// Never fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverFail;

impl FailurePredicate for NeverFail {
    fn should_fail(&self, _order: &Order) -> bool {
        false
    }
}

/// Always fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysFail;

impl FailurePredicate for AlwaysFail {
    fn should_fail(&self, _order: &Order) -> bool {
        true
    }
}

/// Replays a queued sequence of outcomes, then falls back to a default.
///
/// Clones share the queue, so a test can keep a handle and push more
/// outcomes while the orchestrator is running.
#[derive(Debug, Clone)]
pub struct ScriptedOutcomes {
    outcomes: Arc<Mutex<VecDeque<bool>>>,
    fail_when_exhausted: bool,
}

impl ScriptedOutcomes {
    /// Creates a script of `true` = fail, `false` = succeed outcomes.
    /// Once the script runs out every attempt succeeds.
    pub fn new(outcomes: impl IntoIterator<Item = bool>) -> Self {
        Self {
            outcomes: Arc::new(Mutex::new(outcomes.into_iter().collect())),
            fail_when_exhausted: false,
        }
    }

    /// Fails `failures` times, then succeeds.
    pub fn fail_times(failures: usize) -> Self {
        Self::new(std::iter::repeat(true).take(failures))
    }

    /// Sets the outcome used once the script is exhausted.
    #[must_use]
    pub fn then_fail(mut self) -> Self {
        self.fail_when_exhausted = true;
        self
    }

    /// Appends an outcome to the script.
    pub fn push(&self, fail: bool) {
        if let Ok(mut outcomes) = self.outcomes.lock() {
            outcomes.push_back(fail);
        }
    }

    /// Outcomes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.outcomes.lock().map(|o| o.len()).unwrap_or(0)
    }
}

impl Default for ScriptedOutcomes {
    fn default() -> Self {
        Self::new(std::iter::empty())
    }
}

impl FailurePredicate for ScriptedOutcomes {
    fn should_fail(&self, _order: &Order) -> bool {
        self.outcomes
            .lock()
            .ok()
            .and_then(|mut outcomes| outcomes.pop_front())
            .unwrap_or(self.fail_when_exhausted)
    }
}

/// Runs one processing attempt for an order.
///
/// # Errors
///
/// Returns [`DeliveryError::TransientProcessingFailure`] when the predicate
/// decides the attempt fails.
pub fn process(predicate: &dyn FailurePredicate, order: &Order) -> Result<()> {
    if predicate.should_fail(order) {
        return Err(DeliveryError::transient(order.order_id.clone()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use orderflow_core::OrderId;

    use super::*;

    fn order() -> Order {
        Order::new(OrderId::new("1001").unwrap(), "Item1", 10.0).unwrap()
    }

    #[test]
    fn random_failure_validates_probability() {
        assert!(RandomFailure::new(-0.1).is_err());
        assert!(RandomFailure::new(1.1).is_err());
        assert_eq!(RandomFailure::new(0.5).unwrap().probability(), 0.5);
        assert_eq!(RandomFailure::default().probability(), DEFAULT_FAILURE_RATE);
    }

    #[test]
    fn random_failure_extremes_are_deterministic() {
        let never = RandomFailure::new(0.0).unwrap();
        let always = RandomFailure::new(1.0).unwrap();
        for _ in 0..100 {
            assert!(!never.should_fail(&order()));
            assert!(always.should_fail(&order()));
        }
    }

    #[test]
    fn scripted_outcomes_replay_in_order() {
        let script = ScriptedOutcomes::new([true, false, true]);
        let outcomes: Vec<_> = (0..5).map(|_| script.should_fail(&order())).collect();
        assert_eq!(outcomes, vec![true, false, true, false, false]);
    }

    #[test]
    fn scripted_outcomes_fallback_to_failure() {
        let script = ScriptedOutcomes::fail_times(1).then_fail();
        assert!(script.should_fail(&order()));
        assert!(script.should_fail(&order()));
        assert_eq!(script.remaining(), 0);
    }

    #[test]
    fn process_maps_failure_to_transient_error() {
        let err = process(&AlwaysFail, &order()).unwrap_err();
        assert!(err.is_retryable());
        assert!(process(&NeverFail, &order()).is_ok());
    }
}
