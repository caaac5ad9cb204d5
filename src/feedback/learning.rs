//! Per-action confidence learned from decision outcomes

use std::collections::HashMap;

use crate::decision::Action;

use super::Outcome;

const LEARNING_RATE: f64 = 0.1;
const MIN_CONFIDENCE: f64 = 0.1;
const MAX_CONFIDENCE: f64 = 0.99;

/// Confidence a source places in each action it recommends.
///
/// Correct outcomes pull the value toward 1.0, incorrect ones toward 0.0, at a
/// fixed learning rate.
#[derive(Debug, Clone)]
pub struct AdaptiveConfidence {
    initial: f64,
    values: HashMap<Action, f64>,
    correct: u64,
    total: u64,
}

impl AdaptiveConfidence {
    pub fn new(initial: f64) -> Self {
        Self {
            initial: initial.clamp(MIN_CONFIDENCE, MAX_CONFIDENCE),
            values: HashMap::new(),
            correct: 0,
            total: 0,
        }
    }

    pub fn confidence(&self, action: Action) -> f64 {
        self.values.get(&action).copied().unwrap_or(self.initial)
    }

    /// Update from an outcome, returning whether the action was judged correct
    pub fn learn(&mut self, outcome: &Outcome) -> bool {
        let correct = outcome.was_correct();
        let target = if correct { 1.0 } else { 0.0 };
        let current = self.confidence(outcome.action);
        let updated = (current + LEARNING_RATE * (target - current)).clamp(MIN_CONFIDENCE, MAX_CONFIDENCE);
        self.values.insert(outcome.action, updated);

        self.total += 1;
        if correct {
            self.correct += 1;
        }
        correct
    }

    /// Fraction of outcomes judged correct
    pub fn accuracy(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.correct as f64 / self.total as f64
    }
}

impl Default for AdaptiveConfidence {
    fn default() -> Self {
        Self::new(0.7)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn outcome(action: Action, stabilized: bool) -> Outcome {
        Outcome {
            decision_id: Uuid::new_v4(),
            action,
            system_stabilized: stabilized,
            health_improved: false,
            losses_avoided: false,
            major_degradation: false,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_correct_outcome_raises_confidence() {
        let mut learner = AdaptiveConfidence::new(0.7);
        assert!(learner.learn(&outcome(Action::EmergencyStop, true)));
        assert!((learner.confidence(Action::EmergencyStop) - 0.73).abs() < 1e-9);
        assert_eq!(learner.confidence(Action::ContinueNormal), 0.7);
    }

    #[test]
    fn test_incorrect_outcome_lowers_confidence() {
        let mut learner = AdaptiveConfidence::new(0.7);
        assert!(!learner.learn(&outcome(Action::EmergencyStop, false)));
        assert!((learner.confidence(Action::EmergencyStop) - 0.63).abs() < 1e-9);
        assert_eq!(learner.accuracy(), 0.0);
    }

    #[test]
    fn test_confidence_is_bounded() {
        let mut learner = AdaptiveConfidence::new(0.7);
        for _ in 0..200 {
            learner.learn(&outcome(Action::EmergencyStop, true));
        }
        assert!(learner.confidence(Action::EmergencyStop) <= 0.99);

        for _ in 0..200 {
            learner.learn(&outcome(Action::EmergencyStop, false));
        }
        assert!(learner.confidence(Action::EmergencyStop) >= 0.1);
    }
}
