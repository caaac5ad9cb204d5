//! Process-wide coordination state
//!
//! One `GlobalState` sits behind a single mutex shared by the coordinator and
//! the emergency manager. Everyone else reads snapshots.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::decision::Decision;
use crate::emergency::EmergencyCondition;
use crate::feedback::{FeedbackBundle, SourceError};

/// Handle to the shared state
pub type SharedState = Arc<Mutex<GlobalState>>;

const ADAPTATION_WINDOW: usize = 10;
const STABILITY_WINDOW: usize = 5;

/// Fixed-capacity FIFO buffer; the oldest entry is evicted first
#[derive(Debug, Clone)]
pub struct BoundedHistory<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> BoundedHistory<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, item: T) {
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn last(&self) -> Option<&T> {
        self.items.back()
    }

    /// Iterate oldest to newest
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> {
        self.items.iter()
    }

    pub fn retain(&mut self, f: impl FnMut(&T) -> bool) {
        self.items.retain(f);
    }
}

impl<T: Clone> BoundedHistory<T> {
    /// Up to `n` most recent entries, oldest first
    pub fn recent(&self, n: usize) -> Vec<T> {
        let skip = self.items.len().saturating_sub(n);
        self.items.iter().skip(skip).cloned().collect()
    }
}

/// Current system status
#[derive(Debug, Clone, Serialize)]
pub struct SystemState {
    pub trading_active: bool,
    pub emergency_mode: bool,
    pub health_score: f64,
    pub performance_score: f64,
    pub last_decision: Option<Decision>,
    pub last_emergency_at: Option<DateTime<Utc>>,
}

impl Default for SystemState {
    fn default() -> Self {
        Self {
            trading_active: true,
            emergency_mode: false,
            health_score: 1.0,
            performance_score: 0.7,
            last_decision: None,
            last_emergency_at: None,
        }
    }
}

/// Rolling coordination metrics
#[derive(Debug, Clone, Serialize)]
pub struct CoordinationMetrics {
    pub total_decisions: u64,
    /// Mean confidence of the most recent decisions
    pub adaptation_rate: f64,
    /// Mean of the health and performance trends, 0.5 is flat
    pub system_stability: f64,
    pub cycles_completed: u64,
    pub cycle_failures: u64,
}

impl Default for CoordinationMetrics {
    fn default() -> Self {
        Self {
            total_decisions: 0,
            adaptation_rate: 0.0,
            system_stability: 0.5,
            cycles_completed: 0,
            cycle_failures: 0,
        }
    }
}

/// Read-only copy of the state handed to callers
#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub system: SystemState,
    pub metrics: CoordinationMetrics,
    pub recent_decisions: Vec<Decision>,
    pub decision_count: usize,
    pub emergency_count: usize,
    pub source_error_count: usize,
}

/// The shared coordination record
#[derive(Debug)]
pub struct GlobalState {
    pub system: SystemState,
    pub metrics: CoordinationMetrics,
    decisions: BoundedHistory<Decision>,
    emergencies: BoundedHistory<EmergencyCondition>,
    source_errors: BoundedHistory<SourceError>,
    /// (health, performance) at each decision
    scores: BoundedHistory<(f64, f64)>,
    coordination_started_at: Option<DateTime<Utc>>,
}

impl GlobalState {
    pub fn new(decision_capacity: usize, emergency_capacity: usize, error_capacity: usize) -> Self {
        Self {
            system: SystemState::default(),
            metrics: CoordinationMetrics::default(),
            decisions: BoundedHistory::new(decision_capacity),
            emergencies: BoundedHistory::new(emergency_capacity),
            source_errors: BoundedHistory::new(error_capacity),
            scores: BoundedHistory::new(decision_capacity),
            coordination_started_at: None,
        }
    }

    pub fn shared(self) -> SharedState {
        Arc::new(Mutex::new(self))
    }

    pub fn mark_started(&mut self) {
        self.coordination_started_at = Some(Utc::now());
    }

    /// Record a completed cycle's decision and scores.
    ///
    /// Emergency mode follows the decision's override flag and trading is only
    /// active when neither emergency mode nor a halting action is in effect.
    pub fn commit_cycle(&mut self, decision: Decision, bundle: &FeedbackBundle) {
        if let Some(health) = bundle.health_score() {
            self.system.health_score = health;
        }
        if let Some(performance) = bundle.performance_score() {
            self.system.performance_score = performance;
        }
        for error in &bundle.errors {
            self.source_errors.push(error.clone());
        }

        self.system.emergency_mode = decision.emergency_override;
        self.system.trading_active =
            !self.system.emergency_mode && !decision.primary_action.halts_trading();
        self.system.last_decision = Some(decision.clone());

        self.scores
            .push((self.system.health_score, self.system.performance_score));
        self.decisions.push(decision);

        self.metrics.total_decisions += 1;
        self.metrics.cycles_completed += 1;
        self.metrics.adaptation_rate = self.adaptation_rate();
        self.metrics.system_stability = self.stability();
    }

    /// Engage the kill switch: emergency mode on and trading off in one update
    pub fn enter_emergency(&mut self) {
        self.system.emergency_mode = true;
        self.system.trading_active = false;
        self.system.last_emergency_at = Some(Utc::now());
    }

    /// Clear emergency mode and drop emergencies older than `retention`
    pub fn clear_emergency(&mut self, retention: chrono::Duration) {
        self.system.emergency_mode = false;
        let cutoff = Utc::now() - retention;
        self.emergencies.retain(|e| e.timestamp >= cutoff);
    }

    pub fn record_emergency(&mut self, condition: EmergencyCondition) {
        self.emergencies.push(condition);
    }

    pub fn record_source_errors(&mut self, errors: &[SourceError]) {
        for error in errors {
            self.source_errors.push(error.clone());
        }
    }

    pub fn record_cycle_failure(&mut self) {
        self.metrics.cycle_failures += 1;
    }

    pub fn decisions(&self) -> &BoundedHistory<Decision> {
        &self.decisions
    }

    pub fn emergencies(&self) -> &BoundedHistory<EmergencyCondition> {
        &self.emergencies
    }

    pub fn source_errors(&self) -> &BoundedHistory<SourceError> {
        &self.source_errors
    }

    /// Time since the last decision, or since coordination started
    pub fn last_decision_age(&self) -> Option<chrono::Duration> {
        self.system
            .last_decision
            .as_ref()
            .map(|d| d.timestamp)
            .or(self.coordination_started_at)
            .map(|t| Utc::now() - t)
    }

    pub fn snapshot(&self, recent: usize) -> StateSnapshot {
        StateSnapshot {
            system: self.system.clone(),
            metrics: self.metrics.clone(),
            recent_decisions: self.decisions.recent(recent),
            decision_count: self.decisions.len(),
            emergency_count: self.emergencies.len(),
            source_error_count: self.source_errors.len(),
        }
    }

    fn adaptation_rate(&self) -> f64 {
        let recent: Vec<f64> = self
            .decisions
            .iter()
            .rev()
            .take(ADAPTATION_WINDOW)
            .map(|d| d.confidence)
            .collect();
        if recent.is_empty() {
            return 0.0;
        }
        recent.iter().sum::<f64>() / recent.len() as f64
    }

    fn stability(&self) -> f64 {
        let recent = self.scores.recent(STABILITY_WINDOW);
        let (Some(first), Some(last)) = (recent.first(), recent.last()) else {
            return 0.5;
        };
        let n = recent.len() as f64;
        let health_trend = (0.5 + (last.0 - first.0) / n).clamp(0.0, 1.0);
        let performance_trend = (0.5 + (last.1 - first.1) / n).clamp(0.0, 1.0);
        (health_trend + performance_trend) / 2.0
    }
}

impl Default for GlobalState {
    fn default() -> Self {
        Self::new(50, 100, 100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::{ConflictResolver, DecisionRuleSet, RuleThresholds, UnifiedDecisionEngine};
    use crate::feedback::testing::report;
    use crate::feedback::SourceKind;

    fn cycle(health: f64, performance: f64) -> (Decision, FeedbackBundle) {
        let engine = UnifiedDecisionEngine::new(
            DecisionRuleSet::standard(&RuleThresholds::default()),
            ConflictResolver::quiet(),
            9,
        );
        let bundle = FeedbackBundle::new(vec![
            report(SourceKind::Health, health),
            report(SourceKind::Performance, performance),
        ]);
        let decision = engine.decide(&engine.analyze(bundle.clone()));
        (decision, bundle)
    }

    #[test]
    fn test_bounded_history_evicts_oldest() {
        let mut history = BoundedHistory::new(3);
        for i in 0..5 {
            history.push(i);
        }
        assert_eq!(history.len(), 3);
        assert_eq!(history.iter().copied().collect::<Vec<_>>(), vec![2, 3, 4]);
        assert_eq!(history.recent(2), vec![3, 4]);
        assert_eq!(history.recent(10), vec![2, 3, 4]);
        assert_eq!(history.last(), Some(&4));
    }

    #[test]
    fn test_decision_history_never_exceeds_capacity() {
        let mut state = GlobalState::new(5, 10, 10);
        for _ in 0..12 {
            let (decision, bundle) = cycle(0.9, 0.7);
            state.commit_cycle(decision, &bundle);
        }
        assert_eq!(state.decisions().len(), 5);
        assert_eq!(state.metrics.total_decisions, 12);
    }

    #[test]
    fn test_default_state() {
        let state = GlobalState::default();
        assert!(state.system.trading_active);
        assert!(!state.system.emergency_mode);
        assert_eq!(state.system.health_score, 1.0);
        assert_eq!(state.system.performance_score, 0.7);
        assert!(state.last_decision_age().is_none());
    }

    #[test]
    fn test_commit_emergency_decision_halts_trading() {
        let mut state = GlobalState::default();
        let (decision, bundle) = cycle(0.1, 0.9);
        state.commit_cycle(decision, &bundle);
        assert!(state.system.emergency_mode);
        assert!(!state.system.trading_active);
        assert_eq!(state.system.health_score, 0.1);

        let (decision, bundle) = cycle(0.9, 0.7);
        state.commit_cycle(decision, &bundle);
        assert!(!state.system.emergency_mode);
        assert!(state.system.trading_active);
    }

    #[test]
    fn test_pause_halts_trading_without_emergency() {
        let mut state = GlobalState::default();
        let (decision, bundle) = cycle(0.5, 0.7);
        state.commit_cycle(decision, &bundle);
        assert!(!state.system.emergency_mode);
        assert!(!state.system.trading_active);
    }

    #[test]
    fn test_enter_emergency_is_atomic() {
        let mut state = GlobalState::default();
        state.enter_emergency();
        assert!(state.system.emergency_mode);
        assert!(!state.system.trading_active);
        assert!(state.system.last_emergency_at.is_some());

        state.clear_emergency(chrono::Duration::minutes(30));
        assert!(!state.system.emergency_mode);
        assert!(!state.system.trading_active);
    }

    #[test]
    fn test_metrics_adaptation_and_stability() {
        let mut state = GlobalState::default();
        for health in [0.7, 0.75, 0.8, 0.85, 0.9] {
            let (decision, bundle) = cycle(health, 0.7);
            state.commit_cycle(decision, &bundle);
        }
        // All MAINTAIN_NORMAL at 0.7 confidence
        assert!((state.metrics.adaptation_rate - 0.7).abs() < 1e-9);
        // Health rose 0.2 over 5 samples, performance flat
        assert!((state.metrics.system_stability - 0.52).abs() < 1e-9);
    }
}
