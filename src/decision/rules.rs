//! Decision rules
//!
//! A rule is a predicate over the cycle's feedback bundle mapped to an action
//! with a static priority (1-10, higher wins) and a declared confidence.
//! Rules are immutable once registered.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::feedback::{FeedbackBundle, Level, MarketTrend};

use super::types::Action;

/// Predicate evaluated against the current feedback bundle
pub type Condition = Arc<dyn Fn(&FeedbackBundle) -> bool + Send + Sync>;

/// Name of the catch-all rule every rule set carries
pub const MAINTAIN_NORMAL: &str = "MAINTAIN_NORMAL";

/// A condition -> action mapping
#[derive(Clone)]
pub struct DecisionRule {
    name: String,
    action: Action,
    priority: u8,
    confidence: f64,
    condition: Condition,
}

impl DecisionRule {
    pub fn new<F>(name: impl Into<String>, action: Action, priority: u8, confidence: f64, condition: F) -> Self
    where
        F: Fn(&FeedbackBundle) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            action,
            priority: priority.clamp(1, 10),
            confidence: confidence.clamp(0.0, 1.0),
            condition: Arc::new(condition),
        }
    }

    /// Catch-all CONTINUE_NORMAL rule
    pub fn maintain_normal() -> Self {
        Self::new(MAINTAIN_NORMAL, Action::ContinueNormal, 1, 0.7, |_| true)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn action(&self) -> Action {
        self.action
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn applies(&self, bundle: &FeedbackBundle) -> bool {
        (self.condition)(bundle)
    }
}

impl fmt::Debug for DecisionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecisionRule")
            .field("name", &self.name)
            .field("action", &self.action)
            .field("priority", &self.priority)
            .field("confidence", &self.confidence)
            .finish()
    }
}

/// Score thresholds used by the standard rule set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleThresholds {
    #[serde(default = "default_emergency_health")]
    pub emergency_health: f64,
    #[serde(default = "default_emergency_performance")]
    pub emergency_performance: f64,
    #[serde(default = "default_degraded_health")]
    pub degraded_health: f64,
    #[serde(default = "default_underperforming")]
    pub underperforming: f64,
    #[serde(default = "default_api_degraded")]
    pub api_degraded: f64,
    #[serde(default = "default_optimize_performance")]
    pub optimize_performance: f64,
    /// API availability below which fallback APIs are enabled
    #[serde(default = "default_fallback_api")]
    pub fallback_api: f64,
}

impl Default for RuleThresholds {
    fn default() -> Self {
        Self {
            emergency_health: default_emergency_health(),
            emergency_performance: default_emergency_performance(),
            degraded_health: default_degraded_health(),
            underperforming: default_underperforming(),
            api_degraded: default_api_degraded(),
            optimize_performance: default_optimize_performance(),
            fallback_api: default_fallback_api(),
        }
    }
}

impl RuleThresholds {
    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, value) in [
            ("emergency_health", self.emergency_health),
            ("emergency_performance", self.emergency_performance),
            ("degraded_health", self.degraded_health),
            ("underperforming", self.underperforming),
            ("api_degraded", self.api_degraded),
            ("optimize_performance", self.optimize_performance),
            ("fallback_api", self.fallback_api),
        ] {
            if !(0.0..=1.0).contains(&value) {
                anyhow::bail!("engine.thresholds.{} must be within [0, 1], got {}", name, value);
            }
        }
        if self.emergency_health > self.degraded_health {
            anyhow::bail!("engine.thresholds.emergency_health cannot exceed degraded_health");
        }
        Ok(())
    }
}

fn default_emergency_health() -> f64 {
    0.3
}

fn default_emergency_performance() -> f64 {
    0.2
}

fn default_degraded_health() -> f64 {
    0.6
}

fn default_underperforming() -> f64 {
    0.5
}

fn default_api_degraded() -> f64 {
    0.8
}

fn default_optimize_performance() -> f64 {
    0.8
}

fn default_fallback_api() -> f64 {
    0.7
}

/// Ordered rule registry. Always contains the catch-all rule.
#[derive(Debug, Clone)]
pub struct DecisionRuleSet {
    rules: Vec<DecisionRule>,
}

impl DecisionRuleSet {
    /// Rule set holding only the catch-all rule
    pub fn new() -> Self {
        Self {
            rules: vec![DecisionRule::maintain_normal()],
        }
    }

    /// The standard rule set
    pub fn standard(t: &RuleThresholds) -> Self {
        let mut set = Self::new();
        let (emergency_health, emergency_performance) = (t.emergency_health, t.emergency_performance);
        let (degraded_health, underperforming) = (t.degraded_health, t.underperforming);
        let (api_degraded, optimize) = (t.api_degraded, t.optimize_performance);

        let rules = [
            DecisionRule::new("EMERGENCY_HEALTH", Action::EmergencyStop, 10, 0.95, move |b| {
                b.health_score().is_some_and(|s| s < emergency_health)
            }),
            DecisionRule::new("EMERGENCY_PERFORMANCE", Action::DefensiveMode, 9, 0.90, move |b| {
                b.performance_score().is_some_and(|s| s < emergency_performance)
            }),
            DecisionRule::new("DEGRADED_HEALTH", Action::PauseTrading, 7, 0.80, move |b| {
                b.health_score().is_some_and(|s| s < degraded_health)
            }),
            DecisionRule::new("MARKET_TURBULENCE", Action::DefensiveMode, 7, 0.75, |b| {
                b.market_conditions() == Some((MarketTrend::Bear, Level::High))
            }),
            DecisionRule::new("UNDERPERFORMING", Action::ReduceFrequency, 6, 0.80, move |b| {
                b.performance_score().is_some_and(|s| s < underperforming)
            }),
            DecisionRule::new("API_DEGRADED", Action::ReduceFrequency, 6, 0.75, move |b| {
                b.api_availability().is_some_and(|a| a < api_degraded)
            }),
            DecisionRule::new("OPTIMIZE_PERFORMANCE", Action::OptimizePerformance, 5, 0.85, move |b| {
                b.health_score().is_some_and(|h| h > optimize)
                    && b.performance_score().is_some_and(|s| s > optimize)
            }),
        ];
        for rule in rules {
            // Names above are unique
            let _ = set.register(rule);
        }
        set
    }

    /// Register a rule; names must be unique
    pub fn register(&mut self, rule: DecisionRule) -> Result<()> {
        if self.rules.iter().any(|r| r.name == rule.name) {
            return Err(Error::DuplicateRule(rule.name));
        }
        self.rules.push(rule);
        Ok(())
    }

    /// Rules in descending priority order; ties keep registration order
    pub fn by_priority(&self) -> Vec<&DecisionRule> {
        let mut rules: Vec<&DecisionRule> = self.rules.iter().collect();
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        rules
    }

    /// Rules whose condition holds, in descending priority order
    pub fn applicable(&self, bundle: &FeedbackBundle) -> Vec<DecisionRule> {
        self.by_priority()
            .into_iter()
            .filter(|rule| rule.applies(bundle))
            .cloned()
            .collect()
    }

    /// The catch-all rule
    pub fn fallback(&self) -> DecisionRule {
        self.rules
            .iter()
            .find(|r| r.name == MAINTAIN_NORMAL)
            .cloned()
            .unwrap_or_else(DecisionRule::maintain_normal)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl Default for DecisionRuleSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feedback::testing::report;
    use crate::feedback::SourceKind;

    fn bundle(health: f64, performance: f64) -> FeedbackBundle {
        FeedbackBundle::new(vec![
            report(SourceKind::Health, health),
            report(SourceKind::Performance, performance),
        ])
    }

    fn names(rules: &[DecisionRule]) -> Vec<&str> {
        rules.iter().map(|r| r.name()).collect()
    }

    #[test]
    fn test_new_contains_catch_all() {
        let set = DecisionRuleSet::new();
        assert_eq!(set.len(), 1);
        let applicable = set.applicable(&FeedbackBundle::new(vec![]));
        assert_eq!(names(&applicable), vec![MAINTAIN_NORMAL]);
    }

    #[test]
    fn test_duplicate_rule_rejected() {
        let mut set = DecisionRuleSet::new();
        let err = set.register(DecisionRule::maintain_normal()).unwrap_err();
        assert!(matches!(err, Error::DuplicateRule(name) if name == MAINTAIN_NORMAL));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_standard_rules_healthy_system() {
        let set = DecisionRuleSet::standard(&RuleThresholds::default());
        assert_eq!(set.len(), 8);
        let applicable = set.applicable(&bundle(0.9, 0.85));
        assert_eq!(names(&applicable), vec!["OPTIMIZE_PERFORMANCE", MAINTAIN_NORMAL]);
    }

    #[test]
    fn test_applicable_sorted_by_priority() {
        let set = DecisionRuleSet::standard(&RuleThresholds::default());
        let applicable = set.applicable(&bundle(0.25, 0.1));
        assert_eq!(
            names(&applicable),
            vec![
                "EMERGENCY_HEALTH",
                "EMERGENCY_PERFORMANCE",
                "DEGRADED_HEALTH",
                "UNDERPERFORMING",
                MAINTAIN_NORMAL
            ]
        );
        let priorities: Vec<u8> = applicable.iter().map(|r| r.priority()).collect();
        assert!(priorities.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn test_optimize_requires_health_and_performance() {
        let set = DecisionRuleSet::standard(&RuleThresholds::default());
        assert_eq!(names(&set.applicable(&bundle(0.7, 0.9))), vec![MAINTAIN_NORMAL]);
        let performance_only = FeedbackBundle::new(vec![report(SourceKind::Performance, 0.95)]);
        assert_eq!(names(&set.applicable(&performance_only)), vec![MAINTAIN_NORMAL]);
    }

    #[test]
    fn test_missing_source_does_not_fire_rules() {
        let set = DecisionRuleSet::standard(&RuleThresholds::default());
        let applicable = set.applicable(&FeedbackBundle::new(vec![report(SourceKind::Performance, 0.1)]));
        assert_eq!(
            names(&applicable),
            vec!["EMERGENCY_PERFORMANCE", "UNDERPERFORMING", MAINTAIN_NORMAL]
        );
    }

    #[test]
    fn test_rule_values_are_clamped() {
        let rule = DecisionRule::new("X", Action::PauseTrading, 42, 1.5, |_| false);
        assert_eq!(rule.priority(), 10);
        assert_eq!(rule.confidence(), 1.0);
        assert!(!rule.applies(&FeedbackBundle::new(vec![])));
    }

    #[test]
    fn test_thresholds_validation() {
        assert!(RuleThresholds::default().validate().is_ok());
        let t = RuleThresholds {
            emergency_health: 0.7,
            ..Default::default()
        };
        assert!(t.validate().is_err());
    }
}
