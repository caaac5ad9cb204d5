//! Unified decision engine
//!
//! Evaluates the rule set against a cycle's feedback bundle and produces one
//! Decision. The reported confidence is always the winning rule's own declared
//! confidence; it is never combined across rules.

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::feedback::{FeedbackBundle, Urgency};

use super::conflict::{Conflict, ConflictResolver};
use super::rules::{DecisionRule, DecisionRuleSet};
use super::types::{Adjustment, Decision, Effect};

/// Result of evaluating every rule against one bundle
#[derive(Debug, Clone)]
pub struct Analysis {
    pub bundle: FeedbackBundle,
    /// Rules whose condition holds, descending by priority
    pub applicable_rules: Vec<DecisionRule>,
    pub conflicts: Vec<Conflict>,
    pub urgency: Urgency,
}

/// Summary of a registered rule, for display
#[derive(Debug, Clone, Serialize)]
pub struct RuleSummary {
    pub name: String,
    pub action: String,
    pub priority: u8,
    pub confidence: f64,
}

/// Unified Decision Engine
#[derive(Debug, Clone)]
pub struct UnifiedDecisionEngine {
    rules: DecisionRuleSet,
    resolver: ConflictResolver,
    /// Priority at or above which a rule is an emergency rule
    emergency_priority: u8,
    /// API availability below which fallback APIs are enabled
    fallback_api_threshold: f64,
}

impl UnifiedDecisionEngine {
    pub fn new(rules: DecisionRuleSet, resolver: ConflictResolver, emergency_priority: u8) -> Self {
        Self {
            rules,
            resolver,
            emergency_priority,
            fallback_api_threshold: 0.7,
        }
    }

    /// Engine with the standard rule set
    pub fn from_config(config: &EngineConfig) -> Self {
        let mut engine = Self::new(
            DecisionRuleSet::standard(&config.thresholds),
            ConflictResolver::new(config.severity_gap),
            config.emergency_priority,
        );
        engine.fallback_api_threshold = config.thresholds.fallback_api;
        engine
    }

    pub fn rules(&self) -> &DecisionRuleSet {
        &self.rules
    }

    pub fn rule_summaries(&self) -> Vec<RuleSummary> {
        self.rules
            .by_priority()
            .into_iter()
            .map(|r| RuleSummary {
                name: r.name().to_string(),
                action: r.action().to_string(),
                priority: r.priority(),
                confidence: r.confidence(),
            })
            .collect()
    }

    /// Evaluate every rule and detect conflicts among the applicable ones
    pub fn analyze(&self, bundle: FeedbackBundle) -> Analysis {
        let applicable_rules = self.rules.applicable(&bundle);

        let mut urgency = bundle.max_urgency();
        if applicable_rules
            .iter()
            .any(|r| r.priority() >= self.emergency_priority)
        {
            urgency = Urgency::Critical;
        }

        let conflicts = self.resolver.detect(&applicable_rules);

        debug!(
            applicable = applicable_rules.len(),
            conflicts = conflicts.len(),
            urgency = %urgency,
            "Feedback analyzed"
        );

        Analysis {
            bundle,
            applicable_rules,
            conflicts,
            urgency,
        }
    }

    /// Produce exactly one decision for an analysis
    pub fn decide(&self, analysis: &Analysis) -> Decision {
        let winner = if !analysis.conflicts.is_empty() {
            self.resolver
                .resolve(&analysis.conflicts, &analysis.applicable_rules)
        } else {
            analysis
                .applicable_rules
                .first()
                .cloned()
                .unwrap_or_else(|| self.rules.fallback())
        };

        let mut modifications = winner.action().modifications();
        if analysis
            .bundle
            .api_availability()
            .is_some_and(|a| a < self.fallback_api_threshold)
        {
            modifications.insert(Effect::FallbackApis, Adjustment::Enable);
        }

        let decision = Decision {
            id: Uuid::new_v4(),
            primary_action: winner.action(),
            confidence: winner.confidence(),
            urgency: analysis.urgency,
            reasoning: self.reasoning(&winner, analysis),
            applied_rule: winner.name().to_string(),
            conflicts_resolved: analysis.conflicts.len(),
            emergency_override: winner.priority() >= self.emergency_priority,
            modifications,
            timestamp: Utc::now(),
        };

        info!(
            action = %decision.primary_action,
            rule = %decision.applied_rule,
            confidence = decision.confidence,
            urgency = %decision.urgency,
            emergency_override = decision.emergency_override,
            "Decision made"
        );

        decision
    }

    fn reasoning(&self, winner: &DecisionRule, analysis: &Analysis) -> String {
        let mut parts = vec![format!("Applied rule: {}", winner.name())];
        if !analysis.conflicts.is_empty() {
            parts[0].push_str(&format!(" (resolved {} conflicts)", analysis.conflicts.len()));
        }
        if let Some(health) = analysis.bundle.health_score().filter(|h| *h < 0.5) {
            parts.push(format!("health degraded ({:.0}%)", health * 100.0));
        }
        if let Some(performance) = analysis.bundle.performance_score().filter(|p| *p < 0.5) {
            parts.push(format!("performance weak ({:.0}%)", performance * 100.0));
        }
        parts.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::{Action, DecisionRule, RuleThresholds};
    use crate::feedback::testing::report;
    use crate::feedback::{SourceKind, SourceMetrics, Trend};

    fn engine() -> UnifiedDecisionEngine {
        UnifiedDecisionEngine::new(
            DecisionRuleSet::standard(&RuleThresholds::default()),
            ConflictResolver::quiet(),
            9,
        )
    }

    fn bundle(health: f64, performance: f64, market: f64) -> FeedbackBundle {
        FeedbackBundle::new(vec![
            report(SourceKind::Health, health),
            report(SourceKind::Performance, performance),
            report(SourceKind::Market, market),
        ])
    }

    #[test]
    fn test_healthy_system_optimizes() {
        let engine = engine();
        let analysis = engine.analyze(bundle(0.9, 0.85, 0.88));
        let decision = engine.decide(&analysis);

        assert_eq!(decision.primary_action, Action::OptimizePerformance);
        assert!(!decision.emergency_override);
        assert_eq!(decision.confidence, 0.85);
        assert_eq!(decision.applied_rule, "OPTIMIZE_PERFORMANCE");
        assert_eq!(decision.urgency, Urgency::Low);
        assert_eq!(decision.modifications.get(&Effect::PositionSize), Some(&Adjustment::Percent(20)));
    }

    #[test]
    fn test_critical_health_overrides_optimization() {
        let engine = engine();
        let analysis = engine.analyze(bundle(0.25, 0.9, 0.7));
        assert!(!analysis.conflicts.is_empty());
        assert_eq!(analysis.urgency, Urgency::Critical);

        let decision = engine.decide(&analysis);
        assert_eq!(decision.primary_action, Action::EmergencyStop);
        assert!(decision.emergency_override);
        assert_eq!(decision.confidence, 0.95);
        assert!(decision.reasoning.starts_with("Applied rule: EMERGENCY_HEALTH (resolved"));
        assert!(decision.reasoning.contains("health degraded (25%)"));
        assert_eq!(decision.modifications.get(&Effect::TradingFrequency), Some(&Adjustment::Stop));
    }

    #[test]
    fn test_mediocre_system_continues_normal() {
        let engine = engine();
        let decision = engine.decide(&engine.analyze(bundle(0.7, 0.6, 0.6)));
        assert_eq!(decision.primary_action, Action::ContinueNormal);
        assert_eq!(decision.confidence, 0.7);
        assert_eq!(decision.conflicts_resolved, 0);
        assert_eq!(decision.reasoning, "Applied rule: MAINTAIN_NORMAL");
    }

    #[test]
    fn test_strong_performance_with_medium_health_continues_normal() {
        let engine = engine();
        let decision = engine.decide(&engine.analyze(bundle(0.7, 0.9, 0.5)));
        assert_eq!(decision.primary_action, Action::ContinueNormal);
        assert_eq!(decision.applied_rule, "MAINTAIN_NORMAL");
    }

    #[test]
    fn test_empty_bundle_falls_back() {
        let engine = engine();
        let decision = engine.decide(&engine.analyze(FeedbackBundle::new(vec![])));
        assert_eq!(decision.primary_action, Action::ContinueNormal);
        assert!(!decision.emergency_override);
    }

    #[test]
    fn test_decide_is_total_with_empty_applicable_list() {
        let engine = engine();
        let analysis = Analysis {
            bundle: FeedbackBundle::new(vec![]),
            applicable_rules: vec![],
            conflicts: vec![],
            urgency: Urgency::Low,
        };
        assert_eq!(engine.decide(&analysis).primary_action, Action::ContinueNormal);
    }

    #[test]
    fn test_safety_first_invariant() {
        let engine = engine();
        for health in [0.1, 0.25, 0.5, 0.7, 0.95] {
            for performance in [0.05, 0.15, 0.4, 0.6, 0.9] {
                let analysis = engine.analyze(bundle(health, performance, 0.5));
                let has_safety = analysis.applicable_rules.iter().any(|r| r.action().is_safety());
                let decision = engine.decide(&analysis);
                if has_safety {
                    assert!(
                        decision.primary_action.is_safety(),
                        "health {} performance {} -> {}",
                        health,
                        performance,
                        decision.primary_action
                    );
                }
            }
        }
    }

    #[test]
    fn test_emergency_priority_escalates_urgency() {
        let engine = engine();
        let analysis = engine.analyze(bundle(0.9, 0.1, 0.9));
        assert_eq!(analysis.urgency, Urgency::Critical);
        let decision = engine.decide(&analysis);
        assert_eq!(decision.primary_action, Action::DefensiveMode);
        assert!(decision.emergency_override);
        assert!(decision.reasoning.contains("performance weak (10%)"));
    }

    #[test]
    fn test_degraded_api_enables_fallback() {
        let engine = engine();
        let mut health = report(SourceKind::Health, 0.65);
        health.metrics = SourceMetrics::Health {
            api_availability: 0.5,
            rpc_availability: 1.0,
            avg_latency_ms: 300.0,
            trend: Trend::Degrading,
        };
        let decision = engine.decide(&engine.analyze(FeedbackBundle::new(vec![health])));
        assert_eq!(decision.primary_action, Action::ReduceFrequency);
        assert_eq!(decision.modifications.get(&Effect::FallbackApis), Some(&Adjustment::Enable));
    }

    #[test]
    fn test_custom_rule_participates() {
        let mut rules = DecisionRuleSet::new();
        rules
            .register(DecisionRule::new("ALWAYS_PAUSE", Action::PauseTrading, 4, 0.6, |_| true))
            .unwrap();
        let engine = UnifiedDecisionEngine::new(rules, ConflictResolver::quiet(), 9);
        let decision = engine.decide(&engine.analyze(FeedbackBundle::new(vec![])));
        assert_eq!(decision.primary_action, Action::PauseTrading);
        assert_eq!(decision.conflicts_resolved, 1);
    }
}
