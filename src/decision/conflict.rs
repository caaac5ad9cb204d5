//! Conflict Resolver
//!
//! Detects applicable rules recommending mutually exclusive actions and picks
//! a single winner with a safety-first policy:
//! 1. Highest-priority rule whose action is EMERGENCY_STOP or DEFENSIVE_MODE
//! 2. Otherwise the highest-priority applicable rule

use serde::{Deserialize, Serialize};

use super::rules::DecisionRule;
use super::types::Action;

/// Logging severity of a conflict; never affects resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictSeverity {
    High,
    Low,
}

/// A pair of applicable rules with mutually exclusive actions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conflict {
    pub first: String,
    pub first_action: Action,
    pub second: String,
    pub second_action: Action,
    pub severity: ConflictSeverity,
}

/// Static, symmetric conflict table
pub fn actions_conflict(a: Action, b: Action) -> bool {
    use Action::*;
    let one_way = |x: Action, y: Action| {
        matches!(
            (x, y),
            (EmergencyStop, OptimizePerformance | ContinueNormal | ReduceFrequency)
                | (DefensiveMode, OptimizePerformance | ContinueNormal)
                | (PauseTrading, OptimizePerformance | ContinueNormal)
                | (ReduceFrequency, OptimizePerformance)
        )
    };
    one_way(a, b) || one_way(b, a)
}

/// Conflict Resolver
#[derive(Debug, Clone)]
pub struct ConflictResolver {
    /// Priority difference below which a conflict is HIGH severity
    severity_gap: u8,
    /// Log detected conflicts and overrides
    log_conflicts: bool,
}

impl ConflictResolver {
    /// Create a new conflict resolver
    pub fn new(severity_gap: u8) -> Self {
        Self {
            severity_gap,
            log_conflicts: true,
        }
    }

    /// Create without conflict logging
    pub fn quiet() -> Self {
        Self {
            severity_gap: 3,
            log_conflicts: false,
        }
    }

    /// Detect conflicts across every unordered pair of applicable rules
    pub fn detect(&self, rules: &[DecisionRule]) -> Vec<Conflict> {
        let mut conflicts = Vec::new();
        for (i, a) in rules.iter().enumerate() {
            for b in &rules[i + 1..] {
                if !actions_conflict(a.action(), b.action()) {
                    continue;
                }
                let gap = a.priority().abs_diff(b.priority());
                let severity = if gap < self.severity_gap {
                    ConflictSeverity::High
                } else {
                    ConflictSeverity::Low
                };
                if self.log_conflicts {
                    tracing::debug!(
                        first = a.name(),
                        second = b.name(),
                        severity = ?severity,
                        "Conflict: {} vs {}",
                        a.action(),
                        b.action()
                    );
                }
                conflicts.push(Conflict {
                    first: a.name().to_string(),
                    first_action: a.action(),
                    second: b.name().to_string(),
                    second_action: b.action(),
                    severity,
                });
            }
        }
        conflicts
    }

    /// Pick the winning rule. Total: falls back to the catch-all when `rules` is empty.
    pub fn resolve(&self, conflicts: &[Conflict], rules: &[DecisionRule]) -> DecisionRule {
        let safety = highest(rules.iter().filter(|r| r.action().is_safety()));
        let winner = safety
            .or_else(|| highest(rules.iter()))
            .cloned()
            .unwrap_or_else(DecisionRule::maintain_normal);

        if self.log_conflicts {
            for loser in rules.iter().filter(|r| r.name() != winner.name()) {
                if conflicts
                    .iter()
                    .any(|c| c.first == loser.name() || c.second == loser.name())
                {
                    tracing::debug!(
                        "Decision override: {} ({}) overridden by {} ({})",
                        loser.name(),
                        loser.action(),
                        winner.name(),
                        winner.action()
                    );
                }
            }
        }

        winner
    }
}

/// Highest-priority rule; the earliest wins a tie
fn highest<'a>(candidates: impl Iterator<Item = &'a DecisionRule>) -> Option<&'a DecisionRule> {
    candidates.fold(None, |best: Option<&'a DecisionRule>, rule| match best {
        Some(b) if b.priority() >= rule.priority() => Some(b),
        _ => Some(rule),
    })
}

impl Default for ConflictResolver {
    fn default() -> Self {
        Self::new(3)
    }
}
