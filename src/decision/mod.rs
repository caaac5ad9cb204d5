//! Decision making: rules, conflict resolution and the unified engine

pub mod conflict;
pub mod engine;
pub mod rules;
pub mod types;

pub use conflict::{Conflict, ConflictResolver, ConflictSeverity};
pub use engine::{Analysis, RuleSummary, UnifiedDecisionEngine};
pub use rules::{DecisionRule, DecisionRuleSet, RuleThresholds};
pub use types::{Action, Adjustment, Decision, Effect};
