//! Decision types shared across the engine, sources and coordinator

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::feedback::Urgency;

/// Coordinated trading action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    ContinueNormal,
    ReduceFrequency,
    PauseTrading,
    DefensiveMode,
    OptimizePerformance,
    EmergencyStop,
}

impl Action {
    /// Actions preferred by safety-first conflict resolution
    pub fn is_safety(&self) -> bool {
        matches!(self, Action::EmergencyStop | Action::DefensiveMode)
    }

    /// Actions that switch trading off
    pub fn halts_trading(&self) -> bool {
        matches!(self, Action::EmergencyStop | Action::PauseTrading)
    }

    /// Behavioral modifications implied by this action
    pub fn modifications(&self) -> BTreeMap<Effect, Adjustment> {
        let mut mods = BTreeMap::new();
        match self {
            Action::EmergencyStop => {
                mods.insert(Effect::TradingFrequency, Adjustment::Stop);
                mods.insert(Effect::Monitoring, Adjustment::Increase);
            }
            Action::DefensiveMode => {
                mods.insert(Effect::PositionSize, Adjustment::Percent(-50));
                mods.insert(Effect::RiskTolerance, Adjustment::UltraLow);
            }
            Action::OptimizePerformance => {
                mods.insert(Effect::PositionSize, Adjustment::Percent(20));
                mods.insert(Effect::TradingFrequency, Adjustment::Increase);
            }
            Action::ReduceFrequency => {
                mods.insert(Effect::TradingFrequency, Adjustment::Decrease);
                mods.insert(Effect::Monitoring, Adjustment::Increase);
            }
            Action::PauseTrading => {
                mods.insert(Effect::TradingFrequency, Adjustment::Stop);
            }
            Action::ContinueNormal => {
                mods.insert(Effect::Monitoring, Adjustment::Standard);
            }
        }
        mods
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::ContinueNormal => "CONTINUE_NORMAL",
            Action::ReduceFrequency => "REDUCE_FREQUENCY",
            Action::PauseTrading => "PAUSE_TRADING",
            Action::DefensiveMode => "DEFENSIVE_MODE",
            Action::OptimizePerformance => "OPTIMIZE_PERFORMANCE",
            Action::EmergencyStop => "EMERGENCY_STOP",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Behavior a decision modifies
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Effect {
    TradingFrequency,
    Monitoring,
    PositionSize,
    RiskTolerance,
    FallbackApis,
}

/// How a behavior is modified
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Adjustment {
    Stop,
    Decrease,
    Increase,
    Standard,
    Enable,
    UltraLow,
    /// Relative change in percent
    Percent(i32),
}

/// The coordinator's per-cycle output. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub id: Uuid,
    pub primary_action: Action,
    pub confidence: f64,
    pub urgency: Urgency,
    pub reasoning: String,
    pub applied_rule: String,
    pub conflicts_resolved: usize,
    pub emergency_override: bool,
    pub modifications: BTreeMap<Effect, Adjustment>,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safety_set() {
        assert!(Action::EmergencyStop.is_safety());
        assert!(Action::DefensiveMode.is_safety());
        assert!(!Action::PauseTrading.is_safety());
        assert!(!Action::OptimizePerformance.is_safety());
    }

    #[test]
    fn test_halts_trading() {
        assert!(Action::EmergencyStop.halts_trading());
        assert!(Action::PauseTrading.halts_trading());
        assert!(!Action::DefensiveMode.halts_trading());
    }

    #[test]
    fn test_emergency_stop_modifications() {
        let mods = Action::EmergencyStop.modifications();
        assert_eq!(mods.get(&Effect::TradingFrequency), Some(&Adjustment::Stop));
        assert_eq!(mods.get(&Effect::Monitoring), Some(&Adjustment::Increase));
    }

    #[test]
    fn test_action_serialization() {
        let json = serde_json::to_string(&Action::OptimizePerformance).unwrap();
        assert_eq!(json, r#""OPTIMIZE_PERFORMANCE""#);
        assert_eq!(Action::DefensiveMode.to_string(), "DEFENSIVE_MODE");
    }

    #[test]
    fn test_modifications_serialize_as_map() {
        let json = serde_json::to_value(Action::DefensiveMode.modifications()).unwrap();
        assert_eq!(json["positionSize"]["PERCENT"], -50);
        assert_eq!(json["riskTolerance"], "ULTRA_LOW");
    }
}
