//! Performance feedback source
//!
//! Track closed trades over a bounded window and score the strategy's recent
//! results. Applies the coordinated decision as a strategy posture.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::decision::{Action, Adjustment, Decision, Effect};
use crate::error::Result;

use super::{AdaptiveConfidence, FeedbackReport, FeedbackSource, Outcome, SourceKind, SourceMetrics};

/// Configuration for the performance source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceSourceConfig {
    /// Number of most recent trades scored
    #[serde(default = "default_trade_window")]
    pub trade_window: usize,
}

impl Default for PerformanceSourceConfig {
    fn default() -> Self {
        Self {
            trade_window: default_trade_window(),
        }
    }
}

fn default_trade_window() -> usize {
    20
}

/// A closed trade
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub strategy: String,
    pub pnl: f64,
    /// Return on investment, in percent
    pub roi_pct: f64,
    pub holding_secs: u64,
    pub timestamp: DateTime<Utc>,
}

impl TradeRecord {
    pub fn new(strategy: impl Into<String>, pnl: f64, roi_pct: f64, holding_secs: u64) -> Self {
        Self {
            strategy: strategy.into(),
            pnl,
            roi_pct,
            holding_secs,
            timestamp: Utc::now(),
        }
    }
}

/// Aggregate metrics over a set of trades
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub trades: usize,
    pub win_rate: f64,
    pub avg_roi: f64,
    pub sharpe: f64,
    /// Largest peak-to-trough fall of the cumulative ROI path, in percent
    pub max_drawdown: f64,
}

impl PerformanceMetrics {
    pub fn from_trades<'a>(trades: impl IntoIterator<Item = &'a TradeRecord>) -> Self {
        let rois: Vec<f64> = trades.into_iter().map(|t| t.roi_pct).collect();
        if rois.is_empty() {
            return Self::default();
        }

        let n = rois.len() as f64;
        let wins = rois.iter().filter(|r| **r > 0.0).count();
        let avg_roi = rois.iter().sum::<f64>() / n;

        let variance = rois.iter().map(|r| (r - avg_roi).powi(2)).sum::<f64>() / n;
        let std_dev = variance.sqrt();
        let sharpe = if std_dev > f64::EPSILON { avg_roi / std_dev } else { 0.0 };

        let mut cumulative = 0.0;
        let mut peak = 0.0_f64;
        let mut max_drawdown = 0.0_f64;
        for roi in &rois {
            cumulative += roi;
            peak = peak.max(cumulative);
            max_drawdown = max_drawdown.max(peak - cumulative);
        }

        Self {
            trades: rois.len(),
            win_rate: wins as f64 / n,
            avg_roi,
            sharpe,
            max_drawdown,
        }
    }

    /// Overall score in [0, 1]; neutral without trades
    pub fn score(&self) -> f64 {
        if self.trades == 0 {
            return 0.5;
        }
        let roi = ((self.avg_roi + 50.0) / 100.0).clamp(0.0, 1.0);
        let sharpe = ((self.sharpe + 2.0) / 4.0).clamp(0.0, 1.0);
        let drawdown = ((50.0 - self.max_drawdown.abs()) / 50.0).clamp(0.0, 1.0);
        self.win_rate * 0.3 + roi * 0.3 + sharpe * 0.2 + drawdown * 0.2
    }
}

/// Per-strategy running totals
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrategyStats {
    pub trades: u64,
    pub wins: u64,
    pub total_roi: f64,
}

impl StrategyStats {
    pub fn avg_roi(&self) -> f64 {
        if self.trades == 0 {
            0.0
        } else {
            self.total_roi / self.trades as f64
        }
    }
}

/// Strategy posture set by the last applied decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyPosture {
    pub mode: Action,
    pub position_size_multiplier: f64,
    pub frequency_multiplier: f64,
    pub trading_enabled: bool,
}

impl Default for StrategyPosture {
    fn default() -> Self {
        Self {
            mode: Action::ContinueNormal,
            position_size_multiplier: 1.0,
            frequency_multiplier: 1.0,
            trading_enabled: true,
        }
    }
}

impl StrategyPosture {
    fn from_decision(decision: &Decision) -> Self {
        let position_size_multiplier = match decision.modifications.get(&Effect::PositionSize) {
            Some(Adjustment::Percent(p)) => (1.0 + *p as f64 / 100.0).max(0.0),
            _ => 1.0,
        };
        let (frequency_multiplier, trading_enabled) =
            match decision.modifications.get(&Effect::TradingFrequency) {
                Some(Adjustment::Stop) => (0.0, false),
                Some(Adjustment::Decrease) => (0.5, true),
                Some(Adjustment::Increase) => (1.25, true),
                _ => (1.0, true),
            };
        Self {
            mode: decision.primary_action,
            position_size_multiplier,
            frequency_multiplier,
            trading_enabled,
        }
    }
}

/// Performance feedback loop
pub struct PerformanceFeedback {
    name: String,
    config: PerformanceSourceConfig,
    trades: Mutex<VecDeque<TradeRecord>>,
    strategies: DashMap<String, StrategyStats>,
    posture: RwLock<StrategyPosture>,
    learner: Mutex<AdaptiveConfidence>,
}

impl PerformanceFeedback {
    pub fn new(config: PerformanceSourceConfig) -> Self {
        Self {
            name: "performance".to_string(),
            trades: Mutex::new(VecDeque::with_capacity(config.trade_window)),
            config,
            strategies: DashMap::new(),
            posture: RwLock::new(StrategyPosture::default()),
            learner: Mutex::new(AdaptiveConfidence::default()),
        }
    }

    /// Record a closed trade
    pub async fn record_trade(&self, trade: TradeRecord) {
        {
            let mut stats = self.strategies.entry(trade.strategy.clone()).or_default();
            stats.trades += 1;
            if trade.pnl > 0.0 {
                stats.wins += 1;
            }
            stats.total_roi += trade.roi_pct;
        }

        let mut trades = self.trades.lock().await;
        trades.push_back(trade);
        while trades.len() > self.config.trade_window {
            trades.pop_front();
        }
    }

    pub async fn metrics(&self) -> PerformanceMetrics {
        PerformanceMetrics::from_trades(self.trades.lock().await.iter())
    }

    /// Strategy with the highest average ROI
    pub fn best_strategy(&self) -> Option<(String, StrategyStats)> {
        self.strategies
            .iter()
            .max_by(|a, b| a.value().avg_roi().total_cmp(&b.value().avg_roi()))
            .map(|entry| (entry.key().clone(), entry.value().clone()))
    }

    pub async fn posture(&self) -> StrategyPosture {
        self.posture.read().await.clone()
    }

    fn recommend(score: f64) -> Action {
        if score < 0.2 {
            Action::DefensiveMode
        } else if score < 0.5 {
            Action::ReduceFrequency
        } else if score > 0.8 {
            Action::OptimizePerformance
        } else {
            Action::ContinueNormal
        }
    }
}

#[async_trait]
impl FeedbackSource for PerformanceFeedback {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Performance
    }

    async fn get_feedback(&self) -> Result<FeedbackReport> {
        let metrics = self.metrics().await;
        let score = metrics.score();
        let action = Self::recommend(score);
        let confidence = self.learner.lock().await.confidence(action);

        let mut reasoning = if metrics.trades == 0 {
            "no data: no closed trades".to_string()
        } else {
            format!(
                "{} trades, win rate {:.0}%, avg ROI {:.1}%, max drawdown {:.1}%",
                metrics.trades,
                metrics.win_rate * 100.0,
                metrics.avg_roi,
                metrics.max_drawdown
            )
        };
        if let Some((strategy, stats)) = self.best_strategy() {
            reasoning.push_str(&format!(", best strategy {} ({:.1}% avg)", strategy, stats.avg_roi()));
        }

        Ok(FeedbackReport::new(
            &self.name,
            SourceKind::Performance,
            score,
            reasoning,
            SourceMetrics::Performance {
                win_rate: metrics.win_rate,
                avg_roi: metrics.avg_roi,
                sharpe: metrics.sharpe,
                max_drawdown: metrics.max_drawdown,
                trades: metrics.trades,
            },
        )
        .with_recommendation(action, confidence))
    }

    async fn apply_decision(&self, decision: &Decision) -> Result<()> {
        let posture = StrategyPosture::from_decision(decision);
        info!(
            source = %self.name,
            mode = %posture.mode,
            position_size = posture.position_size_multiplier,
            trading_enabled = posture.trading_enabled,
            "Strategy posture updated"
        );
        *self.posture.write().await = posture;
        Ok(())
    }

    async fn learn_from_outcome(&self, outcome: &Outcome) {
        let correct = self.learner.lock().await.learn(outcome);
        debug!(source = %self.name, action = %outcome.action, correct, "Performance source learned from outcome");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::{ConflictResolver, DecisionRuleSet, RuleThresholds, UnifiedDecisionEngine};
    use crate::feedback::testing::report;
    use crate::feedback::FeedbackBundle;

    fn decide(health: f64, performance: f64) -> Decision {
        let engine = UnifiedDecisionEngine::new(
            DecisionRuleSet::standard(&RuleThresholds::default()),
            ConflictResolver::quiet(),
            9,
        );
        let bundle = FeedbackBundle::new(vec![
            report(SourceKind::Health, health),
            report(SourceKind::Performance, performance),
        ]);
        engine.decide(&engine.analyze(bundle))
    }

    #[test]
    fn test_metrics_empty_is_neutral() {
        let metrics = PerformanceMetrics::from_trades(&Vec::<TradeRecord>::new());
        assert_eq!(metrics.trades, 0);
        assert_eq!(metrics.score(), 0.5);
    }

    #[test]
    fn test_metrics_computation() {
        let trades = vec![
            TradeRecord::new("meme", 1.0, 10.0, 60),
            TradeRecord::new("meme", -1.0, -20.0, 60),
            TradeRecord::new("technical", 1.0, 30.0, 60),
            TradeRecord::new("technical", 1.0, 20.0, 60),
        ];
        let metrics = PerformanceMetrics::from_trades(&trades);
        assert_eq!(metrics.trades, 4);
        assert_eq!(metrics.win_rate, 0.75);
        assert!((metrics.avg_roi - 10.0).abs() < 1e-9);
        // Path 10, -10, 20, 40: peak 10 then trough -10
        assert!((metrics.max_drawdown - 20.0).abs() < 1e-9);
        assert!(metrics.sharpe > 0.0);

        let score = metrics.score();
        assert!(score > 0.5 && score < 1.0);
    }

    #[test]
    fn test_losing_streak_scores_low() {
        let trades: Vec<_> = (0..10)
            .map(|_| TradeRecord::new("meme", -1.0, -40.0, 30))
            .collect();
        let metrics = PerformanceMetrics::from_trades(&trades);
        assert_eq!(metrics.win_rate, 0.0);
        assert!(metrics.score() < 0.2);
        assert_eq!(PerformanceFeedback::recommend(metrics.score()), Action::DefensiveMode);
    }

    #[tokio::test]
    async fn test_trade_window_is_bounded() {
        let source = PerformanceFeedback::new(PerformanceSourceConfig { trade_window: 5 });
        for i in 0..12 {
            source.record_trade(TradeRecord::new("meme", 1.0, i as f64, 10)).await;
        }
        assert_eq!(source.metrics().await.trades, 5);
        // Per-strategy totals are not windowed
        assert_eq!(source.best_strategy().unwrap().1.trades, 12);
    }

    #[tokio::test]
    async fn test_best_strategy() {
        let source = PerformanceFeedback::new(PerformanceSourceConfig::default());
        source.record_trade(TradeRecord::new("meme", 1.0, 5.0, 10)).await;
        source.record_trade(TradeRecord::new("technical", 1.0, 15.0, 10)).await;

        let (name, stats) = source.best_strategy().unwrap();
        assert_eq!(name, "technical");
        assert_eq!(stats.wins, 1);

        let report = source.get_feedback().await.unwrap();
        assert!(report.reasoning.contains("best strategy technical"));
    }

    #[tokio::test]
    async fn test_apply_defensive_mode_halves_position_size() {
        let source = PerformanceFeedback::new(PerformanceSourceConfig::default());
        let decision = decide(0.9, 0.1);
        assert_eq!(decision.primary_action, Action::DefensiveMode);

        source.apply_decision(&decision).await.unwrap();
        let posture = source.posture().await;
        assert_eq!(posture.mode, Action::DefensiveMode);
        assert_eq!(posture.position_size_multiplier, 0.5);
        assert!(posture.trading_enabled);
    }

    #[tokio::test]
    async fn test_apply_emergency_stop_disables_trading() {
        let source = PerformanceFeedback::new(PerformanceSourceConfig::default());
        let decision = decide(0.1, 0.9);
        source.apply_decision(&decision).await.unwrap();
        source.apply_decision(&decision).await.unwrap();

        let posture = source.posture().await;
        assert_eq!(posture.mode, Action::EmergencyStop);
        assert!(!posture.trading_enabled);
    }
}
