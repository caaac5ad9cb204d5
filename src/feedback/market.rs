//! Market condition feedback source
//!
//! Classifies trend, volatility and volume from recent price/volume samples
//! and suggests a meme/technical capital split.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::decision::{Action, Decision};
use crate::error::Result;

use super::{AdaptiveConfidence, FeedbackReport, FeedbackSource, Outcome, SourceKind, SourceMetrics};

const TREND_MIN_SAMPLES: usize = 10;
const VOLATILITY_MIN_SAMPLES: usize = 5;

/// Configuration for the market source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSourceConfig {
    #[serde(default = "default_sample_capacity")]
    pub sample_capacity: usize,
}

impl Default for MarketSourceConfig {
    fn default() -> Self {
        Self {
            sample_capacity: default_sample_capacity(),
        }
    }
}

fn default_sample_capacity() -> usize {
    50
}

/// Market direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketTrend {
    Bull,
    Bear,
    Crab,
    Unknown,
}

impl fmt::Display for MarketTrend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Coarse level for volatility and volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Level {
    Low,
    Medium,
    High,
    Unknown,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Classified market conditions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketConditions {
    pub trend: MarketTrend,
    /// |SMA5 - SMA10| / SMA10, in percent
    pub trend_strength: f64,
    pub volatility: Level,
    pub volume: Level,
    pub volume_ratio: f64,
}

impl MarketConditions {
    pub fn detect(samples: &VecDeque<(f64, f64)>) -> Self {
        let prices: Vec<f64> = samples.iter().map(|(p, _)| *p).collect();
        let volumes: Vec<f64> = samples.iter().map(|(_, v)| *v).collect();

        let (trend, trend_strength) = classify_trend(&prices);
        let volatility = classify_volatility(&prices);
        let (volume, volume_ratio) = classify_volume(&volumes);

        Self {
            trend,
            trend_strength,
            volatility,
            volume,
            volume_ratio,
        }
    }

    /// Detection confidence in [0, 1]
    pub fn confidence(&self) -> f64 {
        let mut confidence = 0.0;
        if self.trend != MarketTrend::Unknown {
            confidence += 25.0;
        }
        if self.trend_strength > 2.0 {
            confidence += 15.0;
        }
        if self.volatility != Level::Unknown {
            confidence += 20.0;
        }
        if self.volume != Level::Unknown {
            confidence += 20.0;
        }
        if self.volume_ratio > 1.2 {
            confidence += 10.0;
        }
        f64::min(confidence, 100.0) / 100.0
    }

    /// Percentage of capital suggested for the meme strategy
    pub fn meme_allocation(&self) -> f64 {
        match (self.trend, self.volatility) {
            (MarketTrend::Bull, Level::High) => 70.0,
            (MarketTrend::Bear, Level::Low) => 30.0,
            (MarketTrend::Crab, _) => 50.0,
            (_, Level::High) => 65.0,
            _ => 50.0,
        }
    }

    pub fn score(&self) -> f64 {
        if self.trend == MarketTrend::Unknown || self.volatility == Level::Unknown {
            return 0.5;
        }
        let base = match (self.volatility, self.volume) {
            (Level::High, Level::High) => 0.9,
            (Level::Medium, Level::Medium) => 0.7,
            (Level::Low, _) | (_, Level::Low) => 0.3,
            _ => 0.5,
        };
        let adjusted: f64 = match self.trend {
            MarketTrend::Bull => base + 0.1,
            MarketTrend::Bear => base - 0.15,
            _ => base,
        };
        adjusted.clamp(0.0, 1.0)
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn classify_trend(prices: &[f64]) -> (MarketTrend, f64) {
    if prices.len() < TREND_MIN_SAMPLES {
        return (MarketTrend::Unknown, 0.0);
    }
    let short = mean(&prices[prices.len() - 5..]);
    let long = mean(&prices[prices.len() - 10..]);
    if long <= 0.0 {
        return (MarketTrend::Unknown, 0.0);
    }

    let strength = ((short - long) / long).abs() * 100.0;
    let trend = if short > long * 1.02 {
        MarketTrend::Bull
    } else if short < long * 0.98 {
        MarketTrend::Bear
    } else {
        MarketTrend::Crab
    };
    (trend, strength)
}

fn classify_volatility(prices: &[f64]) -> Level {
    if prices.len() < VOLATILITY_MIN_SAMPLES {
        return Level::Unknown;
    }
    let returns: Vec<f64> = prices
        .windows(2)
        .filter(|w| w[0] > 0.0)
        .map(|w| (w[1] - w[0]) / w[0])
        .collect();
    if returns.is_empty() {
        return Level::Unknown;
    }
    let avg = mean(&returns);
    let volatility = (returns.iter().map(|r| (r - avg).powi(2)).sum::<f64>() / returns.len() as f64).sqrt();

    if volatility > 0.05 {
        Level::High
    } else if volatility > 0.02 {
        Level::Medium
    } else {
        Level::Low
    }
}

fn classify_volume(volumes: &[f64]) -> (Level, f64) {
    if volumes.len() < VOLATILITY_MIN_SAMPLES {
        return (Level::Unknown, 0.0);
    }
    let (current, previous) = match volumes.split_last() {
        Some(split) => split,
        None => return (Level::Unknown, 0.0),
    };
    let avg = mean(previous);
    if avg <= 0.0 {
        return (Level::Unknown, 0.0);
    }

    let ratio = current / avg;
    let level = if ratio > 2.0 {
        Level::High
    } else if ratio > 1.3 {
        Level::Medium
    } else {
        Level::Low
    };
    (level, ratio)
}

/// Market feedback loop
pub struct MarketFeedback {
    name: String,
    config: MarketSourceConfig,
    samples: Mutex<VecDeque<(f64, f64)>>,
    /// Meme allocation ceiling imposed by the last decision
    allocation_cap: RwLock<f64>,
    learner: Mutex<AdaptiveConfidence>,
}

impl MarketFeedback {
    pub fn new(config: MarketSourceConfig) -> Self {
        Self {
            name: "market".to_string(),
            samples: Mutex::new(VecDeque::with_capacity(config.sample_capacity)),
            config,
            allocation_cap: RwLock::new(100.0),
            learner: Mutex::new(AdaptiveConfidence::default()),
        }
    }

    /// Record a price/volume observation
    pub async fn record_sample(&self, price: f64, volume: f64) {
        if !price.is_finite() || !volume.is_finite() {
            return;
        }
        let mut samples = self.samples.lock().await;
        samples.push_back((price, volume));
        while samples.len() > self.config.sample_capacity {
            samples.pop_front();
        }
    }

    pub async fn conditions(&self) -> MarketConditions {
        MarketConditions::detect(&*self.samples.lock().await)
    }

    pub async fn allocation_cap(&self) -> f64 {
        *self.allocation_cap.read().await
    }

    fn recommend(conditions: &MarketConditions, score: f64) -> Action {
        match (conditions.trend, conditions.volatility) {
            (MarketTrend::Bear, Level::High) => Action::DefensiveMode,
            (MarketTrend::Bull, _) if score >= 0.8 => Action::OptimizePerformance,
            _ if score < 0.4 => Action::ReduceFrequency,
            _ => Action::ContinueNormal,
        }
    }
}

#[async_trait]
impl FeedbackSource for MarketFeedback {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Market
    }

    async fn get_feedback(&self) -> Result<FeedbackReport> {
        let conditions = self.conditions().await;
        let score = conditions.score();
        let allocation = conditions.meme_allocation().min(self.allocation_cap().await);
        let action = Self::recommend(&conditions, score);
        let confidence = self.learner.lock().await.confidence(action);

        let reasoning = format!(
            "{} market ({:.1}% strength), {} volatility, {} volume ({:.1}x)",
            conditions.trend,
            conditions.trend_strength,
            conditions.volatility,
            conditions.volume,
            conditions.volume_ratio
        );

        Ok(FeedbackReport::new(
            &self.name,
            SourceKind::Market,
            score,
            reasoning,
            SourceMetrics::Market {
                trend: conditions.trend,
                volatility: conditions.volatility,
                volume: conditions.volume,
                confidence: conditions.confidence(),
                meme_allocation: allocation,
            },
        )
        .with_recommendation(action, confidence))
    }

    async fn apply_decision(&self, decision: &Decision) -> Result<()> {
        let cap = if decision.primary_action.is_safety() || decision.primary_action.halts_trading() {
            30.0
        } else {
            100.0
        };
        *self.allocation_cap.write().await = cap;
        debug!(source = %self.name, action = %decision.primary_action, cap, "Meme allocation cap set");
        Ok(())
    }

    async fn learn_from_outcome(&self, outcome: &Outcome) {
        self.learner.lock().await.learn(outcome);
    }
}
