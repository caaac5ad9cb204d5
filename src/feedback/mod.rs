//! Feedback sources for the coordination loop
//!
//! Each source produces a normalized assessment of one subsystem (health,
//! performance, market conditions), accepts the coordinated decision, and
//! optionally learns from observed outcomes. The coordinator depends only on
//! the [`FeedbackSource`] trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::decision::{Action, Decision};
use crate::error::{Error, Result};

pub mod health;
pub mod learning;
pub mod market;
pub mod performance;
pub mod window;

// Re-exports
pub use health::{HealthFeedback, HealthProbe, HttpHealthProbe, ProbeReport};
pub use learning::AdaptiveConfidence;
pub use market::{Level, MarketFeedback, MarketTrend};
pub use performance::{PerformanceFeedback, TradeRecord};
pub use window::ScoreWindow;

/// Urgency classification, ordered from least to most urgent
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Urgency {
    Low,
    Medium,
    High,
    Critical,
}

impl Default for Urgency {
    fn default() -> Self {
        Self::Low
    }
}

impl fmt::Display for Urgency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Urgency::Low => "LOW",
            Urgency::Medium => "MEDIUM",
            Urgency::High => "HIGH",
            Urgency::Critical => "CRITICAL",
        };
        write!(f, "{}", s)
    }
}

/// The kind of subsystem a source reports on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Health,
    Performance,
    Market,
}

impl SourceKind {
    /// Derive urgency from a normalized score using this kind's fixed thresholds
    pub fn urgency_for(&self, score: f64) -> Urgency {
        let (critical, high, medium) = match self {
            SourceKind::Health => (0.3, 0.6, 0.8),
            SourceKind::Performance => (0.3, 0.5, 0.65),
            SourceKind::Market => (0.25, 0.4, 0.6),
        };
        if score < critical {
            Urgency::Critical
        } else if score < high {
            Urgency::High
        } else if score < medium {
            Urgency::Medium
        } else {
            Urgency::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Health => "health",
            SourceKind::Performance => "performance",
            SourceKind::Market => "market",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of a smoothed score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Improving,
    Stable,
    Degrading,
}

impl Default for Trend {
    fn default() -> Self {
        Self::Stable
    }
}

impl Trend {
    /// Classify a change in score
    pub fn from_delta(delta: f64, threshold: f64) -> Self {
        if delta > threshold {
            Trend::Improving
        } else if delta < -threshold {
            Trend::Degrading
        } else {
            Trend::Stable
        }
    }
}

/// Source-specific auxiliary metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceMetrics {
    Health {
        api_availability: f64,
        rpc_availability: f64,
        avg_latency_ms: f64,
        trend: Trend,
    },
    Performance {
        win_rate: f64,
        avg_roi: f64,
        sharpe: f64,
        max_drawdown: f64,
        trades: usize,
    },
    Market {
        trend: MarketTrend,
        volatility: Level,
        volume: Level,
        confidence: f64,
        /// Percentage of capital suggested for the meme strategy
        meme_allocation: f64,
    },
    Unavailable {
        reason: String,
    },
}

/// A source's own suggested action, with its learned confidence
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub action: Action,
    pub confidence: f64,
}

/// Structured assessment produced by a source each cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackReport {
    pub source: String,
    pub kind: SourceKind,
    /// Normalized score in [0, 1]
    pub score: f64,
    pub urgency: Urgency,
    pub reasoning: String,
    pub metrics: SourceMetrics,
    pub recommendation: Option<Recommendation>,
    pub timestamp: DateTime<Utc>,
}

impl FeedbackReport {
    /// Create a report; the score is clamped and urgency derived from it
    pub fn new(
        source: impl Into<String>,
        kind: SourceKind,
        score: f64,
        reasoning: impl Into<String>,
        metrics: SourceMetrics,
    ) -> Self {
        let score = if score.is_finite() { score.clamp(0.0, 1.0) } else { 0.0 };
        Self {
            source: source.into(),
            kind,
            score,
            urgency: kind.urgency_for(score),
            reasoning: reasoning.into(),
            metrics,
            recommendation: None,
            timestamp: Utc::now(),
        }
    }

    /// Degraded report standing in for a source that failed or timed out
    pub fn unavailable(source: impl Into<String>, kind: SourceKind, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            source: source.into(),
            kind,
            score: 0.0,
            urgency: Urgency::Critical,
            reasoning: format!("source unavailable: {}", reason),
            metrics: SourceMetrics::Unavailable { reason },
            recommendation: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_recommendation(mut self, action: Action, confidence: f64) -> Self {
        self.recommendation = Some(Recommendation {
            action,
            confidence: confidence.clamp(0.0, 1.0),
        });
        self
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self.metrics, SourceMetrics::Unavailable { .. })
    }
}

/// A source-level failure recorded during a cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceError {
    pub source: String,
    pub kind: SourceKind,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

/// All reports gathered in one cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackBundle {
    pub reports: Vec<FeedbackReport>,
    pub errors: Vec<SourceError>,
    pub timestamp: DateTime<Utc>,
}

impl FeedbackBundle {
    pub fn new(reports: Vec<FeedbackReport>) -> Self {
        Self {
            reports,
            errors: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    /// Score of the given kind; the lowest wins when several sources share a kind
    pub fn score_of(&self, kind: SourceKind) -> Option<f64> {
        self.reports
            .iter()
            .filter(|r| r.kind == kind)
            .map(|r| r.score)
            .reduce(f64::min)
    }

    pub fn health_score(&self) -> Option<f64> {
        self.score_of(SourceKind::Health)
    }

    pub fn performance_score(&self) -> Option<f64> {
        self.score_of(SourceKind::Performance)
    }

    pub fn market_score(&self) -> Option<f64> {
        self.score_of(SourceKind::Market)
    }

    /// API availability reported by the first available health source
    pub fn api_availability(&self) -> Option<f64> {
        self.reports.iter().find_map(|r| match r.metrics {
            SourceMetrics::Health { api_availability, .. } => Some(api_availability),
            _ => None,
        })
    }

    pub fn market_conditions(&self) -> Option<(MarketTrend, Level)> {
        self.reports.iter().find_map(|r| match r.metrics {
            SourceMetrics::Market {
                trend, volatility, ..
            } => Some((trend, volatility)),
            _ => None,
        })
    }

    /// Highest urgency across all reports
    pub fn max_urgency(&self) -> Urgency {
        self.reports
            .iter()
            .map(|r| r.urgency)
            .max()
            .unwrap_or_default()
    }

    /// Number of sources that failed to report this cycle
    pub fn failure_count(&self) -> usize {
        self.errors.len()
    }
}

/// Observed result of a past decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub decision_id: Uuid,
    pub action: Action,
    pub system_stabilized: bool,
    pub health_improved: bool,
    pub losses_avoided: bool,
    pub major_degradation: bool,
    pub timestamp: DateTime<Utc>,
}

impl Outcome {
    pub fn for_decision(decision: &Decision) -> Self {
        Self {
            decision_id: decision.id,
            action: decision.primary_action,
            system_stabilized: false,
            health_improved: false,
            losses_avoided: false,
            major_degradation: false,
            timestamp: Utc::now(),
        }
    }

    /// Whether the decided action turned out to be right
    pub fn was_correct(&self) -> bool {
        match self.action {
            Action::EmergencyStop => self.system_stabilized,
            Action::PauseTrading => self.losses_avoided || self.health_improved,
            _ => !self.major_degradation,
        }
    }
}

/// Capability surface every feedback loop exposes to the coordinator
#[async_trait]
pub trait FeedbackSource: Send + Sync {
    /// Source identifier
    fn name(&self) -> &str;

    fn kind(&self) -> SourceKind;

    /// Per-source bound on `get_feedback`; `None` uses the coordinator default
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Produce the current assessment
    async fn get_feedback(&self) -> Result<FeedbackReport>;

    /// Adjust internal behavior to the coordinated decision. Must be idempotent.
    async fn apply_decision(&self, decision: &Decision) -> Result<()>;

    /// Best-effort learning hook
    async fn learn_from_outcome(&self, _outcome: &Outcome) {}
}

/// Collect feedback from every source concurrently.
///
/// Each call runs in its own task under its own timeout. A failing, slow or
/// panicking source yields a degraded report and a recorded error; it never
/// affects collection from the others.
pub async fn collect_feedback(
    sources: &[Arc<dyn FeedbackSource>],
    default_timeout: Duration,
) -> FeedbackBundle {
    let tasks = sources.iter().map(|source| {
        let source = Arc::clone(source);
        let name = source.name().to_string();
        let kind = source.kind();
        let timeout = source.timeout().unwrap_or(default_timeout);
        let handle = tokio::spawn(async move {
            match tokio::time::timeout(timeout, source.get_feedback()).await {
                Ok(result) => result,
                Err(_) => Err(Error::SourceTimeout {
                    source_name: source.name().to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                }),
            }
        });
        async move {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(Error::unavailable(&name, format!("task failed: {}", e))),
            };
            (name, kind, result)
        }
    });

    let mut reports = Vec::with_capacity(sources.len());
    let mut errors = Vec::new();
    for (name, kind, result) in join_all(tasks).await {
        match result {
            Ok(report) => {
                debug!(source = %name, score = report.score, urgency = %report.urgency, "Feedback collected");
                reports.push(report);
            }
            Err(e) => {
                warn!(source = %name, error = %e, "Feedback source unavailable");
                reports.push(FeedbackReport::unavailable(&name, kind, e.to_string()));
                errors.push(SourceError {
                    source: name,
                    kind,
                    error: e.to_string(),
                    timestamp: Utc::now(),
                });
            }
        }
    }

    FeedbackBundle {
        reports,
        errors,
        timestamp: Utc::now(),
    }
}

/// Apply a decision to every source concurrently; failures are returned, never raised
pub async fn apply_to_all(
    sources: &[Arc<dyn FeedbackSource>],
    decision: &Decision,
    timeout: Duration,
) -> Vec<SourceError> {
    let tasks = sources.iter().map(|source| {
        let source = Arc::clone(source);
        let decision = decision.clone();
        let name = source.name().to_string();
        let kind = source.kind();
        let handle = tokio::spawn(async move {
            match tokio::time::timeout(timeout, source.apply_decision(&decision)).await {
                Ok(result) => result,
                Err(_) => Err(Error::SourceTimeout {
                    source_name: source.name().to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                }),
            }
        });
        async move {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(Error::ApplyDecision {
                    source_name: name.clone(),
                    reason: format!("task failed: {}", e),
                }),
            };
            (name, kind, result)
        }
    });

    join_all(tasks)
        .await
        .into_iter()
        .filter_map(|(name, kind, result)| match result {
            Ok(()) => None,
            Err(e) => {
                warn!(source = %name, error = %e, "Failed to apply decision");
                Some(SourceError {
                    source: name,
                    kind,
                    error: e.to_string(),
                    timestamp: Utc::now(),
                })
            }
        })
        .collect()
}

/// Hand an outcome to every source, each under its own timeout.
///
/// Learning never fails the caller. Returns the sources whose learner
/// timed out or panicked.
pub async fn broadcast_outcome(
    sources: &[Arc<dyn FeedbackSource>],
    outcome: &Outcome,
    timeout: Duration,
) -> Vec<String> {
    let tasks = sources.iter().map(|source| {
        let source = Arc::clone(source);
        let outcome = outcome.clone();
        let name = source.name().to_string();
        let handle = tokio::spawn(async move {
            tokio::time::timeout(timeout, source.learn_from_outcome(&outcome))
                .await
                .is_ok()
        });
        async move {
            match handle.await {
                Ok(true) => None,
                Ok(false) => {
                    warn!(source = %name, timeout_ms = timeout.as_millis() as u64, "Learning timed out");
                    Some(name)
                }
                Err(e) => {
                    warn!(source = %name, error = %e, "Learning task failed");
                    Some(name)
                }
            }
        }
    });

    join_all(tasks).await.into_iter().flatten().collect()
}
