//! Health feedback source
//!
//! Probes API and RPC endpoints, scores their availability and adjusts its own
//! monitoring cadence to the coordinated decision.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

use crate::decision::{Action, Adjustment, Decision, Effect};
use crate::emergency::HealthRecheck;
use crate::error::Result;

use super::{
    AdaptiveConfidence, FeedbackReport, FeedbackSource, Outcome, ScoreWindow, SourceKind,
    SourceMetrics,
};

const API_WEIGHT: f64 = 0.6;
const RPC_WEIGHT: f64 = 0.4;
const APPLIED_LOG_CAPACITY: usize = 50;

/// Configuration for the health source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSourceConfig {
    #[serde(default)]
    pub api_endpoints: Vec<String>,
    #[serde(default)]
    pub rpc_endpoints: Vec<String>,
    /// Per-request timeout
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    /// Responses slower than this count as unhealthy
    #[serde(default = "default_slow_response_ms")]
    pub slow_response_ms: u64,
    /// Smoothing window for the trend
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

impl Default for HealthSourceConfig {
    fn default() -> Self {
        Self {
            api_endpoints: Vec::new(),
            rpc_endpoints: Vec::new(),
            probe_timeout_ms: default_probe_timeout_ms(),
            slow_response_ms: default_slow_response_ms(),
            window_secs: default_window_secs(),
        }
    }
}

fn default_probe_timeout_ms() -> u64 {
    4000
}

fn default_slow_response_ms() -> u64 {
    5000
}

fn default_window_secs() -> u64 {
    300
}

/// Result of probing every configured endpoint once
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProbeReport {
    pub api_total: usize,
    pub api_healthy: usize,
    pub rpc_total: usize,
    pub rpc_healthy: usize,
    pub avg_latency_ms: f64,
}

impl ProbeReport {
    pub fn api_availability(&self) -> Option<f64> {
        ratio(self.api_healthy, self.api_total)
    }

    pub fn rpc_availability(&self) -> Option<f64> {
        ratio(self.rpc_healthy, self.rpc_total)
    }

    /// Weighted availability; groups without endpoints are left out
    pub fn score(&self) -> Option<f64> {
        match (self.api_availability(), self.rpc_availability()) {
            (Some(api), Some(rpc)) => Some(api * API_WEIGHT + rpc * RPC_WEIGHT),
            (Some(api), None) => Some(api),
            (None, Some(rpc)) => Some(rpc),
            (None, None) => None,
        }
    }
}

fn ratio(healthy: usize, total: usize) -> Option<f64> {
    if total == 0 {
        None
    } else {
        Some(healthy as f64 / total as f64)
    }
}

/// Something that can measure endpoint health
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self) -> Result<ProbeReport>;
}

/// HTTP prober for API and JSON-RPC endpoints
pub struct HttpHealthProbe {
    client: reqwest::Client,
    config: HealthSourceConfig,
}

impl HttpHealthProbe {
    pub fn new(config: HealthSourceConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.probe_timeout_ms))
            .build()?;
        Ok(Self { client, config })
    }

    async fn check_api(&self, url: &str) -> (bool, Duration) {
        let start = Instant::now();
        let ok = match self.client.get(url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!(endpoint = %url, error = %e, "API probe failed");
                false
            }
        };
        (ok, start.elapsed())
    }

    async fn check_rpc(&self, url: &str) -> (bool, Duration) {
        let start = Instant::now();
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "getHealth",
        });
        let ok = match self.client.post(url).json(&body).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!(endpoint = %url, error = %e, "RPC probe failed");
                false
            }
        };
        (ok, start.elapsed())
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn probe(&self) -> Result<ProbeReport> {
        let slow = Duration::from_millis(self.config.slow_response_ms);

        let api = join_all(self.config.api_endpoints.iter().map(|u| self.check_api(u)));
        let rpc = join_all(self.config.rpc_endpoints.iter().map(|u| self.check_rpc(u)));
        let (api, rpc) = tokio::join!(api, rpc);

        let healthy = |results: &[(bool, Duration)]| {
            results.iter().filter(|(ok, elapsed)| *ok && *elapsed <= slow).count()
        };

        let latencies: Vec<f64> = api
            .iter()
            .chain(rpc.iter())
            .map(|(_, elapsed)| elapsed.as_secs_f64() * 1000.0)
            .collect();
        let avg_latency_ms = if latencies.is_empty() {
            0.0
        } else {
            latencies.iter().sum::<f64>() / latencies.len() as f64
        };

        Ok(ProbeReport {
            api_total: api.len(),
            api_healthy: healthy(&api),
            rpc_total: rpc.len(),
            rpc_healthy: healthy(&rpc),
            avg_latency_ms,
        })
    }
}

/// Monitoring posture set by the last applied decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringPosture {
    pub interval_secs: u64,
    pub last_action: Option<Action>,
    pub fallback_apis: bool,
}

impl Default for MonitoringPosture {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            last_action: None,
            fallback_apis: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppliedDecision {
    pub decision_id: Uuid,
    pub action: Action,
    pub interval_secs: u64,
    pub timestamp: DateTime<Utc>,
}

/// Health feedback loop
pub struct HealthFeedback {
    name: String,
    probe: Arc<dyn HealthProbe>,
    window: Mutex<ScoreWindow>,
    posture: RwLock<MonitoringPosture>,
    applied: Mutex<VecDeque<AppliedDecision>>,
    learner: Mutex<AdaptiveConfidence>,
}

impl HealthFeedback {
    pub fn new(probe: Arc<dyn HealthProbe>, config: &HealthSourceConfig) -> Self {
        Self {
            name: "health".to_string(),
            probe,
            window: Mutex::new(ScoreWindow::new(Duration::from_secs(config.window_secs), 100, 0.05)),
            posture: RwLock::new(MonitoringPosture::default()),
            applied: Mutex::new(VecDeque::with_capacity(APPLIED_LOG_CAPACITY)),
            learner: Mutex::new(AdaptiveConfidence::default()),
        }
    }

    pub async fn posture(&self) -> MonitoringPosture {
        self.posture.read().await.clone()
    }

    pub async fn applied_decisions(&self) -> Vec<AppliedDecision> {
        self.applied.lock().await.iter().cloned().collect()
    }

    fn recommend(score: f64, api_availability: Option<f64>) -> Action {
        if score < 0.3 {
            Action::EmergencyStop
        } else if score < 0.6 {
            Action::PauseTrading
        } else if api_availability.is_some_and(|a| a < 0.8) {
            Action::ReduceFrequency
        } else {
            Action::ContinueNormal
        }
    }
}

#[async_trait]
impl HealthRecheck for HealthFeedback {
    /// Probe immediately, outside the regular cycle
    async fn forced_recheck(&self) -> Result<FeedbackReport> {
        info!(source = %self.name, "Forced health re-check");
        self.get_feedback().await
    }
}

#[async_trait]
impl FeedbackSource for HealthFeedback {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Health
    }

    async fn get_feedback(&self) -> Result<FeedbackReport> {
        let probe = self.probe.probe().await?;

        let Some(score) = probe.score() else {
            return Ok(FeedbackReport::new(
                &self.name,
                SourceKind::Health,
                0.5,
                "no data: no endpoints configured",
                SourceMetrics::Health {
                    api_availability: 1.0,
                    rpc_availability: 1.0,
                    avg_latency_ms: 0.0,
                    trend: Default::default(),
                },
            ));
        };

        let trend = self.window.lock().await.record(score);

        let api = probe.api_availability();
        let rpc = probe.rpc_availability();
        let action = Self::recommend(score, api);
        let confidence = self.learner.lock().await.confidence(action);

        let reasoning = format!(
            "{}/{} APIs and {}/{} RPCs healthy, avg latency {:.0}ms",
            probe.api_healthy, probe.api_total, probe.rpc_healthy, probe.rpc_total, probe.avg_latency_ms
        );

        Ok(FeedbackReport::new(
            &self.name,
            SourceKind::Health,
            score,
            reasoning,
            SourceMetrics::Health {
                api_availability: api.unwrap_or(1.0),
                rpc_availability: rpc.unwrap_or(1.0),
                avg_latency_ms: probe.avg_latency_ms,
                trend,
            },
        )
        .with_recommendation(action, confidence))
    }

    async fn apply_decision(&self, decision: &Decision) -> Result<()> {
        let interval_secs = match decision.primary_action {
            Action::EmergencyStop => 5,
            Action::OptimizePerformance => 120,
            _ if decision.modifications.get(&Effect::Monitoring) == Some(&Adjustment::Increase) => 10,
            _ => 60,
        };
        let fallback_apis = decision.modifications.get(&Effect::FallbackApis) == Some(&Adjustment::Enable);

        {
            let mut posture = self.posture.write().await;
            posture.interval_secs = interval_secs;
            posture.last_action = Some(decision.primary_action);
            posture.fallback_apis = fallback_apis;
        }

        let mut applied = self.applied.lock().await;
        if applied.back().map(|a| a.decision_id) == Some(decision.id) {
            return Ok(());
        }
        if applied.len() >= APPLIED_LOG_CAPACITY {
            applied.pop_front();
        }
        applied.push_back(AppliedDecision {
            decision_id: decision.id,
            action: decision.primary_action,
            interval_secs,
            timestamp: Utc::now(),
        });

        debug!(
            source = %self.name,
            action = %decision.primary_action,
            interval_secs,
            "Health monitoring adjusted"
        );
        Ok(())
    }

    async fn learn_from_outcome(&self, outcome: &Outcome) {
        let correct = self.learner.lock().await.learn(outcome);
        debug!(source = %self.name, action = %outcome.action, correct, "Health source learned from outcome");
    }
}
