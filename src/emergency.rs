//! Emergency Protocol Manager - kill-switch over the coordination loop
//!
//! Two independent detection paths feed this module:
//! - Decision-time checks: the coordinator hands every cycle's feedback bundle
//!   to [`EmergencyProtocolManager::check_conditions`] and applies the result
//!   inside its own commit.
//! - The watchdog: a faster periodic task that only reads the global state
//!   and fires protocols when health collapses or decisions go stale.
//!
//! Kill-switch conditions override the routine decision. Trading stops and
//! emergency mode engages in the same state update. Recovery only resets the
//! flag after a fixed delay; the next cycle re-evaluates from fresh feedback.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::coordinator::state::{BoundedHistory, GlobalState, SharedState};
use crate::decision::Action;
use crate::error::Result;
use crate::feedback::{FeedbackBundle, FeedbackReport, Urgency};

const RECENT_PROTOCOLS: usize = 5;
const RECHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound for the staleness and retention windows (30 days)
pub const MAX_WINDOW_SECS: u64 = 30 * 24 * 60 * 60;

/// Emergency thresholds and timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmergencyConfig {
    /// Watchdog cadence in seconds
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,

    /// Watchdog: health below this stops everything
    #[serde(default = "default_critical_health")]
    pub critical_health: f64,

    /// Watchdog: restart coordination when the last decision is older than this
    #[serde(default = "default_stale_decision_secs")]
    pub stale_decision_secs: u64,

    /// Delay before emergency mode is cleared
    #[serde(default = "default_recovery_delay_secs")]
    pub recovery_delay_secs: u64,

    /// Emergencies older than this are pruned on recovery
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,

    /// Decision-time: health below this is CRITICAL_HEALTH
    #[serde(default = "default_health_emergency")]
    pub health_emergency: f64,

    /// Decision-time: performance below this is CRITICAL_PERFORMANCE
    #[serde(default = "default_performance_emergency")]
    pub performance_emergency: f64,

    /// Decision-time: this many failed sources is MULTIPLE_SOURCE_FAILURES
    #[serde(default = "default_failure_count")]
    pub failure_count: usize,

    /// Protocol history capacity
    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,
}

fn default_check_interval_secs() -> u64 { 10 }
fn default_critical_health() -> f64 { 0.2 }
fn default_stale_decision_secs() -> u64 { 300 }
fn default_recovery_delay_secs() -> u64 { 30 }
fn default_retention_secs() -> u64 { 1800 }
fn default_health_emergency() -> f64 { 0.3 }
fn default_performance_emergency() -> f64 { 0.2 }
fn default_failure_count() -> usize { 2 }
fn default_log_capacity() -> usize { 100 }

impl Default for EmergencyConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval_secs(),
            critical_health: default_critical_health(),
            stale_decision_secs: default_stale_decision_secs(),
            recovery_delay_secs: default_recovery_delay_secs(),
            retention_secs: default_retention_secs(),
            health_emergency: default_health_emergency(),
            performance_emergency: default_performance_emergency(),
            failure_count: default_failure_count(),
            log_capacity: default_log_capacity(),
        }
    }
}

impl EmergencyConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn recovery_delay(&self) -> Duration {
        Duration::from_secs(self.recovery_delay_secs)
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.retention_secs.min(MAX_WINDOW_SECS) as i64)
    }
}

/// Emergency condition types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EmergencyKind {
    CriticalHealth,
    CriticalPerformance,
    MultipleSourceFailures,
    /// A coordination cycle failed
    CoordinationFailure,
}

impl EmergencyKind {
    /// Kinds that force trading off regardless of the routine decision
    pub fn is_kill_switch(&self) -> bool {
        !matches!(self, EmergencyKind::CriticalPerformance)
    }
}

impl fmt::Display for EmergencyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EmergencyKind::CriticalHealth => "CRITICAL_HEALTH",
            EmergencyKind::CriticalPerformance => "CRITICAL_PERFORMANCE",
            EmergencyKind::MultipleSourceFailures => "MULTIPLE_SOURCE_FAILURES",
            EmergencyKind::CoordinationFailure => "COORDINATION_FAILURE",
        };
        write!(f, "{}", s)
    }
}

/// A detected emergency
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmergencyCondition {
    pub kind: EmergencyKind,
    pub severity: Urgency,
    pub action: Action,
    pub reason: String,
    /// Routine decision in effect when the condition was committed
    pub overridden_action: Option<Action>,
    pub timestamp: DateTime<Utc>,
}

impl EmergencyCondition {
    pub fn new(kind: EmergencyKind, severity: Urgency, action: Action, reason: impl Into<String>) -> Self {
        Self {
            kind,
            severity,
            action,
            reason: reason.into(),
            overridden_action: None,
            timestamp: Utc::now(),
        }
    }

    pub fn coordination_failure(reason: impl Into<String>) -> Self {
        Self::new(
            EmergencyKind::CoordinationFailure,
            Urgency::Critical,
            Action::EmergencyStop,
            reason,
        )
    }
}

/// Protocol fired by the watchdog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProtocolAction {
    EmergencyStopAll,
    RestartCoordination,
}

/// A protocol requested by a watchdog pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProtocolTrigger {
    pub action: ProtocolAction,
    pub reason: String,
}

/// Result of one watchdog pass
#[derive(Debug, Clone, Serialize)]
pub struct CriticalCheckResult {
    pub emergency: bool,
    /// Every protocol that applies, stop before restart
    pub triggers: Vec<ProtocolTrigger>,
    pub health_score: f64,
    pub decision_age_secs: Option<i64>,
}

impl CriticalCheckResult {
    pub fn actions(&self) -> Vec<ProtocolAction> {
        self.triggers.iter().map(|t| t.action).collect()
    }
}

/// A fired protocol
#[derive(Debug, Clone, Serialize)]
pub struct ProtocolRecord {
    pub action: ProtocolAction,
    pub reason: String,
    /// Score from the forced health re-check, when one ran
    pub recheck_score: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// Emergency view exposed to the host
#[derive(Debug, Clone, Serialize)]
pub struct EmergencyStatus {
    pub active_emergency_count: usize,
    pub recent_protocols: Vec<ProtocolRecord>,
    pub emergency_mode: bool,
    pub last_emergency_timestamp: Option<DateTime<Utc>>,
}

/// On-demand health probe used by the watchdog before stopping everything
#[async_trait]
pub trait HealthRecheck: Send + Sync {
    async fn forced_recheck(&self) -> Result<FeedbackReport>;
}

/// Emergency Protocol Manager
pub struct EmergencyProtocolManager {
    config: EmergencyConfig,
    state: SharedState,
    /// Wakes the coordination driver
    restart: Arc<Notify>,
    protocols: Mutex<BoundedHistory<ProtocolRecord>>,
    health_recheck: RwLock<Option<Arc<dyn HealthRecheck>>>,
    /// Bumped by every kill-switch so only the newest recovery timer acts
    generation: AtomicU64,
}

impl EmergencyProtocolManager {
    pub fn new(config: EmergencyConfig, state: SharedState, restart: Arc<Notify>) -> Self {
        let protocols = Mutex::new(BoundedHistory::new(config.log_capacity));
        Self {
            config,
            state,
            restart,
            protocols,
            health_recheck: RwLock::new(None),
            generation: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &EmergencyConfig {
        &self.config
    }

    /// Install the probe used for the forced re-check on EMERGENCY_STOP_ALL
    pub async fn set_health_recheck(&self, recheck: Arc<dyn HealthRecheck>) {
        *self.health_recheck.write().await = Some(recheck);
    }

    /// Decision-time detection over one cycle's feedback
    pub fn check_conditions(&self, bundle: &FeedbackBundle) -> Vec<EmergencyCondition> {
        let mut conditions = Vec::new();

        if let Some(health) = bundle.health_score().filter(|h| *h < self.config.health_emergency) {
            conditions.push(EmergencyCondition::new(
                EmergencyKind::CriticalHealth,
                Urgency::Critical,
                Action::EmergencyStop,
                format!("health score {:.2} below {:.2}", health, self.config.health_emergency),
            ));
        }

        if let Some(performance) = bundle
            .performance_score()
            .filter(|p| *p < self.config.performance_emergency)
        {
            conditions.push(EmergencyCondition::new(
                EmergencyKind::CriticalPerformance,
                Urgency::High,
                Action::DefensiveMode,
                format!(
                    "performance score {:.2} below {:.2}",
                    performance, self.config.performance_emergency
                ),
            ));
        }

        let failures = bundle.failure_count();
        if failures >= self.config.failure_count {
            let names: Vec<&str> = bundle.errors.iter().map(|e| e.source.as_str()).collect();
            conditions.push(EmergencyCondition::new(
                EmergencyKind::MultipleSourceFailures,
                Urgency::Critical,
                Action::EmergencyStop,
                format!("{} sources unavailable: {}", failures, names.join(", ")),
            ));
        }

        conditions
    }

    /// Record conditions and engage the kill-switch on the given state.
    ///
    /// Takes the state already locked so the caller can fold this into its own
    /// update. Returns true when emergency mode was engaged.
    pub fn apply_conditions(&self, state: &mut GlobalState, conditions: &[EmergencyCondition]) -> bool {
        let overridden = state.system.last_decision.as_ref().map(|d| d.primary_action);
        let mut engaged = false;
        for condition in conditions {
            if condition.kind.is_kill_switch() {
                error!(
                    kind = %condition.kind,
                    action = %condition.action,
                    "EMERGENCY: {}",
                    condition.reason
                );
                state.enter_emergency();
                engaged = true;
            } else {
                warn!(
                    kind = %condition.kind,
                    action = %condition.action,
                    "Emergency condition: {}",
                    condition.reason
                );
            }
            state.record_emergency(EmergencyCondition {
                overridden_action: overridden,
                ..condition.clone()
            });
        }
        engaged
    }

    /// Lock the state, apply the conditions and schedule recovery when engaged
    pub async fn handle_emergencies(self: &Arc<Self>, conditions: &[EmergencyCondition], cancel: &CancellationToken) {
        if conditions.is_empty() {
            return;
        }
        let engaged = {
            let mut state = self.state.lock().await;
            self.apply_conditions(&mut state, conditions)
        };
        if engaged {
            self.schedule_recovery(cancel);
        }
    }

    /// Watchdog pass over the current state; never calls feedback sources
    pub async fn perform_critical_checks(&self) -> CriticalCheckResult {
        let (health, age) = {
            let state = self.state.lock().await;
            (state.system.health_score, state.last_decision_age())
        };
        let decision_age_secs = age.map(|a| a.num_seconds());

        let mut triggers = Vec::new();
        if health < self.config.critical_health {
            triggers.push(ProtocolTrigger {
                action: ProtocolAction::EmergencyStopAll,
                reason: format!("critical health score {:.2}", health),
            });
        }
        let stale_after = self.config.stale_decision_secs.min(MAX_WINDOW_SECS) as i64;
        if let Some(age) = decision_age_secs.filter(|a| *a > stale_after) {
            triggers.push(ProtocolTrigger {
                action: ProtocolAction::RestartCoordination,
                reason: format!("no decision for {}s", age),
            });
        }

        let result = CriticalCheckResult {
            emergency: !triggers.is_empty(),
            triggers,
            health_score: health,
            decision_age_secs,
        };

        debug!(
            health = health,
            decision_age_secs = ?decision_age_secs,
            emergency = result.emergency,
            "Critical checks complete"
        );
        result
    }

    /// Fire every protocol a critical check asked for, in order
    pub async fn trigger_emergency_protocol(
        self: &Arc<Self>,
        result: &CriticalCheckResult,
        cancel: &CancellationToken,
    ) -> Vec<ProtocolRecord> {
        let mut records = Vec::with_capacity(result.triggers.len());
        for trigger in &result.triggers {
            let recheck_score = match trigger.action {
                ProtocolAction::EmergencyStopAll => {
                    error!(reason = %trigger.reason, "EMERGENCY PROTOCOL: stopping all trading");
                    let engaged = {
                        let mut state = self.state.lock().await;
                        let condition = EmergencyCondition::new(
                            EmergencyKind::CriticalHealth,
                            Urgency::Critical,
                            Action::EmergencyStop,
                            trigger.reason.clone(),
                        );
                        self.apply_conditions(&mut state, &[condition])
                    };
                    if engaged {
                        self.schedule_recovery(cancel);
                    }
                    self.forced_recheck().await
                }
                ProtocolAction::RestartCoordination => {
                    warn!(reason = %trigger.reason, "EMERGENCY PROTOCOL: restarting coordination");
                    self.restart.notify_one();
                    None
                }
            };

            let record = ProtocolRecord {
                action: trigger.action,
                reason: trigger.reason.clone(),
                recheck_score,
                timestamp: Utc::now(),
            };
            self.protocols.lock().await.push(record.clone());
            records.push(record);
        }
        records
    }

    async fn forced_recheck(&self) -> Option<f64> {
        let recheck = self.health_recheck.read().await.clone()?;
        match tokio::time::timeout(RECHECK_TIMEOUT, recheck.forced_recheck()).await {
            Ok(Ok(report)) => {
                info!(score = report.score, "Health re-check complete");
                Some(report.score)
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Health re-check failed");
                None
            }
            Err(_) => {
                warn!("Health re-check timed out");
                None
            }
        }
    }

    /// Clear emergency mode and prune old emergencies.
    ///
    /// Only resets the flag. Trading resumes when the next cycle decides so.
    pub async fn attempt_recovery(&self) -> bool {
        let mut state = self.state.lock().await;
        if !state.system.emergency_mode {
            return false;
        }
        state.clear_emergency(self.config.retention());
        info!(
            remaining_emergencies = state.emergencies().len(),
            "Emergency mode cleared, awaiting next coordination cycle"
        );
        true
    }

    /// Recover after the configured delay unless a newer emergency supersedes it
    pub fn schedule_recovery(self: &Arc<Self>, cancel: &CancellationToken) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let manager = Arc::clone(self);
        let cancel = cancel.clone();
        let delay = self.config.recovery_delay();

        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    if manager.generation.load(Ordering::SeqCst) == generation {
                        manager.attempt_recovery().await;
                    } else {
                        debug!("Recovery superseded by a newer emergency");
                    }
                }
            }
        });
    }

    pub async fn get_emergency_status(&self) -> EmergencyStatus {
        let recent_protocols = self.protocols.lock().await.recent(RECENT_PROTOCOLS);
        let state = self.state.lock().await;
        EmergencyStatus {
            active_emergency_count: state.emergencies().len(),
            recent_protocols,
            emergency_mode: state.system.emergency_mode,
            last_emergency_timestamp: state.system.last_emergency_at,
        }
    }

    /// Run the watchdog until cancelled. The first check happens one period in.
    pub fn spawn_watchdog(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let period = self.config.check_interval();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // Skip the immediate first tick
            interval.tick().await;
            info!(interval_secs = period.as_secs(), "Emergency watchdog started");

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("Emergency watchdog stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        let result = manager.perform_critical_checks().await;
                        if result.emergency {
                            manager.trigger_emergency_protocol(&result, &cancel).await;
                        }
                    }
                }
            }
        })
    }
}
