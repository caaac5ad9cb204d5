//! Master coordinator
//!
//! Owns the source registry and the coordination cycle:
//! collect -> analyze -> decide -> commit -> apply.
//!
//! Lifecycle: STOPPED -> ACTIVE -> RECOVERING (cycle failure) -> ACTIVE (next
//! successful cycle). `stop_coordination` returns to STOPPED from either.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{Config, CoordinatorConfig};
use crate::decision::{Decision, RuleSummary, UnifiedDecisionEngine};
use crate::emergency::{EmergencyCondition, EmergencyProtocolManager, EmergencyStatus, HealthRecheck};
use crate::error::{Error, Result};
use crate::feedback::{self, FeedbackSource, Outcome};

use super::state::{CoordinationMetrics, GlobalState, SharedState, SystemState};

const RECENT_DECISIONS: usize = 5;

/// Coordinator lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CoordinatorState {
    Stopped,
    Active,
    Recovering,
}

impl fmt::Display for CoordinatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CoordinatorState::Stopped => "STOPPED",
            CoordinatorState::Active => "ACTIVE",
            CoordinatorState::Recovering => "RECOVERING",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StartReport {
    pub status: CoordinatorState,
    pub registered_sources: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StopReport {
    pub status: CoordinatorState,
    pub timestamp: DateTime<Utc>,
}

/// Host-facing status snapshot
#[derive(Debug, Clone, Serialize)]
pub struct GlobalStatus {
    pub coordination_active: bool,
    pub loop_count: u64,
    pub coordinator_state: CoordinatorState,
    pub system: SystemState,
    pub metrics: CoordinationMetrics,
    pub recent_decisions: Vec<Decision>,
    pub timestamp: DateTime<Utc>,
}

struct Lifecycle {
    state: CoordinatorState,
    cancel: Option<CancellationToken>,
}

struct Inner {
    config: CoordinatorConfig,
    engine: UnifiedDecisionEngine,
    state: SharedState,
    emergency: Arc<EmergencyProtocolManager>,
    sources: RwLock<Vec<Arc<dyn FeedbackSource>>>,
    lifecycle: RwLock<Lifecycle>,
    loop_count: AtomicU64,
    /// Serializes cycles from the interval, retries and restarts
    cycle_lock: Mutex<()>,
    restart: Arc<Notify>,
}

/// Master Coordinator
#[derive(Clone)]
pub struct MasterCoordinator {
    inner: Arc<Inner>,
}

impl MasterCoordinator {
    /// Coordinator with the standard rule set
    pub fn new(config: &Config) -> Self {
        Self::with_engine(config, UnifiedDecisionEngine::from_config(&config.engine))
    }

    pub fn with_engine(config: &Config, engine: UnifiedDecisionEngine) -> Self {
        let state = GlobalState::new(
            config.coordinator.decision_history,
            config.emergency.log_capacity,
            config.coordinator.error_history,
        )
        .shared();
        let restart = Arc::new(Notify::new());
        let emergency = Arc::new(EmergencyProtocolManager::new(
            config.emergency.clone(),
            state.clone(),
            restart.clone(),
        ));

        Self {
            inner: Arc::new(Inner {
                config: config.coordinator.clone(),
                engine,
                state,
                emergency,
                sources: RwLock::new(Vec::new()),
                lifecycle: RwLock::new(Lifecycle {
                    state: CoordinatorState::Stopped,
                    cancel: None,
                }),
                loop_count: AtomicU64::new(0),
                cycle_lock: Mutex::new(()),
                restart,
            }),
        }
    }

    pub async fn register_source(&self, source: Arc<dyn FeedbackSource>) {
        info!(source = %source.name(), kind = %source.kind(), "Feedback source registered");
        self.inner.sources.write().await.push(source);
    }

    pub async fn registered_sources(&self) -> Vec<String> {
        self.inner
            .sources
            .read()
            .await
            .iter()
            .map(|s| s.name().to_string())
            .collect()
    }

    /// Install the health probe the watchdog re-checks before stopping everything
    pub async fn set_health_recheck(&self, recheck: Arc<dyn HealthRecheck>) {
        self.inner.emergency.set_health_recheck(recheck).await;
    }

    pub fn rule_summaries(&self) -> Vec<RuleSummary> {
        self.inner.engine.rule_summaries()
    }

    pub fn emergency(&self) -> &Arc<EmergencyProtocolManager> {
        &self.inner.emergency
    }

    pub async fn coordinator_state(&self) -> CoordinatorState {
        self.inner.lifecycle.read().await.state
    }

    /// Start the coordination driver and the emergency watchdog
    pub async fn start_coordination(&self) -> Result<StartReport> {
        let mut lifecycle = self.inner.lifecycle.write().await;
        if lifecycle.state != CoordinatorState::Stopped {
            return Err(Error::AlreadyActive);
        }

        let cancel = CancellationToken::new();
        self.inner.state.lock().await.mark_started();

        // Both tasks exit on cancellation
        tokio::spawn(Inner::drive(Arc::clone(&self.inner), cancel.clone()));
        self.inner.emergency.spawn_watchdog(cancel.clone());

        lifecycle.state = CoordinatorState::Active;
        lifecycle.cancel = Some(cancel);
        drop(lifecycle);

        let registered_sources = self.registered_sources().await;
        info!(
            sources = registered_sources.len(),
            interval_secs = self.inner.config.cycle_interval_secs,
            "Coordination started"
        );

        Ok(StartReport {
            status: CoordinatorState::Active,
            registered_sources,
            timestamp: Utc::now(),
        })
    }

    /// Cancel every timer and deregister sources. An in-flight cycle either
    /// finishes its commit or is abandoned before it.
    pub async fn stop_coordination(&self) -> Result<StopReport> {
        let mut lifecycle = self.inner.lifecycle.write().await;
        if lifecycle.state == CoordinatorState::Stopped {
            return Err(Error::NotActive);
        }

        if let Some(cancel) = lifecycle.cancel.take() {
            cancel.cancel();
        }
        lifecycle.state = CoordinatorState::Stopped;
        drop(lifecycle);

        let deregistered = {
            let mut sources = self.inner.sources.write().await;
            let n = sources.len();
            sources.clear();
            n
        };
        info!(deregistered = deregistered, "Coordination stopped");

        Ok(StopReport {
            status: CoordinatorState::Stopped,
            timestamp: Utc::now(),
        })
    }

    /// Run one cycle outside the periodic driver
    pub async fn run_cycle_once(&self) -> Result<Decision> {
        let cancel = self
            .inner
            .lifecycle
            .read()
            .await
            .cancel
            .clone()
            .unwrap_or_default();
        self.inner.guarded_cycle(&cancel).await
    }

    pub async fn get_global_status(&self) -> GlobalStatus {
        let coordinator_state = self.coordinator_state().await;
        let snapshot = self.inner.state.lock().await.snapshot(RECENT_DECISIONS);
        GlobalStatus {
            coordination_active: coordinator_state != CoordinatorState::Stopped,
            loop_count: self.inner.loop_count.load(Ordering::SeqCst),
            coordinator_state,
            system: snapshot.system,
            metrics: snapshot.metrics,
            recent_decisions: snapshot.recent_decisions,
            timestamp: Utc::now(),
        }
    }

    pub async fn get_emergency_status(&self) -> EmergencyStatus {
        self.inner.emergency.get_emergency_status().await
    }

    /// Hand an observed outcome to every source's learning hook.
    ///
    /// Returns the sources whose learner timed out or panicked.
    pub async fn report_outcome(&self, outcome: &Outcome) -> Vec<String> {
        let sources = self.inner.sources.read().await.clone();
        debug!(decision = %outcome.decision_id, correct = outcome.was_correct(), "Broadcasting outcome");
        feedback::broadcast_outcome(&sources, outcome, self.inner.config.apply_timeout()).await
    }
}

impl Inner {
    /// Periodic driver. Wakes on the interval, a pending retry, or a restart request.
    async fn drive(inner: Arc<Inner>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(inner.config.cycle_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut retry_at: Option<Instant> = None;

        loop {
            let trigger = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => "retry",
                _ = inner.restart.notified() => {
                    interval.reset();
                    "restart"
                }
                _ = interval.tick() => "interval",
            };
            retry_at = None;
            debug!(trigger = trigger, "Coordination cycle triggered");

            match inner.guarded_cycle(&cancel).await {
                Ok(_) => {}
                Err(Error::CycleAbandoned) => break,
                Err(e) if !e.is_retryable() => {
                    warn!(error = %e, "Cycle failure is not retryable, waiting for the next interval");
                }
                Err(_) => {
                    let backoff = inner.config.retry_backoff();
                    info!(backoff_secs = backoff.as_secs(), "Coordination retry scheduled");
                    retry_at = Some(Instant::now() + backoff);
                }
            }
        }

        debug!("Coordination driver stopped");
    }

    /// Run one cycle in its own task, serialized and bounded by the cycle timeout
    async fn guarded_cycle(self: &Arc<Self>, cancel: &CancellationToken) -> Result<Decision> {
        let _serial = self.cycle_lock.lock().await;

        let inner = Arc::clone(self);
        let token = cancel.clone();
        let mut handle = tokio::spawn(async move { inner.cycle(&token).await });

        let limit = self.config.cycle_timeout();
        let result = match tokio::time::timeout(limit, &mut handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(Error::CoordinationCycle(format!("cycle task failed: {}", e))),
            Err(_) => {
                handle.abort();
                Err(Error::CycleTimeout(limit.as_secs()))
            }
        };

        match result {
            Ok(decision) => {
                self.loop_count.fetch_add(1, Ordering::SeqCst);
                let mut lifecycle = self.lifecycle.write().await;
                if lifecycle.state == CoordinatorState::Recovering {
                    lifecycle.state = CoordinatorState::Active;
                    info!("Coordination recovered");
                }
                Ok(decision)
            }
            Err(Error::CycleAbandoned) => {
                debug!("Coordination cycle abandoned");
                Err(Error::CycleAbandoned)
            }
            Err(e) => {
                self.handle_cycle_failure(&e, cancel).await;
                Err(e)
            }
        }
    }

    async fn handle_cycle_failure(self: &Arc<Self>, e: &Error, cancel: &CancellationToken) {
        error!(error = %e, "Coordination cycle failed");

        {
            let mut lifecycle = self.lifecycle.write().await;
            if lifecycle.state == CoordinatorState::Active {
                lifecycle.state = CoordinatorState::Recovering;
                warn!("Coordinator entering recovery");
            }
        }

        let engaged = {
            let mut state = self.state.lock().await;
            state.record_cycle_failure();
            self.emergency
                .apply_conditions(&mut state, &[EmergencyCondition::coordination_failure(e.to_string())])
        };
        if engaged {
            self.emergency.schedule_recovery(cancel);
        }
    }

    async fn cycle(self: &Arc<Self>, cancel: &CancellationToken) -> Result<Decision> {
        let sources = self.sources.read().await.clone();

        let bundle = feedback::collect_feedback(&sources, self.config.source_timeout()).await;
        let analysis = self.engine.analyze(bundle);
        let decision = self.engine.decide(&analysis);
        let conditions = self.emergency.check_conditions(&analysis.bundle);

        // Commit decision and emergency overrides in one state update
        let engaged = {
            let mut state = self.state.lock().await;
            if cancel.is_cancelled() {
                return Err(Error::CycleAbandoned);
            }
            state.commit_cycle(decision.clone(), &analysis.bundle);
            self.emergency.apply_conditions(&mut state, &conditions)
        };
        if engaged {
            self.emergency.schedule_recovery(cancel);
        }

        let apply_errors =
            feedback::apply_to_all(&sources, &decision, self.config.apply_timeout()).await;
        if !apply_errors.is_empty() {
            self.state.lock().await.record_source_errors(&apply_errors);
        }

        info!(
            action = %decision.primary_action,
            sources = sources.len(),
            source_failures = analysis.bundle.failure_count(),
            apply_failures = apply_errors.len(),
            emergencies = conditions.len(),
            "Coordination cycle complete"
        );

        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::Action;
    use crate::emergency::EmergencyKind;
    use crate::feedback::testing::{report, Behavior, ScriptedSource};
    use crate::feedback::{FeedbackReport, SourceKind};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    /// Hangs until told to recover
    struct FlakySource {
        hang: AtomicBool,
    }

    #[async_trait]
    impl FeedbackSource for FlakySource {
        fn name(&self) -> &str {
            "flaky"
        }

        fn kind(&self) -> SourceKind {
            SourceKind::Health
        }

        async fn get_feedback(&self) -> Result<FeedbackReport> {
            if self.hang.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            Ok(report(SourceKind::Health, 0.9))
        }

        async fn apply_decision(&self, _decision: &Decision) -> Result<()> {
            Ok(())
        }
    }

    async fn coordinator(sources: Vec<ScriptedSource>) -> MasterCoordinator {
        coordinator_with(Config::default(), sources).await
    }

    async fn coordinator_with(config: Config, sources: Vec<ScriptedSource>) -> MasterCoordinator {
        let coordinator = MasterCoordinator::new(&config);
        for source in sources {
            coordinator.register_source(Arc::new(source)).await;
        }
        coordinator
    }

    fn scored(name: &str, kind: SourceKind, score: f64) -> ScriptedSource {
        ScriptedSource::new(name, kind, Behavior::Score(score))
    }

    #[tokio::test]
    async fn test_healthy_sources_optimize() {
        let coordinator = coordinator(vec![
            scored("health", SourceKind::Health, 0.9),
            scored("performance", SourceKind::Performance, 0.85),
            scored("market", SourceKind::Market, 0.88),
        ])
        .await;

        let decision = coordinator.run_cycle_once().await.unwrap();
        assert_eq!(decision.primary_action, Action::OptimizePerformance);
        assert!(!decision.emergency_override);

        let status = coordinator.get_global_status().await;
        assert!(status.system.trading_active);
        assert!(!status.system.emergency_mode);
        assert_eq!(status.loop_count, 1);
        assert_eq!(status.metrics.total_decisions, 1);
        assert_eq!(status.system.health_score, 0.9);
        assert!(!status.coordination_active);
    }

    #[tokio::test]
    async fn test_critical_health_wins_conflict() {
        let coordinator = coordinator(vec![
            scored("health", SourceKind::Health, 0.25),
            scored("performance", SourceKind::Performance, 0.9),
        ])
        .await;

        let decision = coordinator.run_cycle_once().await.unwrap();
        assert_eq!(decision.primary_action, Action::EmergencyStop);
        assert!(decision.emergency_override);
        assert!(decision.conflicts_resolved > 0);

        let status = coordinator.get_global_status().await;
        assert!(status.system.emergency_mode);
        assert!(!status.system.trading_active);

        let emergency = coordinator.get_emergency_status().await;
        assert_eq!(emergency.active_emergency_count, 1);
        assert!(emergency.emergency_mode);
    }

    #[tokio::test(start_paused = true)]
    async fn test_multiple_source_failures_force_emergency() {
        let coordinator = coordinator(vec![
            scored("health", SourceKind::Health, 0.9),
            ScriptedSource::new("performance", SourceKind::Performance, Behavior::Fail),
            ScriptedSource::new("market", SourceKind::Market, Behavior::Hang),
        ])
        .await;

        // The cycle completes despite two unavailable sources
        let decision = coordinator.run_cycle_once().await.unwrap();
        assert!(decision.primary_action.is_safety());

        let status = coordinator.get_global_status().await;
        assert!(status.system.emergency_mode);
        assert!(!status.system.trading_active);
        assert_eq!(status.loop_count, 1);

        let state = coordinator.inner.state.lock().await;
        let failure = state
            .emergencies()
            .iter()
            .find(|e| e.kind == EmergencyKind::MultipleSourceFailures)
            .cloned()
            .unwrap();
        assert_eq!(failure.overridden_action, Some(decision.primary_action));
        assert_eq!(state.source_errors().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_cycle_leaves_state_untouched() {
        let coordinator = coordinator(vec![
            scored("health", SourceKind::Health, 0.1),
            ScriptedSource::new("market", SourceKind::Market, Behavior::Hang),
        ])
        .await;

        coordinator.start_coordination().await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        coordinator.stop_coordination().await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;

        let status = coordinator.get_global_status().await;
        assert_eq!(status.coordinator_state, CoordinatorState::Stopped);
        assert_eq!(status.metrics.total_decisions, 0);
        assert_eq!(status.loop_count, 0);
        assert!(status.system.last_decision.is_none());
        assert!(status.system.trading_active);
        assert!(!status.system.emergency_mode);
    }

    #[tokio::test]
    async fn test_lifecycle_transitions() {
        let coordinator = coordinator(vec![scored("health", SourceKind::Health, 0.9)]).await;
        assert_eq!(coordinator.coordinator_state().await, CoordinatorState::Stopped);
        assert!(matches!(coordinator.stop_coordination().await, Err(Error::NotActive)));

        let report = assert_ok!(coordinator.start_coordination().await);
        assert_eq!(report.status, CoordinatorState::Active);
        assert_eq!(report.registered_sources, vec!["health".to_string()]);
        assert!(matches!(coordinator.start_coordination().await, Err(Error::AlreadyActive)));

        let report = assert_ok!(coordinator.stop_coordination().await);
        assert_eq!(report.status, CoordinatorState::Stopped);
        assert_err!(coordinator.stop_coordination().await);
        assert!(coordinator.registered_sources().await.is_empty());
        assert!(!coordinator.get_global_status().await.coordination_active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_cycles() {
        let coordinator = coordinator(vec![scored("health", SourceKind::Health, 0.9)]).await;
        coordinator.start_coordination().await.unwrap();

        tokio::time::sleep(Duration::from_secs(65)).await;
        assert_eq!(coordinator.get_global_status().await.loop_count, 3);

        coordinator.stop_coordination().await.unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(coordinator.get_global_status().await.loop_count, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_request_runs_cycle() {
        let coordinator = coordinator(vec![scored("health", SourceKind::Health, 0.9)]).await;
        coordinator.start_coordination().await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(coordinator.get_global_status().await.loop_count, 1);

        coordinator.inner.restart.notify_one();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(coordinator.get_global_status().await.loop_count, 2);
        coordinator.stop_coordination().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_failure_enters_recovery() {
        let mut config = Config::default();
        config.coordinator.cycle_timeout_secs = 1;
        let coordinator = MasterCoordinator::new(&config);
        let flaky = Arc::new(FlakySource {
            hang: AtomicBool::new(true),
        });
        coordinator.register_source(flaky.clone()).await;

        coordinator.start_coordination().await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(coordinator.coordinator_state().await, CoordinatorState::Recovering);
        let status = coordinator.get_global_status().await;
        assert_eq!(status.metrics.cycle_failures, 1);
        assert!(status.system.emergency_mode);
        assert!(!status.system.trading_active);
        {
            let state = coordinator.inner.state.lock().await;
            assert_eq!(
                state.emergencies().last().map(|e| e.kind),
                Some(EmergencyKind::CoordinationFailure)
            );
        }

        // Next interval tick succeeds
        flaky.hang.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(coordinator.coordinator_state().await, CoordinatorState::Active);
        let status = coordinator.get_global_status().await;
        assert_eq!(status.loop_count, 1);
        assert!(status.system.trading_active);
        assert!(!status.system.emergency_mode);

        coordinator.stop_coordination().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_cycle_retries_after_backoff() {
        let mut config = Config::default();
        config.coordinator.cycle_interval_secs = 600;
        config.coordinator.cycle_timeout_secs = 1;
        let coordinator = MasterCoordinator::new(&config);
        let flaky = Arc::new(FlakySource {
            hang: AtomicBool::new(true),
        });
        coordinator.register_source(flaky.clone()).await;
        coordinator.start_coordination().await.unwrap();

        // First cycle times out at +1s; the retry waits the 60s backoff
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(coordinator.get_global_status().await.metrics.cycle_failures, 1);
        assert_eq!(coordinator.coordinator_state().await, CoordinatorState::Recovering);

        // Retry at +61s fails, the next at +122s fails too
        tokio::time::sleep(Duration::from_secs(33)).await;
        assert_eq!(coordinator.get_global_status().await.metrics.cycle_failures, 2);
        assert_eq!(coordinator.coordinator_state().await, CoordinatorState::Recovering);
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(coordinator.get_global_status().await.metrics.cycle_failures, 3);
        assert_eq!(coordinator.coordinator_state().await, CoordinatorState::Recovering);

        // The retry at +183s succeeds, well before the next interval tick
        flaky.hang.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(62)).await;
        let status = coordinator.get_global_status().await;
        assert_eq!(status.coordinator_state, CoordinatorState::Active);
        assert_eq!(status.loop_count, 1);
        assert_eq!(status.metrics.cycle_failures, 3);

        coordinator.stop_coordination().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_report_outcome_with_stalled_learner_returns() {
        let mut stalled = scored("market", SourceKind::Market, 0.5);
        stalled.stall_learning = true;
        let healthy = Arc::new(scored("health", SourceKind::Health, 0.9));
        let coordinator = coordinator(vec![stalled]).await;
        coordinator.register_source(healthy.clone()).await;

        let decision = coordinator.run_cycle_once().await.unwrap();
        let failed = tokio::time::timeout(
            Duration::from_secs(60),
            coordinator.report_outcome(&Outcome::for_decision(&decision)),
        )
        .await
        .unwrap();
        assert_eq!(failed, vec!["market".to_string()]);
        assert_eq!(healthy.learned.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_apply_failures_are_recorded_not_fatal() {
        let mut rejecting = scored("performance", SourceKind::Performance, 0.7);
        rejecting.fail_apply = true;
        let rejecting = Arc::new(rejecting);
        let healthy = Arc::new(scored("health", SourceKind::Health, 0.9));

        let coordinator = MasterCoordinator::new(&Config::default());
        coordinator.register_source(rejecting.clone()).await;
        coordinator.register_source(healthy.clone()).await;

        let decision = coordinator.run_cycle_once().await.unwrap();
        assert_eq!(decision.primary_action, Action::ContinueNormal);
        assert_eq!(rejecting.applied(), 1);
        assert_eq!(healthy.applied(), 1);
        assert_eq!(coordinator.inner.state.lock().await.source_errors().len(), 1);
    }

    #[tokio::test]
    async fn test_decision_history_is_bounded() {
        let mut config = Config::default();
        config.coordinator.decision_history = 3;
        let coordinator = coordinator_with(config, vec![scored("health", SourceKind::Health, 0.9)]).await;

        let mut ids = Vec::new();
        for _ in 0..5 {
            ids.push(coordinator.run_cycle_once().await.unwrap().id);
        }

        let state = coordinator.inner.state.lock().await;
        let kept: Vec<_> = state.decisions().iter().map(|d| d.id).collect();
        assert_eq!(kept, ids[2..].to_vec());
    }
}
