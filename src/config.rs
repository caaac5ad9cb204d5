//! Configuration loading and validation

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

// Re-export component configs
pub use crate::decision::rules::RuleThresholds;
pub use crate::emergency::{EmergencyConfig, MAX_WINDOW_SECS};
pub use crate::feedback::health::HealthSourceConfig;
pub use crate::feedback::market::MarketSourceConfig;
pub use crate::feedback::performance::PerformanceSourceConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub emergency: EmergencyConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
}

/// Coordination cycle timing and history bounds
#[derive(Debug, Clone, Deserialize)]
pub struct CoordinatorConfig {
    /// Seconds between coordination cycles
    #[serde(default = "default_cycle_interval_secs")]
    pub cycle_interval_secs: u64,

    /// Seconds to wait before retrying a failed cycle
    #[serde(default = "default_retry_backoff_secs")]
    pub retry_backoff_secs: u64,

    /// Upper bound on a single `get_feedback` call
    #[serde(default = "default_source_timeout_ms")]
    pub source_timeout_ms: u64,

    /// Upper bound on a single `apply_decision` call
    #[serde(default = "default_apply_timeout_ms")]
    pub apply_timeout_ms: u64,

    /// Upper bound on a whole cycle
    #[serde(default = "default_cycle_timeout_secs")]
    pub cycle_timeout_secs: u64,

    #[serde(default = "default_decision_history")]
    pub decision_history: usize,

    #[serde(default = "default_error_history")]
    pub error_history: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            cycle_interval_secs: default_cycle_interval_secs(),
            retry_backoff_secs: default_retry_backoff_secs(),
            source_timeout_ms: default_source_timeout_ms(),
            apply_timeout_ms: default_apply_timeout_ms(),
            cycle_timeout_secs: default_cycle_timeout_secs(),
            decision_history: default_decision_history(),
            error_history: default_error_history(),
        }
    }
}

impl CoordinatorConfig {
    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.cycle_interval_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_secs)
    }

    pub fn source_timeout(&self) -> Duration {
        Duration::from_millis(self.source_timeout_ms)
    }

    pub fn apply_timeout(&self) -> Duration {
        Duration::from_millis(self.apply_timeout_ms)
    }

    pub fn cycle_timeout(&self) -> Duration {
        Duration::from_secs(self.cycle_timeout_secs)
    }
}

/// Decision engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Rules at or above this priority escalate urgency and set the override flag
    #[serde(default = "default_emergency_priority")]
    pub emergency_priority: u8,

    /// Priority gap below which a conflict is logged as HIGH severity
    #[serde(default = "default_severity_gap")]
    pub severity_gap: u8,

    #[serde(default)]
    pub thresholds: RuleThresholds,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            emergency_priority: default_emergency_priority(),
            severity_gap: default_severity_gap(),
            thresholds: RuleThresholds::default(),
        }
    }
}

/// Per-source adapter configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourcesConfig {
    #[serde(default)]
    pub health: HealthSourceConfig,
    #[serde(default)]
    pub performance: PerformanceSourceConfig,
    #[serde(default)]
    pub market: MarketSourceConfig,
}

// Default value functions
fn default_cycle_interval_secs() -> u64 {
    30
}

fn default_retry_backoff_secs() -> u64 {
    60
}

fn default_source_timeout_ms() -> u64 {
    5000
}

fn default_apply_timeout_ms() -> u64 {
    2000
}

fn default_cycle_timeout_secs() -> u64 {
    20
}

fn default_decision_history() -> usize {
    50
}

fn default_error_history() -> usize {
    100
}

fn default_emergency_priority() -> u8 {
    9
}

fn default_severity_gap() -> u8 {
    3
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            // Start with defaults
            .set_default(
                "coordinator.cycle_interval_secs",
                default_cycle_interval_secs() as i64,
            )?
            .set_default(
                "coordinator.source_timeout_ms",
                default_source_timeout_ms() as i64,
            )?
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (prefix COORD_)
            .add_source(
                config::Environment::with_prefix("COORD")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let c = &self.coordinator;
        if c.cycle_interval_secs == 0 || c.retry_backoff_secs == 0 {
            anyhow::bail!("coordinator intervals must be positive");
        }
        if c.source_timeout_ms == 0 || c.apply_timeout_ms == 0 || c.cycle_timeout_secs == 0 {
            anyhow::bail!("coordinator timeouts must be positive");
        }
        if c.decision_history == 0 || c.error_history == 0 {
            anyhow::bail!("history capacities must be positive");
        }

        if !(1..=10).contains(&self.engine.emergency_priority) {
            anyhow::bail!(
                "engine.emergency_priority must be within 1..=10, got {}",
                self.engine.emergency_priority
            );
        }
        self.engine.thresholds.validate()?;

        let e = &self.emergency;
        if e.check_interval_secs == 0 || e.recovery_delay_secs == 0 {
            anyhow::bail!("emergency intervals must be positive");
        }
        for (name, value) in [
            ("emergency.critical_health", e.critical_health),
            ("emergency.health_emergency", e.health_emergency),
            ("emergency.performance_emergency", e.performance_emergency),
        ] {
            if !(0.0..=1.0).contains(&value) {
                anyhow::bail!("{} must be within [0, 1], got {}", name, value);
            }
        }
        if e.failure_count == 0 {
            anyhow::bail!("emergency.failure_count must be positive");
        }
        for (name, value) in [
            ("emergency.stale_decision_secs", e.stale_decision_secs),
            ("emergency.retention_secs", e.retention_secs),
        ] {
            if value > MAX_WINDOW_SECS {
                anyhow::bail!("{} must be at most {}s, got {}", name, MAX_WINDOW_SECS, value);
            }
        }

        if self.sources.performance.trade_window == 0 {
            anyhow::bail!("sources.performance.trade_window must be positive");
        }
        if self.sources.market.sample_capacity < 10 {
            anyhow::bail!("sources.market.sample_capacity must hold at least 10 samples");
        }

        if self.coordinator.cycle_interval_secs <= self.emergency.check_interval_secs {
            tracing::warn!(
                "Emergency check interval is not faster than the coordination cycle"
            );
        }

        Ok(())
    }

    /// Get masked configuration for display (hide endpoint credentials)
    pub fn masked_display(&self) -> String {
        let health = &self.sources.health;
        let masked = |urls: &[String]| -> Vec<String> { urls.iter().map(|u| mask_url(u)).collect() };
        format!(
            r#"Configuration:
  Coordinator:
    cycle_interval: {}s
    retry_backoff: {}s
    source_timeout: {}ms
    apply_timeout: {}ms
    cycle_timeout: {}s
    decision_history: {}
  Engine:
    emergency_priority: {}
    severity_gap: {}
  Emergency:
    check_interval: {}s
    critical_health: {}
    stale_decision: {}s
    recovery_delay: {}s
  Sources:
    health.api_endpoints: {:?}
    health.rpc_endpoints: {:?}
    performance.trade_window: {}
    market.sample_capacity: {}
"#,
            self.coordinator.cycle_interval_secs,
            self.coordinator.retry_backoff_secs,
            self.coordinator.source_timeout_ms,
            self.coordinator.apply_timeout_ms,
            self.coordinator.cycle_timeout_secs,
            self.coordinator.decision_history,
            self.engine.emergency_priority,
            self.engine.severity_gap,
            self.emergency.check_interval_secs,
            self.emergency.critical_health,
            self.emergency.stale_decision_secs,
            self.emergency.recovery_delay_secs,
            masked(&health.api_endpoints),
            masked(&health.rpc_endpoints),
            self.sources.performance.trade_window,
            self.sources.market.sample_capacity,
        )
    }
}

/// Mask URL for display (hide API keys in query params)
fn mask_url(url: &str) -> String {
    if let Some(idx) = url.find('?') {
        format!("{}?***", &url[..idx])
    } else {
        url.to_string()
    }
}
