//! CLI command implementations

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Config;
use crate::coordinator::MasterCoordinator;
use crate::error::Error;
use crate::feedback::{
    HealthFeedback, HealthProbe, HttpHealthProbe, MarketFeedback, PerformanceFeedback,
};

/// Build a coordinator with the three standard feedback sources registered
pub async fn build_coordinator(config: &Config) -> Result<MasterCoordinator> {
    let coordinator = MasterCoordinator::new(config);

    let probe = HttpHealthProbe::new(config.sources.health.clone())
        .context("Failed to build health probe")?;
    let health = Arc::new(HealthFeedback::new(Arc::new(probe), &config.sources.health));
    let performance = Arc::new(PerformanceFeedback::new(config.sources.performance.clone()));
    let market = Arc::new(MarketFeedback::new(config.sources.market.clone()));

    coordinator.register_source(health.clone()).await;
    coordinator.register_source(performance).await;
    coordinator.register_source(market).await;
    coordinator.set_health_recheck(health).await;

    if config.sources.health.api_endpoints.is_empty() && config.sources.health.rpc_endpoints.is_empty() {
        warn!("No health endpoints configured - health feedback will report no data");
    }

    Ok(coordinator)
}

/// Run coordination until Ctrl-C, or a single cycle with `once`
pub async fn run(config: &Config, once: bool) -> Result<()> {
    let coordinator = build_coordinator(config).await?;

    if once {
        let decision = coordinator.run_cycle_once().await?;
        println!("{}", serde_json::to_string_pretty(&decision)?);
        return Ok(());
    }

    let report = coordinator.start_coordination().await?;
    info!(
        sources = ?report.registered_sources,
        "Coordinator running - press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    coordinator.stop_coordination().await?;

    let status = coordinator.get_global_status().await;
    let emergency = coordinator.get_emergency_status().await;
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "status": status,
            "emergency": emergency,
        }))?
    );

    Ok(())
}

/// Show current configuration (endpoints masked)
pub fn show_config(config: &Config) -> Result<()> {
    println!("{}", config.masked_display());
    Ok(())
}

/// List the decision rules in evaluation order
pub fn rules(config: &Config) -> Result<()> {
    let coordinator = MasterCoordinator::new(config);

    println!("\n=== DECISION RULES ===\n");
    println!("{:<24} {:<22} {:>8} {:>11}", "RULE", "ACTION", "PRIORITY", "CONFIDENCE");
    for rule in coordinator.rule_summaries() {
        let marker = if rule.priority >= config.engine.emergency_priority {
            " (emergency)"
        } else {
            ""
        };
        println!(
            "{:<24} {:<22} {:>8} {:>10.0}%{}",
            rule.name,
            rule.action,
            rule.priority,
            rule.confidence * 100.0,
            marker
        );
    }
    println!();

    Ok(())
}

/// Probe the configured health endpoints once
pub async fn probe(config: &Config) -> Result<()> {
    let health = &config.sources.health;
    if health.api_endpoints.is_empty() && health.rpc_endpoints.is_empty() {
        return Err(Error::Probe("no API or RPC endpoints configured".to_string()).into());
    }

    let prober = HttpHealthProbe::new(health.clone())?;
    let report = prober.probe().await?;

    println!("\n=== HEALTH PROBE ===\n");
    println!("API endpoints... {}/{} healthy", report.api_healthy, report.api_total);
    println!("RPC endpoints... {}/{} healthy", report.rpc_healthy, report.rpc_total);
    println!("Average latency: {:.0}ms", report.avg_latency_ms);
    match report.score() {
        Some(score) => println!("Health score: {:.0}%", score * 100.0),
        None => println!("Health score: no data"),
    }
    println!();

    Ok(())
}
