//! # Cacheprobe Load Testing
//!
//! Drives phased traffic against a SubjectAccessReview service and infers
//! how its decision cache behaves: hit rate under load, latency of hits and
//! misses, and whether entries expire after their TTL.
//!
//! ## Usage
//!
//! ```bash
//! # Sustained load with an 80% cache-favoring mix
//! cacheprobe run sustained-load --target https://guard.example:8443 --rps 100 --duration 5m
//!
//! # TTL verification against a 3 minute cache
//! cacheprobe run cache-eviction --cache-profile master --output eviction.json
//!
//! # Compare cache configurations
//! cacheprobe compare master.json improved_default.json
//! ```

pub mod client;
pub mod compare;
pub mod config;
pub mod runner;
pub mod scenarios;
pub mod schedule;
pub mod thresholds;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;

use cacheprobe_core::{
    CacheClassifier, HeaderClassifier, IdentityPool, LatencyThresholdClassifier, RunSummary,
};

pub use client::{AuthzTarget, CallReport, ClientOptions, HttpAuthzClient};
pub use config::{CacheProfile, HarnessArgs, HarnessConfig};
pub use runner::{PhaseScheduler, RunReport};
pub use scenarios::ScenarioKind;
pub use schedule::{ArrivalShape, PhaseSpec, PhaseStart, PhaseState, RampStage, Schedule};
pub use thresholds::{Metric, Threshold, ThresholdReport};

/// Classifier selected by the configuration
pub fn classifier_for(config: &HarnessConfig) -> Arc<dyn CacheClassifier> {
    let latency = LatencyThresholdClassifier::new(config.hit_threshold_ms);
    match &config.cache_header {
        Some(header) => Arc::new(HeaderClassifier::new(header.clone(), latency)),
        None => Arc::new(latency),
    }
}

/// Run a scenario against `target`; `cancel` aborts it early
pub async fn run_scenario(
    kind: ScenarioKind,
    config: &HarnessConfig,
    target: Arc<dyn AuthzTarget>,
    cancel: CancellationToken,
) -> Result<(RunSummary, ThresholdReport)> {
    config.validate().context("Invalid configuration")?;

    let pool = IdentityPool::build(config.user_pool_size)?;
    let schedule = kind.schedule(config);
    schedule.validate().context("Invalid schedule")?;

    info!(
        "Scenario {} against {} with {} identities",
        kind.name(),
        config.target_url,
        pool.len()
    );

    let mut scheduler = PhaseScheduler::new(target, classifier_for(config), pool)
        .with_cancellation(cancel);
    if let Some(limit) = config.max_run_secs {
        scheduler = scheduler.with_max_duration(Duration::from_secs(limit));
    }

    scheduler.probe_health().await;
    let report = scheduler.run(&schedule).await?;

    let thresholds = ThresholdReport::evaluate(&kind.thresholds(config), &report.overall);
    let summary = RunSummary::new(
        kind.name(),
        config.echo(),
        report.phases,
        report.overall,
        config.eviction_ratio,
        report.cancelled,
    );

    Ok((summary, thresholds))
}
