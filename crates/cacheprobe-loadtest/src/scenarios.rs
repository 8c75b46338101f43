//! Scenario presets
//!
//! Each preset turns a [`HarnessConfig`] into a [`Schedule`] and the
//! thresholds its run is judged by.

use std::time::Duration;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use cacheprobe_core::{PayloadStrategy, PhaseRole};

use crate::config::HarnessConfig;
use crate::schedule::{PhaseSpec, RampStage, Schedule};
use crate::thresholds::{Metric, Threshold};

const WARMUP_PACING: Duration = Duration::from_millis(50);
const WARMUP_CALLERS: usize = 10;
const WARMUP_MAX_DURATION: Duration = Duration::from_secs(5 * 60);

const EVICTION_WARMUP_CALLERS: usize = 5;
const EVICTION_WARMUP_MAX_DURATION: Duration = Duration::from_secs(2 * 60);
const EVICTION_RPS: f64 = 10.0;
const EVICTION_CALLERS: usize = 10;

const BURST_START_RPS: f64 = 10.0;

/// Allowed slack of the observed hit rate below the configured mix
const HIT_RATE_TOLERANCE: f64 = 0.8;

pub const WARMUP_PHASE: &str = "warmup";
pub const PRE_EVICTION_PHASE: &str = "pre_eviction";
pub const WAIT_PHASE: &str = "wait_for_eviction";
pub const POST_EVICTION_PHASE: &str = "post_eviction";

/// Built-in scenarios
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScenarioKind {
    /// Populate the cache with a fixed number of distinct entries
    CacheWarmup,
    /// Constant rate with a configured hit/miss mix
    SustainedLoad,
    /// Ramping rate with sharp bursts
    BurstLoad,
    /// Warm, measure, idle past the TTL, measure again
    CacheEviction,
    /// Constant rate of high-cardinality keys
    CacheStress,
}

impl ScenarioKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::CacheWarmup => "cache-warmup",
            Self::SustainedLoad => "sustained-load",
            Self::BurstLoad => "burst-load",
            Self::CacheEviction => "cache-eviction",
            Self::CacheStress => "cache-stress",
        }
    }

    pub fn default_pool_size(&self) -> usize {
        match self {
            Self::CacheEviction => 50,
            _ => 100,
        }
    }

    pub fn schedule(&self, config: &HarnessConfig) -> Schedule {
        let duration = Duration::from_secs(config.duration_secs);
        let rps = config.target_rps as f64;

        let phases = match self {
            Self::CacheWarmup => {
                let payload = if config.diverse_warmup {
                    PayloadStrategy::WarmupDiverse
                } else {
                    PayloadStrategy::CacheFavoring { modulo: None }
                };
                vec![PhaseSpec::fixed_iterations(
                    WARMUP_PHASE,
                    config.cache_entries,
                    WARMUP_MAX_DURATION,
                )
                .role(PhaseRole::WarmUp)
                .concurrency(WARMUP_CALLERS)
                .pacing(WARMUP_PACING)
                .payload(payload)]
            }
            Self::SustainedLoad => vec![PhaseSpec::constant_rate("sustained", rps, duration)
                .concurrency((config.target_rps as usize).saturating_mul(2))
                .payload(PayloadStrategy::Mixed {
                    hit_ratio: config.cache_hit_ratio,
                })],
            Self::BurstLoad => {
                let stage = |secs: u64, target: f64| RampStage::new(Duration::from_secs(secs), target);
                vec![PhaseSpec::ramping_rate(
                    "burst",
                    BURST_START_RPS,
                    vec![
                        stage(30, 50.0),
                        stage(60, 300.0),
                        stage(30, 50.0),
                        stage(60, 100.0),
                        stage(30, 500.0),
                        stage(30, 50.0),
                    ],
                )
                .concurrency(config.max_vus)
                .payload(PayloadStrategy::CacheFavoring { modulo: None })]
            }
            Self::CacheEviction => return eviction_schedule(config),
            Self::CacheStress => vec![PhaseSpec::constant_rate("stress", rps, duration)
                .concurrency(config.max_vus)
                .payload(PayloadStrategy::HighCardinality)],
        };

        Schedule::new(phases)
    }

    pub fn thresholds(&self, config: &HarnessConfig) -> Vec<Threshold> {
        match self {
            Self::SustainedLoad => vec![
                Threshold::below(Metric::FailedRate, 0.01),
                Threshold::below(Metric::LatencyP50, 100.0),
                Threshold::below(Metric::LatencyP95, 500.0),
                Threshold::below(Metric::LatencyP99, 1000.0),
                Threshold::above(Metric::HitRate, config.cache_hit_ratio * HIT_RATE_TOLERANCE),
            ],
            Self::BurstLoad => vec![
                Threshold::below(Metric::FailedRate, 0.05),
                Threshold::below(Metric::LatencyP95, 2000.0),
            ],
            Self::CacheWarmup => vec![
                Threshold::below(Metric::FailedRate, 0.05),
                Threshold::below(Metric::LatencyP95, 5000.0),
            ],
            Self::CacheEviction => vec![Threshold::below(Metric::FailedRate, 0.05)],
            Self::CacheStress => vec![
                Threshold::below(Metric::FailedRate, 0.05),
                Threshold::below(Metric::LatencyP95, 2000.0),
                Threshold::below(Metric::ThrottledCount, 50.0),
            ],
        }
    }
}

/// warmup -> pre_eviction -> wait_for_eviction -> post_eviction
///
/// Both measurement phases replay the warmed keys (`iteration mod
/// warmup_iterations`), so any drop in hit rate after the idle wait is
/// attributable to expiry.
fn eviction_schedule(config: &HarnessConfig) -> Schedule {
    let measure = Duration::from_secs(config.eviction_phase_secs);
    let wait = Duration::from_secs(config.wait_duration_secs);
    let replay = PayloadStrategy::CacheFavoring {
        modulo: Some(config.warmup_iterations),
    };

    let mut warmup = PhaseSpec::fixed_iterations(
        WARMUP_PHASE,
        config.warmup_iterations,
        EVICTION_WARMUP_MAX_DURATION,
    )
    .role(PhaseRole::WarmUp)
    .concurrency(EVICTION_WARMUP_CALLERS)
    .pacing(WARMUP_PACING)
    .payload(PayloadStrategy::CacheFavoring { modulo: None });

    let mut pre = PhaseSpec::constant_rate(PRE_EVICTION_PHASE, EVICTION_RPS, measure)
        .role(PhaseRole::PreEviction)
        .concurrency(EVICTION_CALLERS)
        .payload(replay.clone());

    let mut idle = PhaseSpec::idle(WAIT_PHASE, wait);

    let mut post = PhaseSpec::constant_rate(POST_EVICTION_PHASE, EVICTION_RPS, measure)
        .role(PhaseRole::PostEviction)
        .concurrency(EVICTION_CALLERS)
        .payload(replay);

    if config.fixed_offsets {
        let pre_start = EVICTION_WARMUP_MAX_DURATION;
        let idle_start = pre_start + measure;
        warmup = warmup.start_at(Duration::ZERO);
        pre = pre.start_at(pre_start);
        idle = idle.start_at(idle_start);
        post = post.start_at(idle_start + wait);
    }

    Schedule::new(vec![warmup, pre, idle, post])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::{ArrivalShape, PhaseStart};

    #[test]
    fn test_every_preset_validates() {
        let config = HarnessConfig::default();
        for kind in ScenarioKind::value_variants() {
            assert!(kind.schedule(&config).validate().is_ok(), "{}", kind.name());
            assert!(!kind.thresholds(&config).is_empty());
        }
    }

    #[test]
    fn test_eviction_schedule() {
        let config = HarnessConfig::default();
        let schedule = ScenarioKind::CacheEviction.schedule(&config);

        let names: Vec<_> = schedule.phases.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, [WARMUP_PHASE, PRE_EVICTION_PHASE, WAIT_PHASE, POST_EVICTION_PHASE]);

        let roles: Vec<_> = schedule.phases.iter().map(|p| p.role).collect();
        assert_eq!(
            roles,
            [
                PhaseRole::WarmUp,
                PhaseRole::PreEviction,
                PhaseRole::Idle,
                PhaseRole::PostEviction
            ]
        );
        assert_eq!(
            schedule.phases[1].payload,
            PayloadStrategy::CacheFavoring { modulo: Some(200) }
        );
        assert_eq!(
            schedule.phases[2].shape,
            ArrivalShape::IdleWait {
                duration: Duration::from_secs(240)
            }
        );
        assert!(schedule
            .phases
            .iter()
            .all(|p| p.start == PhaseStart::AfterPrevious));
    }

    #[test]
    fn test_eviction_fixed_offsets() {
        let config = HarnessConfig {
            fixed_offsets: true,
            ..Default::default()
        };
        let schedule = ScenarioKind::CacheEviction.schedule(&config);
        let starts: Vec<_> = schedule.phases.iter().map(|p| p.start).collect();
        assert_eq!(
            starts,
            [
                PhaseStart::At(Duration::ZERO),
                PhaseStart::At(Duration::from_secs(120)),
                PhaseStart::At(Duration::from_secs(240)),
                PhaseStart::At(Duration::from_secs(480)),
            ]
        );
        assert!(schedule.validate().is_ok());
    }

    #[test]
    fn test_burst_profile() {
        let schedule = ScenarioKind::BurstLoad.schedule(&HarnessConfig::default());
        let shape = &schedule.phases[0].shape;
        assert_eq!(shape.nominal_duration(), Duration::from_secs(240));
        assert!((shape.rate_at(Duration::from_secs(90)) - 300.0).abs() < 1e-9);
        assert!((shape.rate_at(Duration::from_secs(210)) - 500.0).abs() < 1e-9);
        assert_eq!(schedule.phases[0].concurrency, 500);
    }

    #[test]
    fn test_sustained_thresholds_follow_ratio() {
        let config = HarnessConfig {
            cache_hit_ratio: 0.5,
            target_rps: 40,
            ..Default::default()
        };
        let schedule = ScenarioKind::SustainedLoad.schedule(&config);
        assert_eq!(schedule.phases[0].concurrency, 80);
        assert_eq!(
            schedule.phases[0].payload,
            PayloadStrategy::Mixed { hit_ratio: 0.5 }
        );

        let floor = ScenarioKind::SustainedLoad
            .thresholds(&config)
            .into_iter()
            .find(|t| t.metric == Metric::HitRate)
            .unwrap();
        assert_eq!(floor, Threshold::above(Metric::HitRate, 0.4));
    }

    #[test]
    fn test_diverse_warmup() {
        let config = HarnessConfig {
            diverse_warmup: true,
            cache_entries: 300,
            ..Default::default()
        };
        let schedule = ScenarioKind::CacheWarmup.schedule(&config);
        assert_eq!(schedule.phases[0].payload, PayloadStrategy::WarmupDiverse);
        assert_eq!(
            schedule.phases[0].shape,
            ArrivalShape::FixedIterations {
                iterations: 300,
                max_duration: Duration::from_secs(300)
            }
        );
    }

    #[test]
    fn test_pool_defaults() {
        assert_eq!(ScenarioKind::CacheEviction.default_pool_size(), 50);
        assert_eq!(ScenarioKind::SustainedLoad.default_pool_size(), 100);
    }
}
