//! Phase-level metrics aggregation
//!
//! Each phase owns a [`PhaseMetrics`] sink of atomic counters and HDR
//! latency histograms, so many concurrent callers can record without lost
//! updates. The [`MetricsAggregator`] is an explicit object handed to the
//! scheduler and queried for [`PhaseResult`]s when phases complete.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hdrhistogram::Histogram;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::classifier::CacheState;
use crate::error::{CallError, ProbeError, Result};
use crate::outcome::{Decision, Outcome};

/// Name of the merged all-phase aggregate
pub const OVERALL_PHASE: &str = "overall";

/// Initial histogram bounds, in microseconds: 1µs to 60s. Histograms grow
/// past the upper bound when a slower call is recorded.
const HISTOGRAM_LOW_US: u64 = 1;
const HISTOGRAM_HIGH_US: u64 = 60_000_000;
const HISTOGRAM_SIGFIG: u8 = 3;

/// Measurement purpose of a phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PhaseRole {
    WarmUp,
    #[default]
    Measurement,
    PreEviction,
    Idle,
    PostEviction,
}

fn new_histogram() -> Result<Histogram<u64>> {
    let mut histogram =
        Histogram::new_with_bounds(HISTOGRAM_LOW_US, HISTOGRAM_HIGH_US, HISTOGRAM_SIGFIG)
            .map_err(|e| ProbeError::Metrics(format!("{:?}", e)))?;
    histogram.auto(true);
    Ok(histogram)
}

fn to_micros(latency_ms: f64) -> u64 {
    (latency_ms.max(0.0) * 1000.0).round() as u64
}

fn to_millis(micros: f64) -> f64 {
    micros / 1000.0
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

// ============================================================================
// PHASE METRICS
// ============================================================================

/// Streaming metrics sink for one phase
#[derive(Debug)]
pub struct PhaseMetrics {
    name: String,
    role: PhaseRole,

    hits: AtomicU64,
    misses: AtomicU64,
    allowed: AtomicU64,
    denied: AtomicU64,
    errors: AtomicU64,
    throttled: AtomicU64,
    timeouts: AtomicU64,
    connection_errors: AtomicU64,
    unparseable: AtomicU64,
    unexpected_status: AtomicU64,
    dropped_iterations: AtomicU64,

    /// Latency of every call (microseconds)
    latency: RwLock<Histogram<u64>>,
    hit_latency: RwLock<Histogram<u64>>,
    miss_latency: RwLock<Histogram<u64>>,
}

impl PhaseMetrics {
    pub fn new(name: impl Into<String>, role: PhaseRole) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            role,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            allowed: AtomicU64::new(0),
            denied: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            throttled: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            connection_errors: AtomicU64::new(0),
            unparseable: AtomicU64::new(0),
            unexpected_status: AtomicU64::new(0),
            dropped_iterations: AtomicU64::new(0),
            latency: RwLock::new(new_histogram()?),
            hit_latency: RwLock::new(new_histogram()?),
            miss_latency: RwLock::new(new_histogram()?),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> PhaseRole {
        self.role
    }

    /// Fold one call outcome into the phase
    pub fn record(&self, outcome: &Outcome) {
        let micros = to_micros(outcome.latency_ms);

        if let Err(e) = self.latency.write().record(micros) {
            warn!("Failed to record latency: {}", e);
        }

        match outcome.cache_state {
            CacheState::Hit => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                if let Err(e) = self.hit_latency.write().record(micros) {
                    warn!("Failed to record hit latency: {}", e);
                }
            }
            CacheState::Miss => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                if let Err(e) = self.miss_latency.write().record(micros) {
                    warn!("Failed to record miss latency: {}", e);
                }
            }
        }

        match outcome.decision {
            Ok(Decision::Allowed) => {
                self.allowed.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Decision::Denied) => {
                self.denied.fetch_add(1, Ordering::Relaxed);
            }
            Err(error) => self.record_error(error),
        }
    }

    fn record_error(&self, error: CallError) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        let counter = match error {
            CallError::NetworkTimeout => &self.timeouts,
            CallError::ConnectionFailure => &self.connection_errors,
            CallError::Throttled => &self.throttled,
            CallError::UnparseableResponse => &self.unparseable,
            CallError::UnexpectedStatus(_) => &self.unexpected_status,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        debug!(phase = %self.name, kind = error.kind(), "call failed");
    }

    /// A scheduled call found no free caller and was skipped
    pub fn record_dropped(&self) {
        self.dropped_iterations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn request_count(&self) -> u64 {
        self.hits.load(Ordering::Relaxed) + self.misses.load(Ordering::Relaxed)
    }

    fn counts(&self) -> Counts {
        Counts {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            allowed: self.allowed.load(Ordering::Relaxed),
            denied: self.denied.load(Ordering::Relaxed),
            errors: ErrorBreakdown {
                total: self.errors.load(Ordering::Relaxed),
                throttled: self.throttled.load(Ordering::Relaxed),
                timeouts: self.timeouts.load(Ordering::Relaxed),
                connection_errors: self.connection_errors.load(Ordering::Relaxed),
                unparseable: self.unparseable.load(Ordering::Relaxed),
                unexpected_status: self.unexpected_status.load(Ordering::Relaxed),
            },
            dropped_iterations: self.dropped_iterations.load(Ordering::Relaxed),
        }
    }

    /// Build the phase result from the current state
    pub fn result(&self, elapsed: Duration) -> PhaseResult {
        let counts = self.counts();
        let evictions = if self.role == PhaseRole::PostEviction {
            counts.misses
        } else {
            0
        };
        PhaseResult::build(
            &self.name,
            self.role,
            counts,
            evictions,
            &self.latency.read(),
            &self.hit_latency.read(),
            &self.miss_latency.read(),
            elapsed,
        )
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Counts {
    hits: u64,
    misses: u64,
    allowed: u64,
    denied: u64,
    errors: ErrorBreakdown,
    dropped_iterations: u64,
}

impl Counts {
    fn merge(&mut self, other: &Counts) {
        self.hits += other.hits;
        self.misses += other.misses;
        self.allowed += other.allowed;
        self.denied += other.denied;
        self.errors.merge(&other.errors);
        self.dropped_iterations += other.dropped_iterations;
    }
}

// ============================================================================
// RESULTS
// ============================================================================

/// Per-class error counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBreakdown {
    pub total: u64,
    pub throttled: u64,
    pub timeouts: u64,
    pub connection_errors: u64,
    pub unparseable: u64,
    pub unexpected_status: u64,
}

impl ErrorBreakdown {
    fn merge(&mut self, other: &ErrorBreakdown) {
        self.total += other.total;
        self.throttled += other.throttled;
        self.timeouts += other.timeouts;
        self.connection_errors += other.connection_errors;
        self.unparseable += other.unparseable;
        self.unexpected_status += other.unexpected_status;
    }
}

/// Statistics of a completed (or snapshotted) phase. Latencies are in ms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseResult {
    pub phase_name: String,
    pub role: PhaseRole,
    pub request_count: u64,
    pub hit_count: u64,
    pub miss_count: u64,
    pub hit_rate: f64,
    pub latency_avg: f64,
    pub latency_p50: f64,
    pub latency_p95: f64,
    pub latency_p99: f64,
    pub latency_min: f64,
    pub latency_max: f64,
    pub hit_latency_avg: f64,
    pub miss_latency_avg: f64,
    pub evictions_detected: u64,
    pub allowed: u64,
    pub denied: u64,
    pub success_count: u64,
    pub errors: ErrorBreakdown,
    pub failed_rate: f64,
    pub dropped_iterations: u64,
    pub elapsed_secs: f64,
    pub actual_rps: f64,
}

impl PhaseResult {
    #[allow(clippy::too_many_arguments)]
    fn build(
        name: &str,
        role: PhaseRole,
        counts: Counts,
        evictions_detected: u64,
        latency: &Histogram<u64>,
        hit_latency: &Histogram<u64>,
        miss_latency: &Histogram<u64>,
        elapsed: Duration,
    ) -> Self {
        let request_count = counts.hits + counts.misses;
        let elapsed_secs = elapsed.as_secs_f64();

        Self {
            phase_name: name.to_string(),
            role,
            request_count,
            hit_count: counts.hits,
            miss_count: counts.misses,
            hit_rate: ratio(counts.hits, request_count),
            latency_avg: to_millis(latency.mean()),
            latency_p50: to_millis(latency.value_at_quantile(0.50) as f64),
            latency_p95: to_millis(latency.value_at_quantile(0.95) as f64),
            latency_p99: to_millis(latency.value_at_quantile(0.99) as f64),
            latency_min: to_millis(latency.min() as f64),
            latency_max: to_millis(latency.max() as f64),
            hit_latency_avg: to_millis(hit_latency.mean()),
            miss_latency_avg: to_millis(miss_latency.mean()),
            evictions_detected,
            allowed: counts.allowed,
            denied: counts.denied,
            success_count: counts.allowed + counts.denied,
            errors: counts.errors,
            failed_rate: ratio(counts.errors.total, request_count),
            dropped_iterations: counts.dropped_iterations,
            elapsed_secs,
            actual_rps: if elapsed_secs > 0.0 {
                request_count as f64 / elapsed_secs
            } else {
                0.0
            },
        }
    }
}

// ============================================================================
// AGGREGATOR
// ============================================================================

/// Registry of per-phase sinks for one run
#[derive(Debug, Default)]
pub struct MetricsAggregator {
    phases: RwLock<Vec<Arc<PhaseMetrics>>>,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a phase, or return the sink already registered under `name`
    pub fn register(&self, name: &str, role: PhaseRole) -> Result<Arc<PhaseMetrics>> {
        if let Some(existing) = self.phase(name) {
            return Ok(existing);
        }
        let mut phases = self.phases.write();
        if let Some(existing) = phases.iter().find(|p| p.name == name) {
            return Ok(existing.clone());
        }
        let metrics = Arc::new(PhaseMetrics::new(name, role)?);
        phases.push(metrics.clone());
        Ok(metrics)
    }

    pub fn phase(&self, name: &str) -> Option<Arc<PhaseMetrics>> {
        self.phases.read().iter().find(|p| p.name == name).cloned()
    }

    /// Record an outcome against a registered phase; false if unknown
    pub fn record(&self, phase: &str, outcome: &Outcome) -> bool {
        match self.phase(phase) {
            Some(metrics) => {
                metrics.record(outcome);
                true
            }
            None => {
                warn!("Outcome for unregistered phase {}", phase);
                false
            }
        }
    }

    /// Result of `phase` as of now
    pub fn phase_result(&self, phase: &str, elapsed: Duration) -> Option<PhaseResult> {
        self.phase(phase).map(|m| m.result(elapsed))
    }

    /// Merge every phase into a single aggregate named [`OVERALL_PHASE`]
    pub fn overall(&self, elapsed: Duration) -> Result<PhaseResult> {
        let mut counts = Counts::default();
        let mut evictions = 0;
        let mut latency = new_histogram()?;
        let mut hit_latency = new_histogram()?;
        let mut miss_latency = new_histogram()?;

        for phase in self.phases.read().iter() {
            let phase_counts = phase.counts();
            if phase.role == PhaseRole::PostEviction {
                evictions += phase_counts.misses;
            }
            counts.merge(&phase_counts);

            for (target, source) in [
                (&mut latency, &phase.latency),
                (&mut hit_latency, &phase.hit_latency),
                (&mut miss_latency, &phase.miss_latency),
            ] {
                if let Err(e) = target.add(&*source.read()) {
                    warn!("Failed to merge latency histogram of {}: {:?}", phase.name, e);
                }
            }
        }

        Ok(PhaseResult::build(
            OVERALL_PHASE,
            PhaseRole::Measurement,
            counts,
            evictions,
            &latency,
            &hit_latency,
            &miss_latency,
            elapsed,
        ))
    }

    pub fn phase_names(&self) -> Vec<String> {
        self.phases.read().iter().map(|p| p.name.clone()).collect()
    }
}
