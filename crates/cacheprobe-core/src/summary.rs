//! Run summaries and the plain-text digest

use std::fmt::Write;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::aggregator::{PhaseResult, PhaseRole};

/// Post-eviction hit rate must fall below this fraction of the
/// pre-eviction hit rate for the TTL to count as effective
pub const DEFAULT_EVICTION_RATIO: f64 = 0.5;

const RULE: &str = "═══════════════════════════════════════════════════════════════";

/// Comparison of the pre- and post-eviction measurement phases
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedAnalysis {
    pub pre_hit_rate: f64,
    pub post_hit_rate: f64,
    pub hit_rate_change: f64,
    pub latency_increase_ms: f64,
    pub eviction_ratio: f64,
    pub ttl_effective: bool,
}

impl DerivedAnalysis {
    /// Heuristic verdict: effective when `post < eviction_ratio * pre`
    pub fn compare(pre: &PhaseResult, post: &PhaseResult, eviction_ratio: f64) -> Self {
        Self {
            pre_hit_rate: pre.hit_rate,
            post_hit_rate: post.hit_rate,
            hit_rate_change: post.hit_rate - pre.hit_rate,
            latency_increase_ms: post.latency_avg - pre.latency_avg,
            eviction_ratio,
            ttl_effective: post.hit_rate < pre.hit_rate * eviction_ratio,
        }
    }

    /// Analysis over the first pre-eviction and post-eviction phases, if both exist
    pub fn from_phases(phases: &[PhaseResult], eviction_ratio: f64) -> Option<Self> {
        let pre = phases.iter().find(|p| p.role == PhaseRole::PreEviction)?;
        let post = phases.iter().find(|p| p.role == PhaseRole::PostEviction)?;
        Some(Self::compare(pre, post, eviction_ratio))
    }
}

/// Structured result of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub scenario: String,
    pub timestamp: DateTime<Utc>,
    /// Echo of the inputs the run was configured with
    pub config: serde_json::Value,
    pub phases: Vec<PhaseResult>,
    pub overall: PhaseResult,
    pub analysis: Option<DerivedAnalysis>,
    /// The run was aborted before every phase exhausted its budget
    pub cancelled: bool,
}

impl RunSummary {
    pub fn new(
        scenario: impl Into<String>,
        config: serde_json::Value,
        phases: Vec<PhaseResult>,
        overall: PhaseResult,
        eviction_ratio: f64,
        cancelled: bool,
    ) -> Self {
        let analysis = DerivedAnalysis::from_phases(&phases, eviction_ratio);
        Self {
            scenario: scenario.into(),
            timestamp: Utc::now(),
            config,
            phases,
            overall,
            analysis,
            cancelled,
        }
    }

    pub fn phase(&self, name: &str) -> Option<&PhaseResult> {
        self.phases.iter().find(|p| p.phase_name == name)
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Human-readable digest of the run
    pub fn digest(&self) -> String {
        let mut out = String::new();
        // Writing into a String cannot fail
        let _ = self.write_digest(&mut out);
        out
    }

    fn write_digest(&self, out: &mut String) -> std::fmt::Result {
        writeln!(out, "\n{}", RULE)?;
        writeln!(out, "  CACHE PROBE SUMMARY: {}", self.scenario)?;
        writeln!(out, "{}", RULE)?;
        writeln!(out, "  Timestamp: {}", self.timestamp.to_rfc3339())?;
        if let Some(url) = self.config.get("target_url").and_then(|v| v.as_str()) {
            writeln!(out, "  Target:    {}", url)?;
        }
        if self.cancelled {
            writeln!(out, "  Status:    CANCELLED (partial results)")?;
        }

        for phase in &self.phases {
            write_phase(out, phase)?;
        }

        writeln!(out, "\n  Overall")?;
        write_phase_body(out, &self.overall)?;

        if let Some(analysis) = &self.analysis {
            writeln!(out, "\n  Analysis")?;
            writeln!(out, "    Hit Rate Change:   {:>9.2}%", analysis.hit_rate_change * 100.0)?;
            writeln!(out, "    Latency Increase:  {:>9.2}ms", analysis.latency_increase_ms)?;
            writeln!(
                out,
                "    TTL Effective:     {:>9}",
                if analysis.ttl_effective { "YES" } else { "NO" }
            )?;
        }

        writeln!(out, "{}", RULE)
    }
}

fn write_phase(out: &mut String, phase: &PhaseResult) -> std::fmt::Result {
    writeln!(out, "\n  Phase: {} ({:?})", phase.phase_name, phase.role)?;
    if phase.role == PhaseRole::Idle {
        return writeln!(out, "    Idle for {:.0}s", phase.elapsed_secs);
    }
    write_phase_body(out, phase)
}

fn write_phase_body(out: &mut String, phase: &PhaseResult) -> std::fmt::Result {
    writeln!(out, "    Requests:     {:>10}   ({:.2} RPS)", phase.request_count, phase.actual_rps)?;
    writeln!(out, "    Cache Hits:   {:>10}", phase.hit_count)?;
    writeln!(out, "    Cache Miss:   {:>10}", phase.miss_count)?;
    writeln!(out, "    Hit Rate:     {:>9.2}%", phase.hit_rate * 100.0)?;
    writeln!(
        out,
        "    Latency:      avg {:.2}ms  p50 {:.2}ms  p95 {:.2}ms  p99 {:.2}ms",
        phase.latency_avg, phase.latency_p50, phase.latency_p95, phase.latency_p99
    )?;
    writeln!(
        out,
        "    Hit/Miss Avg: {:.2}ms / {:.2}ms",
        phase.hit_latency_avg, phase.miss_latency_avg
    )?;
    writeln!(
        out,
        "    Decisions:    {} allowed, {} denied",
        phase.allowed, phase.denied
    )?;
    if phase.errors.total > 0 {
        writeln!(
            out,
            "    Errors:       {} ({} throttled, {} timeouts, {} connection, {} unparseable, {} status)",
            phase.errors.total,
            phase.errors.throttled,
            phase.errors.timeouts,
            phase.errors.connection_errors,
            phase.errors.unparseable,
            phase.errors.unexpected_status
        )?;
    }
    if phase.dropped_iterations > 0 {
        writeln!(out, "    Dropped:      {:>10}", phase.dropped_iterations)?;
    }
    if phase.role == PhaseRole::PostEviction {
        writeln!(out, "    Evictions:    {:>10}", phase.evictions_detected)?;
    }
    Ok(())
}
