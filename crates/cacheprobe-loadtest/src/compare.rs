//! Side-by-side comparison of saved run summaries

use std::fmt::Write;
use std::path::Path;

use anyhow::{Context, Result};

use cacheprobe_core::{PhaseResult, RunSummary};

/// Change of one phase between a baseline and a candidate run
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseDelta {
    pub phase: String,
    pub baseline_hit_rate: f64,
    pub candidate_hit_rate: f64,
    pub baseline_latency_avg: f64,
    pub candidate_latency_avg: f64,
    pub baseline_latency_p95: f64,
    pub candidate_latency_p95: f64,
}

impl PhaseDelta {
    pub fn between(baseline: &PhaseResult, candidate: &PhaseResult) -> Self {
        Self {
            phase: candidate.phase_name.clone(),
            baseline_hit_rate: baseline.hit_rate,
            candidate_hit_rate: candidate.hit_rate,
            baseline_latency_avg: baseline.latency_avg,
            candidate_latency_avg: candidate.latency_avg,
            baseline_latency_p95: baseline.latency_p95,
            candidate_latency_p95: candidate.latency_p95,
        }
    }

    pub fn hit_rate_delta(&self) -> f64 {
        self.candidate_hit_rate - self.baseline_hit_rate
    }

    pub fn latency_avg_delta(&self) -> f64 {
        self.candidate_latency_avg - self.baseline_latency_avg
    }

    pub fn latency_p95_delta(&self) -> f64 {
        self.candidate_latency_p95 - self.baseline_latency_p95
    }
}

/// Comparison of one candidate run against the baseline
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub label: String,
    pub scenario: String,
    /// Phases present in both runs, in candidate order
    pub phases: Vec<PhaseDelta>,
    pub overall: PhaseDelta,
    /// Phases of the candidate with no baseline counterpart
    pub unmatched: Vec<String>,
}

impl Comparison {
    pub fn new(label: impl Into<String>, baseline: &RunSummary, candidate: &RunSummary) -> Self {
        let mut phases = Vec::new();
        let mut unmatched = Vec::new();
        for phase in &candidate.phases {
            match baseline.phase(&phase.phase_name) {
                Some(base) => phases.push(PhaseDelta::between(base, phase)),
                None => unmatched.push(phase.phase_name.clone()),
            }
        }

        Self {
            label: label.into(),
            scenario: candidate.scenario.clone(),
            phases,
            overall: PhaseDelta::between(&baseline.overall, &candidate.overall),
            unmatched,
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = self.write_table(&mut out);
        out
    }

    fn write_table(&self, out: &mut String) -> std::fmt::Result {
        writeln!(out, "\n  {} ({})", self.label, self.scenario)?;
        writeln!(
            out,
            "    {:<20} {:>10} {:>10} {:>10} {:>12} {:>12}",
            "Phase", "Hit Rate", "Δ Hit", "Avg ms", "Δ Avg ms", "Δ p95 ms"
        )?;
        for delta in self.phases.iter().chain(std::iter::once(&self.overall)) {
            writeln!(
                out,
                "    {:<20} {:>9.2}% {:>+9.2}% {:>10.2} {:>+12.2} {:>+12.2}",
                delta.phase,
                delta.candidate_hit_rate * 100.0,
                delta.hit_rate_delta() * 100.0,
                delta.candidate_latency_avg,
                delta.latency_avg_delta(),
                delta.latency_p95_delta()
            )?;
        }
        for phase in &self.unmatched {
            writeln!(out, "    {:<20} (not in baseline)", phase)?;
        }
        Ok(())
    }
}

/// Read a summary written with `--output`
pub fn load_summary(path: &Path) -> Result<RunSummary> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read summary {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid summary JSON in {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cacheprobe_core::{ErrorBreakdown, PhaseRole};

    fn phase(name: &str, hit_rate: f64, latency_avg: f64) -> PhaseResult {
        PhaseResult {
            phase_name: name.into(),
            role: PhaseRole::Measurement,
            request_count: 100,
            hit_count: (hit_rate * 100.0) as u64,
            miss_count: 100 - (hit_rate * 100.0) as u64,
            hit_rate,
            latency_avg,
            latency_p50: latency_avg,
            latency_p95: latency_avg * 2.0,
            latency_p99: latency_avg * 3.0,
            latency_min: 1.0,
            latency_max: latency_avg * 4.0,
            hit_latency_avg: 5.0,
            miss_latency_avg: 120.0,
            evictions_detected: 0,
            allowed: 100,
            denied: 0,
            success_count: 100,
            errors: ErrorBreakdown::default(),
            failed_rate: 0.0,
            dropped_iterations: 0,
            elapsed_secs: 10.0,
            actual_rps: 10.0,
        }
    }

    fn summary(phases: Vec<PhaseResult>, overall: PhaseResult) -> RunSummary {
        RunSummary::new("cache-eviction", serde_json::json!({}), phases, overall, 0.5, false)
    }

    #[test]
    fn test_deltas_by_phase_name() {
        let baseline = summary(
            vec![phase("pre_eviction", 0.6, 40.0), phase("post_eviction", 0.2, 90.0)],
            phase("overall", 0.4, 65.0),
        );
        let candidate = summary(
            vec![
                phase("pre_eviction", 0.9, 10.0),
                phase("post_eviction", 0.1, 100.0),
                phase("extra", 0.5, 50.0),
            ],
            phase("overall", 0.5, 55.0),
        );

        let comparison = Comparison::new("improved_default", &baseline, &candidate);
        assert_eq!(comparison.phases.len(), 2);
        assert_eq!(comparison.unmatched, ["extra"]);

        let pre = &comparison.phases[0];
        assert!((pre.hit_rate_delta() - 0.3).abs() < 1e-9);
        assert!((pre.latency_avg_delta() + 30.0).abs() < 1e-9);
        assert!((pre.latency_p95_delta() + 60.0).abs() < 1e-9);

        let table = comparison.render();
        assert!(table.contains("improved_default (cache-eviction)"));
        assert!(table.contains("+30.00%"));
        assert!(table.contains("(not in baseline)"));
    }

    #[test]
    fn test_load_summary_round_trip() {
        let saved = summary(vec![phase("sustained", 0.8, 20.0)], phase("overall", 0.8, 20.0));
        let path = std::env::temp_dir().join(format!("cacheprobe-summary-{}.json", std::process::id()));
        std::fs::write(&path, saved.to_json_pretty().unwrap()).unwrap();

        let loaded = load_summary(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(loaded.scenario, saved.scenario);
        assert_eq!(loaded.timestamp, saved.timestamp);
        assert_eq!(loaded.phases[0].phase_name, "sustained");
        assert_eq!(loaded.phases[0].hit_count, 80);

        assert!(load_summary(Path::new("/nonexistent/summary.json")).is_err());
    }
}
