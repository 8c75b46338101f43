//! Pass/fail thresholds evaluated on a run's overall aggregate

use std::fmt::{self, Write};

use serde::{Deserialize, Serialize};

use cacheprobe_core::PhaseResult;

/// Quantity a threshold constrains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    FailedRate,
    LatencyP50,
    LatencyP95,
    LatencyP99,
    HitRate,
    ThrottledCount,
}

impl Metric {
    fn value(&self, result: &PhaseResult) -> f64 {
        match self {
            Self::FailedRate => result.failed_rate,
            Self::LatencyP50 => result.latency_p50,
            Self::LatencyP95 => result.latency_p95,
            Self::LatencyP99 => result.latency_p99,
            Self::HitRate => result.hit_rate,
            Self::ThrottledCount => result.errors.throttled as f64,
        }
    }

    fn format(&self, value: f64) -> String {
        match self {
            Self::FailedRate | Self::HitRate => format!("{:.2}%", value * 100.0),
            Self::LatencyP50 | Self::LatencyP95 | Self::LatencyP99 => format!("{:.2}ms", value),
            Self::ThrottledCount => format!("{}", value as u64),
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::FailedRate => "Failed rate",
            Self::LatencyP50 => "Latency p50",
            Self::LatencyP95 => "Latency p95",
            Self::LatencyP99 => "Latency p99",
            Self::HitRate => "Cache hit rate",
            Self::ThrottledCount => "Throttled requests",
        };
        f.write_str(name)
    }
}

/// Strict bound on a metric
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bound {
    Below(f64),
    Above(f64),
}

/// One pass/fail rule
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub metric: Metric,
    pub bound: Bound,
}

impl Threshold {
    pub fn below(metric: Metric, limit: f64) -> Self {
        Self {
            metric,
            bound: Bound::Below(limit),
        }
    }

    pub fn above(metric: Metric, limit: f64) -> Self {
        Self {
            metric,
            bound: Bound::Above(limit),
        }
    }

    pub fn check(&self, result: &PhaseResult) -> ThresholdCheck {
        let actual = self.metric.value(result);
        let (passed, op, limit) = match self.bound {
            Bound::Below(limit) => (actual < limit, '<', limit),
            Bound::Above(limit) => (actual > limit, '>', limit),
        };
        ThresholdCheck {
            name: format!("{} {} {}", self.metric, op, self.metric.format(limit)),
            passed,
            actual: self.metric.format(actual),
            expected: format!("{}{}", op, self.metric.format(limit)),
        }
    }
}

/// Outcome of one threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdCheck {
    pub name: String,
    pub passed: bool,
    pub actual: String,
    pub expected: String,
}

/// Outcome of every threshold of a scenario
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdReport {
    pub passes: bool,
    pub checks: Vec<ThresholdCheck>,
}

impl ThresholdReport {
    pub fn evaluate(thresholds: &[Threshold], overall: &PhaseResult) -> Self {
        let checks: Vec<_> = thresholds.iter().map(|t| t.check(overall)).collect();
        Self {
            passes: checks.iter().all(|c| c.passed),
            checks,
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = self.write_report(&mut out);
        out
    }

    fn write_report(&self, out: &mut String) -> fmt::Result {
        writeln!(out, "\n═══════════════════════════════════════════════════════════════")?;
        writeln!(out, "                    THRESHOLD CHECKS")?;
        writeln!(out, "═══════════════════════════════════════════════════════════════")?;

        for check in &self.checks {
            let status = if check.passed { "✅ PASS" } else { "❌ FAIL" };
            writeln!(out, "\n  {} - {}", check.name, status)?;
            writeln!(out, "    Actual:   {}", check.actual)?;
            writeln!(out, "    Expected: {}", check.expected)?;
        }

        writeln!(out, "\n═══════════════════════════════════════════════════════════════")?;
        if self.passes {
            writeln!(out, "  OVERALL: ✅ ALL CHECKS PASS")?;
        } else {
            writeln!(out, "  OVERALL: ❌ SOME CHECKS FAILED")?;
        }
        writeln!(out, "═══════════════════════════════════════════════════════════════")
    }

    pub fn print_report(&self) {
        println!("{}", self.render());
    }
}
