//! Phase schedules
//!
//! A [`Schedule`] is an ordered list of [`PhaseSpec`]s. Each phase has an
//! arrival shape, a concurrency bound, a payload strategy and a start
//! condition. Schedules are validated before any traffic is issued.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use cacheprobe_core::{PayloadStrategy, PhaseRole, ProbeError, Result};

/// One segment of a ramping arrival rate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RampStage {
    pub duration: Duration,
    pub target_rps: f64,
}

impl RampStage {
    pub fn new(duration: Duration, target_rps: f64) -> Self {
        Self {
            duration,
            target_rps,
        }
    }
}

/// How work arrives during a phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ArrivalShape {
    /// Open model: `rps` calls per second regardless of response times
    ConstantRate { rps: f64, duration: Duration },
    /// Open model, rate interpolated linearly through each stage
    RampingRate {
        start_rps: f64,
        stages: Vec<RampStage>,
    },
    /// Closed model: callers share `iterations` calls, bounded by `max_duration`
    FixedIterations {
        iterations: u64,
        max_duration: Duration,
    },
    /// No traffic
    IdleWait { duration: Duration },
}

impl ArrivalShape {
    /// Planned length of the phase (an upper bound for fixed iterations)
    pub fn nominal_duration(&self) -> Duration {
        match self {
            Self::ConstantRate { duration, .. } | Self::IdleWait { duration } => *duration,
            Self::RampingRate { stages, .. } => stages.iter().map(|s| s.duration).sum(),
            Self::FixedIterations { max_duration, .. } => *max_duration,
        }
    }

    /// Arrival rate `elapsed` into the phase; zero for closed and idle shapes
    pub fn rate_at(&self, elapsed: Duration) -> f64 {
        match self {
            Self::ConstantRate { rps, .. } => *rps,
            Self::RampingRate { start_rps, stages } => {
                let mut from = *start_rps;
                let mut stage_start = Duration::ZERO;
                for stage in stages {
                    let stage_end = stage_start + stage.duration;
                    if elapsed < stage_end {
                        let progress = (elapsed - stage_start).as_secs_f64()
                            / stage.duration.as_secs_f64();
                        return from + (stage.target_rps - from) * progress;
                    }
                    from = stage.target_rps;
                    stage_start = stage_end;
                }
                from
            }
            Self::FixedIterations { .. } | Self::IdleWait { .. } => 0.0,
        }
    }

    /// Expected number of arrivals in `[0, elapsed)`: the integral of [`Self::rate_at`]
    pub fn arrivals_by(&self, elapsed: Duration) -> f64 {
        match self {
            Self::ConstantRate { rps, .. } => rps * elapsed.as_secs_f64(),
            Self::RampingRate { start_rps, stages } => {
                let mut total = 0.0;
                let mut from = *start_rps;
                let mut stage_start = Duration::ZERO;
                for stage in stages {
                    let d = stage.duration.as_secs_f64();
                    let stage_end = stage_start + stage.duration;
                    if elapsed < stage_end {
                        let x = (elapsed - stage_start).as_secs_f64();
                        return total + from * x + (stage.target_rps - from) * x * x / (2.0 * d);
                    }
                    total += (from + stage.target_rps) / 2.0 * d;
                    from = stage.target_rps;
                    stage_start = stage_end;
                }
                total + from * (elapsed - stage_start).as_secs_f64()
            }
            Self::FixedIterations { .. } | Self::IdleWait { .. } => 0.0,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::ConstantRate { .. } => "constant-arrival-rate",
            Self::RampingRate { .. } => "ramping-arrival-rate",
            Self::FixedIterations { .. } => "shared-iterations",
            Self::IdleWait { .. } => "idle",
        }
    }

    fn validate(&self, phase: &str) -> Result<()> {
        let bad = |what: &str| Err(invalid(format!("phase '{}': {}", phase, what)));
        match self {
            Self::ConstantRate { rps, duration } => {
                if !positive(*rps) {
                    return bad("rate must be positive");
                }
                if duration.is_zero() {
                    return bad("duration must be positive");
                }
            }
            Self::RampingRate { start_rps, stages } => {
                if stages.is_empty() {
                    return bad("ramping rate needs at least one stage");
                }
                if !non_negative(*start_rps) || stages.iter().any(|s| !non_negative(s.target_rps)) {
                    return bad("rates must not be negative");
                }
                if stages.iter().any(|s| s.duration.is_zero()) {
                    return bad("stage durations must be positive");
                }
            }
            Self::FixedIterations {
                iterations,
                max_duration,
            } => {
                if *iterations == 0 {
                    return bad("iteration count must be positive");
                }
                if max_duration.is_zero() {
                    return bad("max duration must be positive");
                }
            }
            Self::IdleWait { .. } => {}
        }
        Ok(())
    }
}

/// When a phase begins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStart {
    /// Once the preceding phase has completed
    #[default]
    AfterPrevious,
    /// At a fixed offset from run start
    At(Duration),
}

/// One phase of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseSpec {
    pub name: String,
    pub role: PhaseRole,
    pub shape: ArrivalShape,
    /// Maximum concurrent callers
    pub concurrency: usize,
    pub payload: PayloadStrategy,
    /// Pause between consecutive calls of one caller (closed model only)
    pub pacing: Option<Duration>,
    pub start: PhaseStart,
}

impl PhaseSpec {
    pub fn new(name: impl Into<String>, shape: ArrivalShape) -> Self {
        Self {
            name: name.into(),
            role: PhaseRole::Measurement,
            shape,
            concurrency: 1,
            payload: PayloadStrategy::CacheFavoring { modulo: None },
            pacing: None,
            start: PhaseStart::AfterPrevious,
        }
    }

    pub fn constant_rate(name: impl Into<String>, rps: f64, duration: Duration) -> Self {
        Self::new(name, ArrivalShape::ConstantRate { rps, duration })
    }

    pub fn ramping_rate(name: impl Into<String>, start_rps: f64, stages: Vec<RampStage>) -> Self {
        Self::new(name, ArrivalShape::RampingRate { start_rps, stages })
    }

    pub fn fixed_iterations(name: impl Into<String>, iterations: u64, max_duration: Duration) -> Self {
        Self::new(
            name,
            ArrivalShape::FixedIterations {
                iterations,
                max_duration,
            },
        )
    }

    pub fn idle(name: impl Into<String>, duration: Duration) -> Self {
        let mut spec = Self::new(name, ArrivalShape::IdleWait { duration });
        spec.role = PhaseRole::Idle;
        spec
    }

    pub fn role(mut self, role: PhaseRole) -> Self {
        self.role = role;
        self
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn payload(mut self, payload: PayloadStrategy) -> Self {
        self.payload = payload;
        self
    }

    pub fn pacing(mut self, pacing: Duration) -> Self {
        self.pacing = Some(pacing);
        self
    }

    pub fn start_at(mut self, offset: Duration) -> Self {
        self.start = PhaseStart::At(offset);
        self
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.shape, ArrivalShape::IdleWait { .. })
    }
}

/// Ordered phases of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub phases: Vec<PhaseSpec>,
    /// Permit fixed-offset phases whose windows intersect
    pub allow_overlap: bool,
}

impl Schedule {
    pub fn new(phases: Vec<PhaseSpec>) -> Self {
        Self {
            phases,
            allow_overlap: false,
        }
    }

    pub fn allow_overlap(mut self) -> Self {
        self.allow_overlap = true;
        self
    }

    /// Planned `(start, end)` offsets of every phase, assuming each runs its nominal length
    pub fn planned_windows(&self) -> Vec<(Duration, Duration)> {
        let mut windows = Vec::with_capacity(self.phases.len());
        let mut previous_end = Duration::ZERO;
        for phase in &self.phases {
            let start = match phase.start {
                PhaseStart::AfterPrevious => previous_end,
                PhaseStart::At(offset) => offset,
            };
            let end = start + phase.shape.nominal_duration();
            windows.push((start, end));
            previous_end = end;
        }
        windows
    }

    /// Planned length of the whole run
    pub fn nominal_duration(&self) -> Duration {
        self.planned_windows()
            .iter()
            .map(|(_, end)| *end)
            .max()
            .unwrap_or_default()
    }

    pub fn validate(&self) -> Result<()> {
        if self.phases.is_empty() {
            return Err(invalid("schedule has no phases".to_string()));
        }

        let mut names = HashSet::new();
        for phase in &self.phases {
            if phase.name.is_empty() {
                return Err(invalid("phase names must not be empty".to_string()));
            }
            if !names.insert(phase.name.as_str()) {
                return Err(invalid(format!("duplicate phase name '{}'", phase.name)));
            }
            if phase.concurrency == 0 && !phase.is_idle() {
                return Err(invalid(format!(
                    "phase '{}': concurrency must be positive",
                    phase.name
                )));
            }
            phase.shape.validate(&phase.name)?;
        }

        if !self.allow_overlap {
            let windows = self.planned_windows();
            for i in 0..windows.len() {
                for j in (i + 1)..windows.len() {
                    let (a_start, a_end) = windows[i];
                    let (b_start, b_end) = windows[j];
                    if a_start < b_end && b_start < a_end {
                        return Err(invalid(format!(
                            "phases '{}' and '{}' overlap",
                            self.phases[i].name, self.phases[j].name
                        )));
                    }
                }
            }
        }

        Ok(())
    }
}

fn positive(rate: f64) -> bool {
    rate.is_finite() && rate > 0.0
}

fn non_negative(rate: f64) -> bool {
    rate.is_finite() && rate >= 0.0
}

fn invalid(message: String) -> ProbeError {
    ProbeError::InvalidSchedule(message)
}

/// Lifecycle of a phase during a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseState {
    Pending,
    Running,
    Completed,
}

impl PhaseState {
    /// Move to `next`. A phase runs at most once; a pending phase may
    /// complete without running when the run is cancelled.
    pub fn transition(self, next: PhaseState) -> Result<PhaseState> {
        match (self, next) {
            (Self::Pending, Self::Running)
            | (Self::Running, Self::Completed)
            | (Self::Pending, Self::Completed) => Ok(next),
            _ => Err(invalid(format!(
                "illegal phase transition {:?} -> {:?}",
                self, next
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const MIN: Duration = Duration::from_secs(60);

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn test_ramping_interpolation() {
        let shape = ArrivalShape::RampingRate {
            start_rps: 10.0,
            stages: vec![RampStage::new(secs(30), 50.0), RampStage::new(MIN, 300.0)],
        };

        assert_eq!(shape.rate_at(Duration::ZERO), 10.0);
        assert!((shape.rate_at(secs(15)) - 30.0).abs() < 1e-9);
        assert!((shape.rate_at(secs(30)) - 50.0).abs() < 1e-9);
        assert!((shape.rate_at(secs(60)) - 175.0).abs() < 1e-9);
        assert_eq!(shape.rate_at(secs(500)), 300.0);
        assert_eq!(shape.nominal_duration(), secs(90));

        assert!((shape.arrivals_by(secs(30)) - 900.0).abs() < 1e-6);
        assert!((shape.arrivals_by(secs(90)) - 900.0 - 10_500.0).abs() < 1e-6);
        assert!((shape.arrivals_by(secs(100)) - 14_400.0).abs() < 1e-6);

        let constant = ArrivalShape::ConstantRate {
            rps: 10.0,
            duration: MIN,
        };
        assert!((constant.arrivals_by(secs(12)) - 120.0).abs() < 1e-9);
    }

    #[test]
    fn test_sequential_windows() {
        let schedule = Schedule::new(vec![
            PhaseSpec::fixed_iterations("warmup", 200, 2 * MIN).concurrency(5),
            PhaseSpec::constant_rate("pre", 10.0, 2 * MIN).concurrency(10),
            PhaseSpec::idle("wait", 4 * MIN),
            PhaseSpec::constant_rate("post", 10.0, 2 * MIN).concurrency(10),
        ]);

        assert!(schedule.validate().is_ok());
        let windows = schedule.planned_windows();
        assert_eq!(windows[2], (4 * MIN, 8 * MIN));
        assert_eq!(schedule.nominal_duration(), 10 * MIN);
    }

    #[test]
    fn test_overlapping_offsets_rejected() {
        let phases = vec![
            PhaseSpec::constant_rate("a", 10.0, 2 * MIN).concurrency(1),
            PhaseSpec::constant_rate("b", 10.0, 2 * MIN)
                .concurrency(1)
                .start_at(MIN),
        ];

        let err = Schedule::new(phases.clone()).validate().unwrap_err();
        assert!(matches!(err, ProbeError::InvalidSchedule(msg) if msg.contains("overlap")));
        assert!(Schedule::new(phases).allow_overlap().validate().is_ok());
    }

    #[test]
    fn test_adjacent_offsets_accepted() {
        let schedule = Schedule::new(vec![
            PhaseSpec::constant_rate("a", 10.0, 2 * MIN).concurrency(1),
            PhaseSpec::constant_rate("b", 10.0, 2 * MIN)
                .concurrency(1)
                .start_at(2 * MIN),
        ]);
        assert!(schedule.validate().is_ok());
    }

    #[test]
    fn test_invalid_schedules() {
        assert!(Schedule::new(vec![]).validate().is_err());

        let duplicate = Schedule::new(vec![
            PhaseSpec::idle("wait", MIN),
            PhaseSpec::idle("wait", MIN),
        ]);
        assert!(duplicate.validate().is_err());

        let zero_rate = Schedule::new(vec![PhaseSpec::constant_rate("a", 0.0, MIN).concurrency(1)]);
        assert!(zero_rate.validate().is_err());

        let no_callers = Schedule::new(vec![PhaseSpec::constant_rate("a", 5.0, MIN).concurrency(0)]);
        assert!(no_callers.validate().is_err());

        let no_stages = Schedule::new(vec![PhaseSpec::ramping_rate("a", 5.0, vec![]).concurrency(1)]);
        assert!(no_stages.validate().is_err());

        let no_iterations =
            Schedule::new(vec![PhaseSpec::fixed_iterations("a", 0, MIN).concurrency(1)]);
        assert!(no_iterations.validate().is_err());
    }

    #[test]
    fn test_phase_lifecycle() {
        let running = PhaseState::Pending.transition(PhaseState::Running).unwrap();
        let done = running.transition(PhaseState::Completed).unwrap();
        assert_eq!(done, PhaseState::Completed);

        assert!(done.transition(PhaseState::Running).is_err());
        assert!(running.transition(PhaseState::Running).is_err());
        assert!(PhaseState::Pending.transition(PhaseState::Completed).is_ok());
    }

    proptest! {
        #[test]
        fn arrivals_never_decrease(
            start in 0.0f64..200.0,
            targets in prop::collection::vec((1u64..120, 0.0f64..500.0), 1..6),
            a in 0u64..900_000,
            b in 0u64..900_000,
        ) {
            let stages = targets
                .into_iter()
                .map(|(len, rps)| RampStage::new(secs(len), rps))
                .collect();
            let shape = ArrivalShape::RampingRate { start_rps: start, stages };
            let (lo, hi) = (a.min(b), a.max(b));
            prop_assert!(
                shape.arrivals_by(Duration::from_millis(lo))
                    <= shape.arrivals_by(Duration::from_millis(hi)) + 1e-9
            );
        }
    }
}
