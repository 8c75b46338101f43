//! Phase scheduler
//!
//! Runs a [`Schedule`] against an [`AuthzTarget`]. Every phase is its own
//! task: it waits for its start condition, drives its arrival shape and
//! records each call into its [`PhaseMetrics`]. Cancellation (run timeout or
//! Ctrl-C) stops new arrivals; calls already in flight are allowed to finish
//! and partial results are still reported.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{oneshot, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use cacheprobe_core::{
    CacheClassifier, IdentityPool, MetricsAggregator, Outcome, PayloadStrategy, PhaseMetrics,
    PhaseResult, ResponseObservation, Result,
};

use crate::client::AuthzTarget;
use crate::schedule::{ArrivalShape, PhaseSpec, PhaseStart, PhaseState, Schedule};

/// Long phases report progress this often
const PROGRESS_LOG_INTERVAL: Duration = Duration::from_secs(30);
const IDLE_TICK: Duration = Duration::from_secs(1);

/// Bounds on the dispatcher's sleep between arrival checks
const MIN_ARRIVAL_WAIT: Duration = Duration::from_millis(1);
const MAX_ARRIVAL_WAIT: Duration = Duration::from_millis(100);

/// Absorbs float error in the integrated arrival count
const ARRIVAL_EPSILON: f64 = 1e-6;

// ============================================================================
// CALLER POOL
// ============================================================================

/// Bounded set of caller ids for open-model phases
#[derive(Debug, Clone)]
struct VuPool {
    semaphore: Arc<Semaphore>,
    free: Arc<Mutex<Vec<u64>>>,
}

/// A checked-out caller id, returned to the pool on drop
#[derive(Debug)]
struct VuLease {
    id: u64,
    free: Arc<Mutex<Vec<u64>>>,
    _permit: OwnedSemaphorePermit,
}

impl VuPool {
    fn new(size: usize) -> Self {
        let ids = (1..=size as u64).rev().collect();
        Self {
            semaphore: Arc::new(Semaphore::new(size)),
            free: Arc::new(Mutex::new(ids)),
        }
    }

    /// A free caller, or `None` when all are busy
    fn try_checkout(&self) -> Option<VuLease> {
        let permit = self.semaphore.clone().try_acquire_owned().ok()?;
        let id = self.free.lock().pop()?;
        Some(VuLease {
            id,
            free: self.free.clone(),
            _permit: permit,
        })
    }
}

impl VuLease {
    fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for VuLease {
    fn drop(&mut self) {
        self.free.lock().push(self.id);
    }
}

// ============================================================================
// PHASE EXECUTION
// ============================================================================

/// Everything one phase task needs
#[derive(Clone)]
struct PhaseContext {
    target: Arc<dyn AuthzTarget>,
    classifier: Arc<dyn CacheClassifier>,
    pool: IdentityPool,
    metrics: Arc<PhaseMetrics>,
    payload: PayloadStrategy,
    cancel: CancellationToken,
}

impl PhaseContext {
    /// One authorization check: generate, submit, classify, record
    async fn call(&self, vu_id: u64, iteration: u64) {
        let request = self.payload.generate(&self.pool, vu_id, iteration);

        let started = Instant::now();
        let report = self.target.check(&request).await;
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

        let observation = ResponseObservation {
            latency_ms,
            status: report.status,
            cache_header: report.cache_header,
        };
        let cache_state = self.classifier.classify(&observation);

        self.metrics.record(&Outcome {
            latency_ms,
            http_status: report.status,
            decision: report.decision,
            cache_state,
        });
    }

    /// Sleep for `duration`; false if cancelled first
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = sleep(duration) => true,
            _ = self.cancel.cancelled() => false,
        }
    }
}

fn log_join_error(phase: &str, joined: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        error!("Call task in phase {} failed: {}", phase, e);
    }
}

/// Open model: dispatch at the shape's rate whether or not calls have returned.
/// Arrival `i` is due once the integrated rate reaches `i`.
async fn run_arrival_rate(ctx: &PhaseContext, spec: &PhaseSpec) {
    let total = spec.shape.nominal_duration();
    let vus = VuPool::new(spec.concurrency);
    let mut tasks = JoinSet::new();

    // A phase starting at a positive rate issues its first call at t=0
    let lead = u64::from(spec.shape.rate_at(Duration::ZERO) > 0.0);

    let start = Instant::now();
    let mut issued = 0u64;
    let mut next_log = PROGRESS_LOG_INTERVAL;

    loop {
        let elapsed = start.elapsed();
        if elapsed >= total || ctx.cancel.is_cancelled() {
            break;
        }
        if elapsed >= next_log {
            let snapshot = ctx.metrics.result(elapsed);
            info!(
                "Phase {}: {}s, {} requests, {:.1} RPS, hit rate {:.2}%, {} dropped",
                spec.name,
                elapsed.as_secs(),
                snapshot.request_count,
                snapshot.actual_rps,
                snapshot.hit_rate * 100.0,
                snapshot.dropped_iterations
            );
            next_log += PROGRESS_LOG_INTERVAL;
        }

        let arrived = spec.shape.arrivals_by(elapsed);
        let due = (arrived + ARRIVAL_EPSILON).floor() as u64 + lead;
        while issued < due {
            match vus.try_checkout() {
                Some(lease) => {
                    let ctx = ctx.clone();
                    let iteration = issued;
                    tasks.spawn(async move {
                        ctx.call(lease.id(), iteration).await;
                        drop(lease);
                    });
                }
                None => {
                    debug!("No free caller in phase {}, dropping iteration {}", spec.name, issued);
                    ctx.metrics.record_dropped();
                }
            }
            issued += 1;
        }

        // Reap finished calls
        while let Some(joined) = tasks.join_next().now_or_never().flatten() {
            log_join_error(&spec.name, joined);
        }

        let rate = spec.shape.rate_at(elapsed);
        let wait = if rate > 0.0 {
            Duration::from_secs_f64((((issued + 1 - lead) as f64 - arrived) / rate).max(0.0))
                .clamp(MIN_ARRIVAL_WAIT, MAX_ARRIVAL_WAIT)
        } else {
            MAX_ARRIVAL_WAIT
        };
        if !ctx.pause(wait).await {
            break;
        }
    }

    while let Some(joined) = tasks.join_next().await {
        log_join_error(&spec.name, joined);
    }
}

/// Closed model: `concurrency` callers share a fixed iteration budget
async fn run_fixed_iterations(
    ctx: &PhaseContext,
    spec: &PhaseSpec,
    iterations: u64,
    max_duration: Duration,
) {
    let deadline = Instant::now() + max_duration;
    let next = Arc::new(AtomicU64::new(0));
    let mut workers = JoinSet::new();

    for vu_id in 1..=spec.concurrency as u64 {
        let ctx = ctx.clone();
        let next = next.clone();
        let pacing = spec.pacing;
        workers.spawn(async move {
            loop {
                if ctx.cancel.is_cancelled() || Instant::now() >= deadline {
                    break;
                }
                let iteration = next.fetch_add(1, Ordering::Relaxed);
                if iteration >= iterations {
                    break;
                }
                ctx.call(vu_id, iteration).await;
                if let Some(pause) = pacing {
                    if !ctx.pause(pause).await {
                        break;
                    }
                }
            }
        });
    }

    while let Some(joined) = workers.join_next().await {
        log_join_error(&spec.name, joined);
    }

    let issued = next.load(Ordering::Relaxed).min(iterations);
    if issued < iterations {
        warn!(
            "Phase {} stopped after {} of {} iterations",
            spec.name, issued, iterations
        );
    }
}

/// No traffic; logs progress so long waits are visibly alive
async fn run_idle(ctx: &PhaseContext, spec: &PhaseSpec, duration: Duration) {
    info!("Waiting {}s in phase {}", duration.as_secs(), spec.name);
    let start = Instant::now();
    let mut next_log = PROGRESS_LOG_INTERVAL;

    loop {
        let elapsed = start.elapsed();
        if elapsed >= duration {
            break;
        }
        if !ctx.pause((duration - elapsed).min(IDLE_TICK)).await {
            break;
        }
        if start.elapsed() >= next_log {
            info!(
                "Phase {}: {}s of {}s elapsed",
                spec.name,
                next_log.as_secs(),
                duration.as_secs()
            );
            next_log += PROGRESS_LOG_INTERVAL;
        }
    }
}

async fn execute_phase(ctx: &PhaseContext, spec: &PhaseSpec) {
    match &spec.shape {
        ArrivalShape::ConstantRate { .. } | ArrivalShape::RampingRate { .. } => {
            run_arrival_rate(ctx, spec).await
        }
        ArrivalShape::FixedIterations {
            iterations,
            max_duration,
        } => run_fixed_iterations(ctx, spec, *iterations, *max_duration).await,
        ArrivalShape::IdleWait { duration } => run_idle(ctx, spec, *duration).await,
    }
}

// ============================================================================
// SCHEDULER
// ============================================================================

/// Results of a scheduler run, phases in declared order
#[derive(Debug, Clone)]
pub struct RunReport {
    pub phases: Vec<PhaseResult>,
    pub overall: PhaseResult,
    pub cancelled: bool,
    pub elapsed: Duration,
    /// Sinks this run recorded into
    pub aggregator: Arc<MetricsAggregator>,
}

type StateTable = Arc<RwLock<Vec<(String, PhaseState)>>>;

fn set_state(states: &StateTable, phase: &str, next: PhaseState) -> Result<()> {
    let mut states = states.write();
    if let Some((_, state)) = states.iter_mut().find(|(name, _)| name == phase) {
        *state = state.transition(next)?;
    }
    Ok(())
}

/// Drives a schedule's phases against a target
pub struct PhaseScheduler {
    target: Arc<dyn AuthzTarget>,
    classifier: Arc<dyn CacheClassifier>,
    pool: IdentityPool,
    cancel: CancellationToken,
    max_duration: Option<Duration>,
    states: StateTable,
}

impl PhaseScheduler {
    pub fn new(
        target: Arc<dyn AuthzTarget>,
        classifier: Arc<dyn CacheClassifier>,
        pool: IdentityPool,
    ) -> Self {
        Self {
            target,
            classifier,
            pool,
            cancel: CancellationToken::new(),
            max_duration: None,
            states: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Cancel the run once it has lasted `limit`
    pub fn with_max_duration(mut self, limit: Duration) -> Self {
        self.max_duration = Some(limit);
        self
    }

    /// Use an externally owned cancellation token (e.g. wired to Ctrl-C)
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn phase_state(&self, phase: &str) -> Option<PhaseState> {
        self.states
            .read()
            .iter()
            .find(|(name, _)| name == phase)
            .map(|(_, state)| *state)
    }

    /// Probe target health. A failed probe is logged and otherwise ignored.
    pub async fn probe_health(&self) {
        match self.target.health().await {
            Ok(200) => info!("Target health check passed"),
            Ok(status) => warn!("Target health check returned HTTP {}", status),
            Err(e) => warn!("Target health check failed: {}", e),
        }
    }

    /// Run every phase of `schedule`, recording into a fresh aggregator
    pub async fn run(&self, schedule: &Schedule) -> Result<RunReport> {
        schedule.validate()?;

        let aggregator = Arc::new(MetricsAggregator::new());

        let mut contexts = Vec::with_capacity(schedule.phases.len());
        {
            let mut states = self.states.write();
            states.clear();
            for spec in &schedule.phases {
                let metrics = aggregator.register(&spec.name, spec.role)?;
                states.push((spec.name.clone(), PhaseState::Pending));
                contexts.push(PhaseContext {
                    target: self.target.clone(),
                    classifier: self.classifier.clone(),
                    pool: self.pool.clone(),
                    metrics,
                    payload: spec.payload.clone(),
                    cancel: self.cancel.clone(),
                });
            }
        }

        info!(
            "Running {} phases, planned length {}s",
            schedule.phases.len(),
            schedule.nominal_duration().as_secs()
        );

        let run_start = Instant::now();
        let watchdog = self.max_duration.map(|limit| {
            let cancel = self.cancel.clone();
            tokio::spawn(async move {
                sleep(limit).await;
                warn!("Run exceeded {}s, cancelling", limit.as_secs());
                cancel.cancel();
            })
        });

        let mut handles = Vec::with_capacity(schedule.phases.len());
        let mut previous_done: Option<oneshot::Receiver<()>> = None;

        for (spec, ctx) in schedule.phases.iter().cloned().zip(contexts) {
            let (done_tx, done_rx) = oneshot::channel();
            let after = previous_done.replace(done_rx);
            let states = self.states.clone();

            handles.push(tokio::spawn(async move {
                match spec.start {
                    PhaseStart::AfterPrevious => {
                        if let Some(after) = after {
                            tokio::select! {
                                _ = after => {}
                                _ = ctx.cancel.cancelled() => {}
                            }
                        }
                    }
                    PhaseStart::At(offset) => {
                        tokio::select! {
                            _ = sleep_until(run_start + offset) => {}
                            _ = ctx.cancel.cancelled() => {}
                        }
                    }
                }

                let phase_start = Instant::now();
                if !ctx.cancel.is_cancelled() {
                    set_state(&states, &spec.name, PhaseState::Running)?;
                    info!(
                        "Phase {} started: {} with {} callers, {} payloads",
                        spec.name,
                        spec.shape.label(),
                        spec.concurrency,
                        spec.payload.label()
                    );
                    execute_phase(&ctx, &spec).await;
                }
                set_state(&states, &spec.name, PhaseState::Completed)?;

                let result = ctx.metrics.result(phase_start.elapsed());
                info!(
                    "Phase {} completed: {} requests, hit rate {:.2}%",
                    spec.name,
                    result.request_count,
                    result.hit_rate * 100.0
                );
                let _ = done_tx.send(());
                Ok::<PhaseResult, cacheprobe_core::ProbeError>(result)
            }));
        }

        let mut phases = Vec::with_capacity(handles.len());
        for (spec, handle) in schedule.phases.iter().zip(handles) {
            let result = match handle.await {
                Ok(result) => result?,
                Err(e) => {
                    error!("Phase {} task failed: {}", spec.name, e);
                    aggregator
                        .phase_result(&spec.name, Duration::ZERO)
                        .ok_or_else(|| {
                            cacheprobe_core::ProbeError::InvalidSchedule(format!(
                                "phase '{}' is not registered",
                                spec.name
                            ))
                        })?
                }
            };
            phases.push(result);
        }

        if let Some(watchdog) = watchdog {
            watchdog.abort();
        }

        let elapsed = run_start.elapsed();
        let overall = aggregator.overall(elapsed)?;
        let cancelled = self.cancel.is_cancelled();
        if cancelled {
            warn!("Run cancelled after {}s, reporting partial results", elapsed.as_secs());
        }

        Ok(RunReport {
            phases,
            overall,
            cancelled,
            elapsed,
            aggregator,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::CallReport;
    use crate::schedule::RampStage;
    use async_trait::async_trait;
    use cacheprobe_core::{AuthorizationCheckRequest, CallError, Decision, LatencyThresholdClassifier};
    use std::sync::atomic::AtomicUsize;

    /// Fixed-latency target counting calls and peak concurrency
    struct FixedLatencyTarget {
        latency: Duration,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        subjects: Mutex<Vec<String>>,
    }

    impl FixedLatencyTarget {
        fn new(latency: Duration) -> Arc<Self> {
            Arc::new(Self {
                latency,
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                subjects: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl AuthzTarget for FixedLatencyTarget {
        async fn check(&self, request: &AuthorizationCheckRequest) -> CallReport {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.subjects.lock().push(request.subject.clone());
            sleep(self.latency).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            CallReport {
                status: Some(200),
                decision: Ok(Decision::Allowed),
                cache_header: None,
            }
        }

        async fn health(&self) -> std::result::Result<u16, CallError> {
            Ok(200)
        }
    }

    fn scheduler(target: Arc<FixedLatencyTarget>) -> PhaseScheduler {
        PhaseScheduler::new(
            target,
            Arc::new(LatencyThresholdClassifier::default()),
            IdentityPool::build(10).unwrap(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_constant_rate_issues_expected_calls() {
        let target = FixedLatencyTarget::new(Duration::from_millis(5));
        let schedule = Schedule::new(vec![PhaseSpec::constant_rate(
            "steady",
            10.0,
            Duration::from_secs(20),
        )
        .concurrency(5)]);

        let report = scheduler(target.clone()).run(&schedule).await.unwrap();

        assert_eq!(report.phases.len(), 1);
        assert_eq!(report.phases[0].request_count, 200);
        assert_eq!(report.phases[0].hit_count, 200);
        assert_eq!(report.phases[0].dropped_iterations, 0);
        assert_eq!(target.calls.load(Ordering::SeqCst), 200);
        assert!(!report.cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_target_drops_iterations() {
        // 20 rps against 1s calls needs 20 callers; only 4 exist
        let target = FixedLatencyTarget::new(Duration::from_secs(1));
        let schedule = Schedule::new(vec![PhaseSpec::constant_rate(
            "saturated",
            20.0,
            Duration::from_secs(10),
        )
        .concurrency(4)]);

        let report = scheduler(target.clone()).run(&schedule).await.unwrap();
        let phase = &report.phases[0];

        assert!(target.peak.load(Ordering::SeqCst) <= 4);
        assert!(phase.dropped_iterations > 0);
        assert_eq!(phase.request_count + phase.dropped_iterations, 200);
        assert_eq!(phase.miss_count, phase.request_count);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_iterations_share_budget() {
        let target = FixedLatencyTarget::new(Duration::from_millis(100));
        let schedule = Schedule::new(vec![PhaseSpec::fixed_iterations(
            "warmup",
            50,
            Duration::from_secs(60),
        )
        .concurrency(5)
        .pacing(Duration::from_millis(50))]);

        let report = scheduler(target.clone()).run(&schedule).await.unwrap();

        assert_eq!(report.phases[0].request_count, 50);
        assert_eq!(target.calls.load(Ordering::SeqCst), 50);
        assert!(target.peak.load(Ordering::SeqCst) <= 5);
        // 10 rounds of 150ms per caller
        assert!(report.elapsed < Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_iterations_bounded_by_max_duration() {
        let target = FixedLatencyTarget::new(Duration::from_secs(1));
        let schedule = Schedule::new(vec![PhaseSpec::fixed_iterations(
            "bounded",
            1000,
            Duration::from_secs(10),
        )
        .concurrency(2)]);

        let report = scheduler(target).run(&schedule).await.unwrap();
        assert_eq!(report.phases[0].request_count, 20);
    }

    #[tokio::test(start_paused = true)]
    async fn test_phases_run_sequentially() {
        let target = FixedLatencyTarget::new(Duration::from_millis(5));
        let schedule = Schedule::new(vec![
            PhaseSpec::fixed_iterations("first", 10, Duration::from_secs(60)).concurrency(2),
            PhaseSpec::idle("pause", Duration::from_secs(90)),
            PhaseSpec::constant_rate("second", 5.0, Duration::from_secs(4)).concurrency(2),
        ]);

        let scheduler = scheduler(target);
        let report = scheduler.run(&schedule).await.unwrap();

        let names: Vec<_> = report.phases.iter().map(|p| p.phase_name.as_str()).collect();
        assert_eq!(names, ["first", "pause", "second"]);
        assert_eq!(report.phases[1].request_count, 0);
        assert!(report.phases[1].elapsed_secs >= 90.0);
        assert_eq!(report.phases[2].request_count, 20);
        assert_eq!(report.overall.request_count, 30);
        assert_eq!(scheduler.phase_state("second"), Some(PhaseState::Completed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_offsets() {
        let target = FixedLatencyTarget::new(Duration::from_millis(5));
        let schedule = Schedule::new(vec![
            PhaseSpec::fixed_iterations("quick", 3, Duration::from_secs(30)).concurrency(1),
            PhaseSpec::constant_rate("later", 1.0, Duration::from_secs(5))
                .concurrency(1)
                .start_at(Duration::from_secs(30)),
        ]);

        let report = scheduler(target).run(&schedule).await.unwrap();
        // Second phase waits for its offset even though the first finished early
        assert!(report.elapsed >= Duration::from_secs(35));
        assert_eq!(report.phases[1].request_count, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ramping_rate() {
        let target = FixedLatencyTarget::new(Duration::from_millis(5));
        let schedule = Schedule::new(vec![PhaseSpec::ramping_rate(
            "ramp",
            0.0,
            vec![
                RampStage::new(Duration::from_secs(10), 20.0),
                RampStage::new(Duration::from_secs(10), 20.0),
            ],
        )
        .concurrency(10)]);

        let report = scheduler(target).run(&schedule).await.unwrap();
        // ~100 calls on the ramp plus 200 on the plateau
        let count = report.phases[0].request_count;
        assert!((270..=310).contains(&count), "unexpected call count {}", count);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ramp_from_zero_rate() {
        let target = FixedLatencyTarget::new(Duration::from_millis(5));
        let silent = Schedule::new(vec![PhaseSpec::ramping_rate(
            "silent",
            0.0,
            vec![RampStage::new(Duration::from_secs(10), 0.0)],
        )
        .concurrency(2)]);

        let report = scheduler(target.clone()).run(&silent).await.unwrap();
        assert_eq!(report.phases[0].request_count, 0);
        assert_eq!(target.calls.load(Ordering::SeqCst), 0);

        // 0 -> 10 rps over 10s integrates to 50 arrivals
        let rising = Schedule::new(vec![PhaseSpec::ramping_rate(
            "rising",
            0.0,
            vec![RampStage::new(Duration::from_secs(10), 10.0)],
        )
        .concurrency(5)]);
        let report = scheduler(target).run(&rising).await.unwrap();
        let count = report.phases[0].request_count;
        assert!((49..=50).contains(&count), "unexpected call count {}", count);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_runs_report_independently() {
        let target = FixedLatencyTarget::new(Duration::from_millis(5));
        let schedule = Schedule::new(vec![PhaseSpec::fixed_iterations(
            "batch",
            10,
            Duration::from_secs(60),
        )
        .concurrency(2)]);

        let scheduler = scheduler(target.clone());
        let first = scheduler.run(&schedule).await.unwrap();
        let second = scheduler.run(&schedule).await.unwrap();

        assert_eq!(first.phases[0].request_count, 10);
        assert_eq!(second.phases[0].request_count, 10);
        assert_eq!(second.overall.request_count, 10);
        assert!(!Arc::ptr_eq(&first.aggregator, &second.aggregator));
        assert_eq!(first.aggregator.phase("batch").unwrap().request_count(), 10);
        assert_eq!(target.calls.load(Ordering::SeqCst), 20);
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_duration_cancels_with_partial_results() {
        let target = FixedLatencyTarget::new(Duration::from_millis(5));
        let schedule = Schedule::new(vec![
            PhaseSpec::constant_rate("long", 10.0, Duration::from_secs(600)).concurrency(5),
            PhaseSpec::constant_rate("never", 10.0, Duration::from_secs(60)).concurrency(5),
        ]);

        let scheduler = scheduler(target).with_max_duration(Duration::from_secs(30));
        let report = scheduler.run(&schedule).await.unwrap();

        assert!(report.cancelled);
        assert!(report.elapsed < Duration::from_secs(31));
        assert!((295..=301).contains(&report.phases[0].request_count));
        assert_eq!(report.phases[1].request_count, 0);
        assert_eq!(scheduler.phase_state("never"), Some(PhaseState::Completed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_schedule_issues_no_traffic() {
        let target = FixedLatencyTarget::new(Duration::from_millis(5));
        let schedule = Schedule::new(vec![
            PhaseSpec::constant_rate("dup", 10.0, Duration::from_secs(5)).concurrency(1),
            PhaseSpec::constant_rate("dup", 10.0, Duration::from_secs(5)).concurrency(1),
        ]);

        assert!(scheduler(target.clone()).run(&schedule).await.is_err());
        assert_eq!(target.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_vu_pool_recycles_ids() {
        let pool = VuPool::new(2);
        let a = pool.try_checkout().unwrap();
        let b = pool.try_checkout().unwrap();
        assert_ne!(a.id(), b.id());
        assert!(pool.try_checkout().is_none());

        let released = a.id();
        drop(a);
        let c = pool.try_checkout().unwrap();
        assert_eq!(c.id(), released);
    }
}
