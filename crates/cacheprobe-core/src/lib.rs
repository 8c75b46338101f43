//! # Cacheprobe Core
//!
//! Traffic, inference and aggregation engine for characterizing the decision
//! cache of a remote SubjectAccessReview service.
//!
//! - [`keyspace`]: deterministic identities and payload generators that
//!   control whether a request reuses a cache key
//! - [`classifier`]: hit/miss inference from response latency (or a header)
//! - [`aggregator`]: concurrent per-phase counters and latency trends
//! - [`summary`]: run summaries, eviction analysis and the text digest
//!
//! Hit/miss is always a statistical inference, never ground truth.

pub mod aggregator;
pub mod classifier;
pub mod error;
pub mod keyspace;
pub mod outcome;
pub mod summary;

pub use aggregator::{ErrorBreakdown, MetricsAggregator, PhaseMetrics, PhaseResult, PhaseRole};
pub use classifier::{
    classify, CacheClassifier, CacheState, HeaderClassifier, LatencyThresholdClassifier,
    ResponseObservation, DEFAULT_HIT_THRESHOLD_MS,
};
pub use error::{CallError, ProbeError, Result};
pub use keyspace::{
    cache_defeating_payload, cache_favoring_payload, derive_cache_key, high_cardinality_payload,
    mixed_payload, warmup_batch, warmup_payload, AuthorizationCheckRequest, CacheKey, Identity,
    IdentityPool, PayloadStrategy,
};
pub use outcome::{decision_for, parse_decision, Decision, Outcome};
pub use summary::{DerivedAnalysis, RunSummary, DEFAULT_EVICTION_RATIO};
