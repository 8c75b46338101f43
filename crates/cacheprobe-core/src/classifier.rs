//! Cache-state inference
//!
//! The target exposes no cache instrumentation, so hit/miss is inferred.
//! The default signal is round-trip latency against a fixed threshold;
//! [`HeaderClassifier`] prefers an explicit cache-status header when the
//! target sends one.

use serde::{Deserialize, Serialize};

/// Latency below which a response is taken to be served from cache
pub const DEFAULT_HIT_THRESHOLD_MS: f64 = 50.0;

/// Inferred cache state of one response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CacheState {
    Hit,
    Miss,
}

/// What the classifier sees of a completed call
#[derive(Debug, Clone, Default)]
pub struct ResponseObservation {
    pub latency_ms: f64,
    pub status: Option<u16>,
    /// Value of the configured cache-status header, if present
    pub cache_header: Option<String>,
}

impl ResponseObservation {
    pub fn from_latency(latency_ms: f64) -> Self {
        Self {
            latency_ms,
            ..Default::default()
        }
    }
}

/// Strategy for inferring cache state
pub trait CacheClassifier: Send + Sync {
    fn name(&self) -> &str;

    fn classify(&self, observation: &ResponseObservation) -> CacheState;
}

/// `latency_ms < threshold_ms` is a hit; the threshold itself is a miss.
pub fn classify(latency_ms: f64, threshold_ms: f64) -> CacheState {
    if latency_ms < threshold_ms {
        CacheState::Hit
    } else {
        CacheState::Miss
    }
}

/// Single fixed latency threshold
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencyThresholdClassifier {
    threshold_ms: f64,
}

impl LatencyThresholdClassifier {
    pub fn new(threshold_ms: f64) -> Self {
        Self { threshold_ms }
    }

    pub fn threshold_ms(&self) -> f64 {
        self.threshold_ms
    }
}

impl Default for LatencyThresholdClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_HIT_THRESHOLD_MS)
    }
}

impl CacheClassifier for LatencyThresholdClassifier {
    fn name(&self) -> &str {
        "latency_threshold"
    }

    fn classify(&self, observation: &ResponseObservation) -> CacheState {
        classify(observation.latency_ms, self.threshold_ms)
    }
}

/// Reads `hit`/`miss` from a response header, falling back to latency
#[derive(Debug, Clone)]
pub struct HeaderClassifier {
    header: String,
    fallback: LatencyThresholdClassifier,
}

impl HeaderClassifier {
    pub fn new(header: impl Into<String>, fallback: LatencyThresholdClassifier) -> Self {
        Self {
            header: header.into(),
            fallback,
        }
    }

    /// Header name the HTTP client should capture
    pub fn header(&self) -> &str {
        &self.header
    }
}

impl CacheClassifier for HeaderClassifier {
    fn name(&self) -> &str {
        "response_header"
    }

    fn classify(&self, observation: &ResponseObservation) -> CacheState {
        match observation
            .cache_header
            .as_deref()
            .map(|v| v.trim().to_ascii_lowercase())
            .as_deref()
        {
            Some("hit") => CacheState::Hit,
            Some("miss") => CacheState::Miss,
            _ => self.fallback.classify(observation),
        }
    }
}
