//! Per-call outcomes and access review response parsing

use serde::{Deserialize, Serialize};

use crate::classifier::CacheState;
use crate::error::CallError;

/// Authorization decision returned by the target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Decision {
    Allowed,
    Denied,
}

#[derive(Debug, Deserialize)]
struct ReviewResponse {
    status: ReviewStatus,
}

#[derive(Debug, Deserialize)]
struct ReviewStatus {
    allowed: bool,
}

/// Read `status.allowed` from a 2xx response body
pub fn parse_decision(body: &[u8]) -> Result<Decision, CallError> {
    let review: ReviewResponse =
        serde_json::from_slice(body).map_err(|_| CallError::UnparseableResponse)?;
    Ok(if review.status.allowed {
        Decision::Allowed
    } else {
        Decision::Denied
    })
}

/// Decision for a completed HTTP exchange
pub fn decision_for(status: u16, body: &[u8]) -> Result<Decision, CallError> {
    if (200..300).contains(&status) {
        parse_decision(body)
    } else {
        Err(CallError::from_status(status))
    }
}

/// Result of one authorization check, folded into the aggregator and dropped
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub latency_ms: f64,
    pub http_status: Option<u16>,
    pub decision: Result<Decision, CallError>,
    pub cache_state: CacheState,
}

impl Outcome {
    pub fn is_error(&self) -> bool {
        self.decision.is_err()
    }
}
