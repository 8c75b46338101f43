//! Error types for cache probe setup and per-call failures

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for setup operations
pub type Result<T> = std::result::Result<T, ProbeError>;

/// Errors detected before any traffic is issued
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProbeError {
    /// Identity pool must contain at least one identity
    #[error("Identity pool size must be positive, got {0}")]
    EmptyIdentityPool(usize),

    /// Phase schedule is malformed
    #[error("Invalid phase schedule: {0}")]
    InvalidSchedule(String),

    /// Configuration value out of range
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Duration literal could not be parsed
    #[error("Invalid duration '{0}': expected <n>s, <n>m, <n>h or bare seconds")]
    InvalidDuration(String),

    /// Latency trend collector could not be created
    #[error("Metrics error: {0}")]
    Metrics(String),
}

impl ProbeError {
    /// Numeric code reported by the CLI exit path
    pub fn code(&self) -> u32 {
        match self {
            Self::EmptyIdentityPool(_) => 2001,
            Self::InvalidSchedule(_) => 2002,
            Self::InvalidConfig(_) | Self::InvalidDuration(_) => 2003,
            Self::Metrics(_) => 2004,
        }
    }

    /// Setup errors abort the run before load generation starts
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Metrics(_))
    }
}

/// Failure of a single authorization check. Never retried, never fatal.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallError {
    /// Round trip exceeded the per-call timeout
    #[error("request timed out")]
    NetworkTimeout,

    /// Connection could not be established or was dropped
    #[error("connection failure")]
    ConnectionFailure,

    /// HTTP 429
    #[error("throttled by target (HTTP 429)")]
    Throttled,

    /// 2xx body without a readable `status.allowed`
    #[error("response body is not a valid access review")]
    UnparseableResponse,

    /// Any other non-2xx status
    #[error("unexpected HTTP status {0}")]
    UnexpectedStatus(u16),
}

impl CallError {
    /// Stable metric label for this error class
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NetworkTimeout => "timeout",
            Self::ConnectionFailure => "connection",
            Self::Throttled => "throttled",
            Self::UnparseableResponse => "unparseable",
            Self::UnexpectedStatus(_) => "unexpected_status",
        }
    }

    /// Classify a non-success HTTP status
    pub fn from_status(status: u16) -> Self {
        if status == 429 {
            Self::Throttled
        } else {
            Self::UnexpectedStatus(status)
        }
    }
}
