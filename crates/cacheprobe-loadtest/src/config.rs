//! Harness configuration
//!
//! Every knob is optional. Values come from CLI flags, falling back to the
//! environment variables existing load-test tooling reads (`GUARD_URL`, `TARGET_RPS`, ...)
//! and then to defaults.

use clap::{ArgAction, Args, ValueEnum};
use serde::{Deserialize, Serialize};

use cacheprobe_core::{ProbeError, Result, DEFAULT_EVICTION_RATIO, DEFAULT_HIT_THRESHOLD_MS};

/// Slack added to a cache profile's TTL when deriving the idle wait
const TTL_MARGIN_SECS: u64 = 60;

/// Complete harness configuration, echoed into every run summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Base URL of the authorization service
    pub target_url: String,

    /// Target requests per second for rate-driven scenarios
    pub target_rps: u64,

    /// Duration of rate-driven scenarios, seconds
    pub duration_secs: u64,

    /// Share of cache-favoring payloads in mixed traffic (0.0-1.0)
    pub cache_hit_ratio: f64,

    /// Number of synthetic identities
    pub user_pool_size: usize,

    /// Idle time between pre- and post-eviction phases, seconds
    pub wait_duration_secs: u64,

    /// Length of each eviction measurement phase, seconds
    pub eviction_phase_secs: u64,

    /// Keys warmed before eviction measurement
    pub warmup_iterations: u64,

    /// Calls issued by the cache-warmup scenario
    pub cache_entries: u64,

    /// Upper bound on concurrent callers
    pub max_vus: usize,

    /// Per-call timeout, seconds
    pub request_timeout_secs: u64,

    /// Latency below which a response counts as a cache hit
    pub hit_threshold_ms: f64,

    /// Post/pre hit-rate ratio below which the TTL counts as effective
    pub eviction_ratio: f64,

    /// Response header carrying an explicit cache status
    pub cache_header: Option<String>,

    /// PEM client certificate for mTLS
    pub client_cert: Option<String>,

    /// PEM private key for mTLS
    pub client_key: Option<String>,

    /// Accept self-signed target certificates
    pub insecure_skip_tls_verify: bool,

    /// Abort the whole run after this many seconds
    pub max_run_secs: Option<u64>,

    /// Start phases at fixed wall-clock offsets instead of on completion
    pub fixed_offsets: bool,

    /// Warm the cache with the diverse warm-up enumeration
    pub diverse_warmup: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            target_url: "https://localhost:8443".to_string(),
            target_rps: 100,
            duration_secs: 300,
            cache_hit_ratio: 0.8,
            user_pool_size: 100,
            wait_duration_secs: 240,
            eviction_phase_secs: 120,
            warmup_iterations: 200,
            cache_entries: 1000,
            max_vus: 500,
            request_timeout_secs: 30,
            hit_threshold_ms: DEFAULT_HIT_THRESHOLD_MS,
            eviction_ratio: DEFAULT_EVICTION_RATIO,
            cache_header: None,
            client_cert: None,
            client_key: None,
            insecure_skip_tls_verify: true,
            max_run_secs: None,
            fixed_offsets: false,
            diverse_warmup: false,
        }
    }
}

impl HarnessConfig {
    /// Reject values that would make the run meaningless, before any traffic
    pub fn validate(&self) -> Result<()> {
        if self.user_pool_size == 0 {
            return Err(ProbeError::EmptyIdentityPool(0));
        }
        if !self.target_url.starts_with("http://") && !self.target_url.starts_with("https://") {
            return Err(invalid(format!("target URL must be http(s): {}", self.target_url)));
        }
        if !(0.0..=1.0).contains(&self.cache_hit_ratio) {
            return Err(invalid(format!(
                "cache hit ratio must be within [0, 1], got {}",
                self.cache_hit_ratio
            )));
        }
        let eviction_ratio_ok = self.eviction_ratio > 0.0 && self.eviction_ratio <= 1.0;
        if !eviction_ratio_ok {
            return Err(invalid(format!(
                "eviction ratio must be within (0, 1], got {}",
                self.eviction_ratio
            )));
        }
        if !(self.hit_threshold_ms.is_finite() && self.hit_threshold_ms > 0.0) {
            return Err(invalid(format!(
                "hit threshold must be a positive number of milliseconds, got {}",
                self.hit_threshold_ms
            )));
        }
        if self.target_rps == 0 || self.max_vus == 0 || self.request_timeout_secs == 0 {
            return Err(invalid(
                "target RPS, max VUs and request timeout must be positive".to_string(),
            ));
        }
        if self.client_cert.is_some() != self.client_key.is_some() {
            return Err(invalid("client certificate and key must be given together".to_string()));
        }
        Ok(())
    }

    /// Configuration as a JSON value for the run summary
    pub fn echo(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

fn invalid(message: String) -> ProbeError {
    ProbeError::InvalidConfig(message)
}

/// Parse `30s`, `4m`, `1h` or bare seconds into seconds
pub fn parse_duration(value: &str) -> Result<u64> {
    let value = value.trim();
    let err = || ProbeError::InvalidDuration(value.to_string());

    let (digits, multiplier) = match value.chars().last() {
        Some('s') => (&value[..value.len() - 1], 1),
        Some('m') => (&value[..value.len() - 1], 60),
        Some('h') => (&value[..value.len() - 1], 3600),
        Some(c) if c.is_ascii_digit() => (value, 1),
        _ => return Err(err()),
    };

    digits
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(multiplier))
        .ok_or_else(err)
}

/// Render seconds the way durations are written on the command line
pub fn format_duration(secs: u64) -> String {
    if secs > 0 && secs % 3600 == 0 {
        format!("{}h", secs / 3600)
    } else if secs > 0 && secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{}s", secs)
    }
}

/// Cache configurations of the target under comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheProfile {
    /// 5MB cache, 3min TTL
    #[value(name = "master")]
    Master,
    /// 50MB cache, 10min TTL
    #[value(name = "improved_default")]
    ImprovedDefault,
    /// 100MB cache, 10min TTL
    #[value(name = "improved_large")]
    ImprovedLarge,
    /// 50MB cache, 30min TTL
    #[value(name = "improved_long_ttl")]
    ImprovedLongTtl,
}

impl CacheProfile {
    pub fn size_mb(&self) -> u64 {
        match self {
            Self::Master => 5,
            Self::ImprovedDefault | Self::ImprovedLongTtl => 50,
            Self::ImprovedLarge => 100,
        }
    }

    pub fn ttl_secs(&self) -> u64 {
        match self {
            Self::Master => 3 * 60,
            Self::ImprovedDefault | Self::ImprovedLarge => 10 * 60,
            Self::ImprovedLongTtl => 30 * 60,
        }
    }

    /// Idle wait long enough for every entry to expire
    pub fn wait_secs(&self) -> u64 {
        self.ttl_secs() + TTL_MARGIN_SECS
    }
}

/// Command-line and environment inputs
#[derive(Debug, Clone, Args)]
pub struct HarnessArgs {
    /// Base URL of the authorization service
    #[arg(short, long, env = "GUARD_URL", default_value = "https://localhost:8443")]
    pub target: String,

    /// Target requests per second
    #[arg(short, long, env = "TARGET_RPS", default_value = "100")]
    pub rps: u64,

    /// Duration of rate-driven scenarios (e.g. 30s, 5m)
    #[arg(short, long, env = "DURATION", default_value = "5m", value_parser = parse_duration)]
    pub duration: u64,

    /// Share of cache-favoring payloads (0.0-1.0)
    #[arg(long, env = "CACHE_HIT_RATIO", default_value = "0.8")]
    pub cache_hit_ratio: f64,

    /// Number of synthetic identities [default: 50 for cache-eviction, else 100]
    #[arg(long, env = "USER_POOL_SIZE")]
    pub user_pool_size: Option<usize>,

    /// Idle wait between eviction phases; TTL plus margin [default: 4m]
    #[arg(long, env = "WAIT_DURATION", value_parser = parse_duration)]
    pub wait_duration: Option<u64>,

    /// Length of each eviction measurement phase
    #[arg(long, env = "EVICTION_PHASE_DURATION", default_value = "2m", value_parser = parse_duration)]
    pub eviction_phase_duration: u64,

    /// Keys warmed before eviction measurement
    #[arg(long, env = "WARMUP_ITERATIONS", default_value = "200")]
    pub warmup_iterations: u64,

    /// Calls issued by the cache-warmup scenario
    #[arg(long, env = "CACHE_ENTRIES", default_value = "1000")]
    pub cache_entries: u64,

    /// Upper bound on concurrent callers
    #[arg(long, env = "MAX_VUS", default_value = "500")]
    pub max_vus: usize,

    /// Per-call timeout
    #[arg(long, env = "REQUEST_TIMEOUT", default_value = "30s", value_parser = parse_duration)]
    pub request_timeout: u64,

    /// Latency threshold for inferring a cache hit, milliseconds
    #[arg(long, env = "CACHE_HIT_THRESHOLD_MS", default_value_t = DEFAULT_HIT_THRESHOLD_MS)]
    pub hit_threshold_ms: f64,

    /// Post/pre hit-rate ratio below which the TTL counts as effective
    #[arg(long, env = "EVICTION_RATIO", default_value_t = DEFAULT_EVICTION_RATIO)]
    pub eviction_ratio: f64,

    /// Response header carrying an explicit hit/miss status
    #[arg(long, env = "CACHE_STATUS_HEADER")]
    pub cache_header: Option<String>,

    /// PEM client certificate for mTLS
    #[arg(long, env = "CLIENT_CERT")]
    pub client_cert: Option<String>,

    /// PEM private key for mTLS
    #[arg(long, env = "CLIENT_KEY")]
    pub client_key: Option<String>,

    /// Accept self-signed target certificates
    #[arg(long, env = "INSECURE_SKIP_TLS_VERIFY", default_value_t = true, action = ArgAction::Set)]
    pub insecure_skip_tls_verify: bool,

    /// Abort the run after this long
    #[arg(long, env = "MAX_RUN_DURATION", value_parser = parse_duration)]
    pub max_run_duration: Option<u64>,

    /// Cache profile of the target; derives the wait duration from its TTL
    #[arg(long, value_enum)]
    pub cache_profile: Option<CacheProfile>,

    /// Start phases at fixed offsets from run start
    #[arg(long)]
    pub fixed_offsets: bool,

    /// Warm the cache with the diverse warm-up enumeration
    #[arg(long)]
    pub diverse: bool,
}

impl HarnessArgs {
    /// Resolve into a configuration; `default_pool_size` depends on the scenario
    pub fn into_config(self, default_pool_size: usize) -> HarnessConfig {
        let defaults = HarnessConfig::default();
        let wait_duration_secs = self
            .wait_duration
            .or_else(|| self.cache_profile.map(|p| p.wait_secs()))
            .unwrap_or(defaults.wait_duration_secs);

        HarnessConfig {
            target_url: self.target.trim_end_matches('/').to_string(),
            target_rps: self.rps,
            duration_secs: self.duration,
            cache_hit_ratio: self.cache_hit_ratio,
            user_pool_size: self.user_pool_size.unwrap_or(default_pool_size),
            wait_duration_secs,
            eviction_phase_secs: self.eviction_phase_duration,
            warmup_iterations: self.warmup_iterations,
            cache_entries: self.cache_entries,
            max_vus: self.max_vus,
            request_timeout_secs: self.request_timeout,
            hit_threshold_ms: self.hit_threshold_ms,
            eviction_ratio: self.eviction_ratio,
            cache_header: self.cache_header,
            client_cert: self.client_cert,
            client_key: self.client_key,
            insecure_skip_tls_verify: self.insecure_skip_tls_verify,
            max_run_secs: self.max_run_duration,
            fixed_offsets: self.fixed_offsets,
            diverse_warmup: self.diverse,
        }
    }
}
