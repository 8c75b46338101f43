//! Access review transport
//!
//! The scheduler only sees [`AuthzTarget`]; [`HttpAuthzClient`] is the
//! production implementation over reqwest.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;

use cacheprobe_core::{decision_for, AuthorizationCheckRequest, CallError, Decision};

use crate::config::HarnessConfig;

/// Path of the access review endpoint, relative to the base URL
pub const REVIEW_PATH: &str = "/subjectaccessreviews";

/// Path probed before the run starts
pub const HEALTH_PATH: &str = "/healthz";

const HEALTH_TIMEOUT: Duration = Duration::from_secs(10);

/// What came back from one authorization check
#[derive(Debug, Clone, PartialEq)]
pub struct CallReport {
    /// HTTP status, when a response was received at all
    pub status: Option<u16>,
    pub decision: Result<Decision, CallError>,
    /// Value of the configured cache status header
    pub cache_header: Option<String>,
}

impl CallReport {
    pub fn failed(error: CallError) -> Self {
        Self {
            status: None,
            decision: Err(error),
            cache_header: None,
        }
    }
}

/// Service under test
#[async_trait]
pub trait AuthzTarget: Send + Sync {
    /// Submit one access review. Failures are reported, never raised.
    async fn check(&self, request: &AuthorizationCheckRequest) -> CallReport;

    /// Probe service health; returns the HTTP status
    async fn health(&self) -> Result<u16, CallError>;
}

/// Transport options for [`HttpAuthzClient`]
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub timeout: Duration,
    pub max_idle_per_host: usize,
    pub insecure_skip_tls_verify: bool,
    /// Concatenated PEM certificate and private key
    pub identity_pem: Option<Vec<u8>>,
    pub cache_header: Option<String>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_idle_per_host: 100,
            insecure_skip_tls_verify: false,
            identity_pem: None,
            cache_header: None,
        }
    }
}

impl ClientOptions {
    /// Options for a harness run; reads the client certificate files
    pub fn from_config(config: &HarnessConfig) -> Result<Self> {
        let identity_pem = match (&config.client_cert, &config.client_key) {
            (Some(cert), Some(key)) => {
                let mut pem = std::fs::read(cert)
                    .with_context(|| format!("Failed to read client certificate {}", cert))?;
                pem.push(b'\n');
                pem.extend(
                    std::fs::read(key)
                        .with_context(|| format!("Failed to read client key {}", key))?,
                );
                Some(pem)
            }
            _ => None,
        };

        Ok(Self {
            timeout: Duration::from_secs(config.request_timeout_secs),
            max_idle_per_host: config.max_vus,
            insecure_skip_tls_verify: config.insecure_skip_tls_verify,
            identity_pem,
            cache_header: config.cache_header.clone(),
        })
    }
}

/// reqwest-backed access review client
#[derive(Debug, Clone)]
pub struct HttpAuthzClient {
    client: reqwest::Client,
    base_url: String,
    cache_header: Option<String>,
}

impl HttpAuthzClient {
    pub fn new(base_url: &str, options: ClientOptions) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(options.timeout)
            .pool_max_idle_per_host(options.max_idle_per_host)
            .danger_accept_invalid_certs(options.insecure_skip_tls_verify);

        if let Some(pem) = &options.identity_pem {
            let identity =
                reqwest::Identity::from_pem(pem).context("Invalid client certificate or key")?;
            builder = builder.identity(identity);
        }

        let client = builder.build().context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            cache_header: options.cache_header,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn header_value(&self, response: &reqwest::Response) -> Option<String> {
        let name = self.cache_header.as_deref()?;
        response
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }
}

fn transport_error(error: &reqwest::Error) -> CallError {
    if error.is_timeout() {
        CallError::NetworkTimeout
    } else {
        CallError::ConnectionFailure
    }
}

#[async_trait]
impl AuthzTarget for HttpAuthzClient {
    async fn check(&self, request: &AuthorizationCheckRequest) -> CallReport {
        let url = format!("{}{}", self.base_url, REVIEW_PATH);

        let response = match self.client.post(&url).json(&request.review()).send().await {
            Ok(response) => response,
            Err(e) => {
                debug!("Access review failed: {}", e);
                return CallReport::failed(transport_error(&e));
            }
        };

        let status = response.status().as_u16();
        let cache_header = self.header_value(&response);
        let decision = match response.bytes().await {
            Ok(body) => decision_for(status, &body),
            Err(e) => Err(transport_error(&e)),
        };

        CallReport {
            status: Some(status),
            decision,
            cache_header,
        }
    }

    async fn health(&self) -> Result<u16, CallError> {
        let url = format!("{}{}", self.base_url, HEALTH_PATH);
        self.client
            .get(&url)
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await
            .map(|r| r.status().as_u16())
            .map_err(|e| transport_error(&e))
    }
}
