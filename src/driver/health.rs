//! HTTP probes for deployed services.
//!
//! Used for the backend health endpoint after a deploy and during `check`,
//! and for reading the build marker of a hosted frontend.

use std::time::{Duration, Instant};

use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::DriverError;

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Default connection timeout in seconds.
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

/// Result of one probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthStatus {
    /// Probed URL.
    pub url: String,
    /// Whether the endpoint answered with a success status.
    pub healthy: bool,
    /// HTTP status code, if a response arrived.
    pub status_code: Option<u16>,
    /// Response time in milliseconds.
    pub response_time_ms: Option<u64>,
    /// Error message, if any.
    pub error: Option<String>,
}

/// HTTP prober.
#[derive(Debug, Clone)]
pub struct HealthChecker {
    client: Client,
    interval: Duration,
}

impl HealthChecker {
    /// Creates a checker with default timeouts.
    ///
    /// # Errors
    ///
    /// Returns `DriverError::Http` if the HTTP client cannot be created.
    pub fn new() -> Result<Self, DriverError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| DriverError::Http {
                message: format!("Failed to create HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            interval: Duration::from_secs(5),
        })
    }

    /// Sets the delay between attempts in [`Self::wait_for_healthy`].
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Probes a URL once.
    pub async fn check(&self, url: &str) -> HealthStatus {
        let start = Instant::now();

        match self.client.get(url).send().await {
            Ok(response) => {
                let status = response.status();
                let response_time = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
                let healthy = status.is_success();

                if !healthy {
                    debug!("Endpoint {url} returned status {status}");
                }

                HealthStatus {
                    url: url.to_string(),
                    healthy,
                    status_code: Some(status.as_u16()),
                    response_time_ms: Some(response_time),
                    error: if healthy {
                        None
                    } else {
                        Some(format!("HTTP {status}"))
                    },
                }
            }
            Err(e) => {
                warn!("Health check failed for {url}: {e}");

                HealthStatus {
                    url: url.to_string(),
                    healthy: false,
                    status_code: None,
                    response_time_ms: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Probes until the endpoint is healthy or `attempts` probes failed.
    ///
    /// # Errors
    ///
    /// Returns `DriverError::Http` with the last failure.
    pub async fn wait_for_healthy(&self, url: &str, attempts: u32) -> Result<HealthStatus, DriverError> {
        let mut last = None;
        for attempt in 1..=attempts.max(1) {
            let status = self.check(url).await;
            if status.healthy {
                return Ok(status);
            }
            debug!("Health probe {attempt}/{attempts} for {url} failed");
            last = status.error;
            if attempt < attempts {
                tokio::time::sleep(self.interval).await;
            }
        }
        Err(DriverError::Http {
            message: format!(
                "{url} is not healthy: {}",
                last.unwrap_or_else(|| String::from("no response"))
            ),
        })
    }

    /// Fetches a JSON document. Returns `None` on 404.
    ///
    /// # Errors
    ///
    /// Returns `DriverError::Http` for transport errors and other non-success
    /// statuses, `DriverError::InvalidResponse` for a body that is not JSON.
    pub async fn get_json(&self, url: &str) -> Result<Option<Value>, DriverError> {
        let response = self.client.get(url).send().await.map_err(|e| DriverError::Http {
            message: format!("GET {url}: {e}"),
        })?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(DriverError::Http {
                message: format!("GET {url}: HTTP {status}"),
            });
        }
        response
            .json::<Value>()
            .await
            .map(Some)
            .map_err(|e| DriverError::invalid_response(format!("GET {url}: {e}")))
    }
}

/// Joins a base URL and a path with exactly one slash.
#[must_use]
pub fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = if self.healthy { "healthy" } else { "unhealthy" };
        write!(f, "{}: {status}", self.url)?;

        if let Some(ms) = self.response_time_ms {
            write!(f, " ({ms}ms)")?;
        }

        if let Some(error) = &self.error {
            write!(f, " - {error}")?;
        }

        Ok(())
    }
}
