//! Health probe logic.
//!
//! A probe is one HTTP GET of the configured health URL with the URL's
//! host pinned to a node's public address, so every node is checked
//! directly instead of through DNS.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use fleetops_core::HealthCheckUrl;
use reqwest::StatusCode;
use reqwest::redirect::Policy;
use tracing::{debug, warn};

/// Result of a single health probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    /// The health endpoint returned 200.
    Healthy,
    /// The health endpoint answered with any other status.
    Unhealthy,
    /// No answer: connection error or timeout.
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Unknown,
    Healthy,
    Unhealthy,
}

/// Per-node probe state for one monitoring or gating session.
///
/// Unhealthy is terminal: once the threshold is crossed the node stays
/// unhealthy for the rest of the session.
#[derive(Debug)]
pub struct HealthTracker {
    status: HealthStatus,
    consecutive_failures: u32,
    attempts: u32,
    fail_threshold: u32,
}

impl HealthTracker {
    pub fn new(fail_threshold: u32) -> Self {
        Self {
            status: HealthStatus::Unknown,
            consecutive_failures: 0,
            attempts: 0,
            fail_threshold: fail_threshold.max(1),
        }
    }

    /// Record a probe result and return the new health status.
    pub fn record(&mut self, result: ProbeResult) -> HealthStatus {
        if self.status == HealthStatus::Unhealthy {
            return self.status;
        }
        self.attempts += 1;

        match result {
            ProbeResult::Healthy => {
                self.consecutive_failures = 0;
                self.status = HealthStatus::Healthy;
            }
            ProbeResult::Unhealthy | ProbeResult::Failed => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= self.fail_threshold {
                    warn!(
                        failures = self.consecutive_failures,
                        threshold = self.fail_threshold,
                        "node marked unhealthy"
                    );
                    self.status = HealthStatus::Unhealthy;
                }
            }
        }

        self.status
    }

    pub fn status(&self) -> HealthStatus {
        self.status
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_unhealthy(&self) -> bool {
        self.status == HealthStatus::Unhealthy
    }
}

/// Something that can check one node.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, address: Ipv4Addr) -> ProbeResult;
}

/// Probes the configured health URL over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpProber {
    url: HealthCheckUrl,
    timeout: Duration,
    connect_timeout: Duration,
}

impl HttpProber {
    pub fn new(url: HealthCheckUrl, timeout: Duration, connect_timeout: Duration) -> Self {
        Self {
            url,
            timeout,
            connect_timeout,
        }
    }

    fn client_for(&self, address: Ipv4Addr) -> reqwest::Result<reqwest::Client> {
        let pinned = SocketAddr::new(address.into(), self.url.port());
        reqwest::Client::builder()
            .resolve(self.url.host(), pinned)
            .redirect(Policy::none())
            .timeout(self.timeout)
            .connect_timeout(self.connect_timeout)
            .user_agent("fleetops-health/0.1")
            .build()
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, address: Ipv4Addr) -> ProbeResult {
        let client = match self.client_for(address) {
            Ok(client) => client,
            Err(e) => {
                warn!(error = %e, %address, "failed to build probe client");
                return ProbeResult::Failed;
            }
        };

        match client.get(self.url.as_str()).send().await {
            Ok(resp) if resp.status() == StatusCode::OK => ProbeResult::Healthy,
            Ok(resp) => {
                debug!(status = %resp.status(), %address, url = self.url.as_str(), "health probe non-200");
                ProbeResult::Unhealthy
            }
            Err(e) => {
                debug!(error = %e, %address, url = self.url.as_str(), "health probe failed");
                ProbeResult::Failed
            }
        }
    }
}
