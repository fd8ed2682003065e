//! Wire contracts of the provider APIs the two strategies drive.
//!
//! These mirror the handful of accelerator and DNS calls the strategies
//! need. Request marshaling for a concrete cloud lives behind them.

use async_trait::async_trait;
use fleetops_core::ProviderResult;
use fleetops_core::tags::Tag;
use serde::{Deserialize, Serialize};

// ── Accelerator ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EndpointHealth {
    Initial,
    Healthy,
    Unhealthy,
}

/// An endpoint as reported by the accelerator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointDescription {
    pub endpoint_id: String,
    pub weight: u8,
    pub health: EndpointHealth,
    pub client_ip_preservation: bool,
}

/// An endpoint as written to the accelerator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfiguration {
    pub endpoint_id: String,
    pub weight: u8,
    pub client_ip_preservation: bool,
}

impl From<&EndpointDescription> for EndpointConfiguration {
    fn from(desc: &EndpointDescription) -> Self {
        Self {
            endpoint_id: desc.endpoint_id.clone(),
            weight: desc.weight,
            client_ip_preservation: desc.client_ip_preservation,
        }
    }
}

/// Health check parameters of an endpoint group. Fixed at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupHealthCheck {
    pub protocol: String,
    pub port: u16,
    pub path: String,
    pub interval_secs: u32,
    pub threshold_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointGroup {
    pub arn: String,
    pub region: String,
    pub endpoints: Vec<EndpointDescription>,
    pub health_check: GroupHealthCheck,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AcceleratorStatus {
    InProgress,
    Deployed,
}

/// Arguments of an endpoint group creation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateEndpointGroup<'a> {
    pub listener_arn: &'a str,
    pub region: &'a str,
    pub endpoints: &'a [EndpointConfiguration],
    pub health_check: &'a GroupHealthCheck,
    pub idempotency_token: String,
}

#[async_trait]
pub trait AcceleratorApi: Send + Sync {
    async fn list_tags(&self, accelerator_arn: &str) -> ProviderResult<Vec<Tag>>;

    /// Drop `remove` keys, then write `add`.
    async fn retag(&self, accelerator_arn: &str, remove: &[String], add: &[Tag]) -> ProviderResult<()>;

    async fn list_listeners(&self, accelerator_arn: &str) -> ProviderResult<Vec<String>>;

    async fn list_endpoint_groups(&self, listener_arn: &str) -> ProviderResult<Vec<EndpointGroup>>;

    async fn create_endpoint_group(
        &self,
        request: CreateEndpointGroup<'_>,
    ) -> ProviderResult<EndpointGroup>;

    /// Replace the full endpoint list of a group.
    async fn update_endpoint_group(
        &self,
        group_arn: &str,
        endpoints: &[EndpointConfiguration],
    ) -> ProviderResult<EndpointGroup>;

    async fn accelerator_status(&self, accelerator_arn: &str) -> ProviderResult<AcceleratorStatus>;
}

// ── DNS ───────────────────────────────────────────────────────────

/// A latency-routed DNS record set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSet {
    /// Fully qualified name as the provider returns it, possibly with a
    /// trailing dot and `\052` in place of `*`.
    pub name: String,
    pub record_type: String,
    pub ttl: u32,
    pub values: Vec<String>,
    pub region: Option<String>,
    pub set_identifier: Option<String>,
}

#[async_trait]
pub trait DnsApi: Send + Sync {
    async fn list_tags(&self, zone_id: &str) -> ProviderResult<Vec<Tag>>;

    async fn change_tags(&self, zone_id: &str, remove: &[String], add: &[Tag]) -> ProviderResult<()>;

    async fn list_record_sets(&self, zone_id: &str) -> ProviderResult<Vec<RecordSet>>;

    /// Create or overwrite one record set in a single call.
    async fn upsert_record_set(&self, zone_id: &str, record: &RecordSet) -> ProviderResult<()>;
}
