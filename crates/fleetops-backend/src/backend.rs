//! The capability set shared by every traffic backend.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleetops_core::{DeployMetadata, Node, Region};

use crate::error::BackendResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    EndpointGroup,
    Dns,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::EndpointGroup => f.write_str("accelerator"),
            BackendKind::Dns => f.write_str("dns"),
        }
    }
}

/// How much to resolve when listing nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detail {
    /// Only the identity the backend itself stores: node ids for endpoint
    /// groups, addresses for DNS.
    Identity,
    /// Ids and addresses, resolved through the compute provisioner.
    Full,
}

/// Decides which nodes receive live traffic and records deploy metadata.
///
/// Listings only return traffic-bound nodes: weight above zero for endpoint
/// groups, present in the record set for DNS.
#[async_trait]
pub trait TrafficBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Deployed version. `None` when the tag is absent; an error only when
    /// the representative resource cannot be read.
    async fn current_version(&self) -> BackendResult<Option<String>>;

    async fn last_change_time(&self) -> BackendResult<Option<DateTime<Utc>>>;

    /// Rewrite the last-change time (and the version, when given) on every
    /// backing resource. Resources updated before a failure stay updated.
    async fn update_tags(&self, version: Option<&str>) -> BackendResult<()>;

    async fn list_all_nodes(&self, detail: Detail) -> BackendResult<BTreeMap<Region, Vec<Node>>>;

    async fn list_nodes_in_region(&self, region: &str, detail: Detail) -> BackendResult<Vec<Node>>;

    /// Make `nodes` the only traffic-bound nodes of `region`.
    async fn replace_nodes(&self, region: &str, nodes: &[Node]) -> BackendResult<()>;

    /// Add `nodes` to the traffic-bound nodes of `region`.
    async fn add_nodes(&self, region: &str, nodes: &[Node]) -> BackendResult<()>;

    async fn metadata(&self) -> BackendResult<DeployMetadata> {
        Ok(DeployMetadata {
            version: self.current_version().await?,
            last_change: self.last_change_time().await?,
        })
    }
}
