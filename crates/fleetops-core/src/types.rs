//! Shared domain types used across fleetops crates.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Provider region name (e.g. `us-west-2`).
pub type Region = String;

/// Opaque provisioning handle of a compute node.
pub type NodeId = String;

// ── Node ──────────────────────────────────────────────────────────

/// A compute node as seen through a traffic backend.
///
/// Listings without details carry only the identity the backend itself
/// knows: the endpoint-group strategy knows node ids, the DNS strategy
/// knows addresses. Detailed listings fill in both.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Node {
    pub id: Option<NodeId>,
    pub ipv4: Option<Ipv4Addr>,
    pub ipv6: Option<Ipv6Addr>,
}

impl Node {
    /// A node known only by its provisioning id.
    pub fn from_id(id: impl Into<NodeId>) -> Self {
        Self {
            id: Some(id.into()),
            ipv4: None,
            ipv6: None,
        }
    }

    /// A node known only by its public address.
    pub fn from_address(ipv4: Ipv4Addr) -> Self {
        Self {
            id: None,
            ipv4: Some(ipv4),
            ipv6: None,
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Copy of this node with its public address replaced.
    pub fn with_ipv4(&self, ipv4: Ipv4Addr) -> Self {
        Self {
            ipv4: Some(ipv4),
            ..self.clone()
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.id, &self.ipv4) {
            (Some(id), Some(ip)) => write!(f, "{id} ({ip})"),
            (Some(id), None) => write!(f, "{id}"),
            (None, Some(ip)) => write!(f, "{ip}"),
            (None, None) => write!(f, "<unidentified>"),
        }
    }
}

impl From<&NodeDetail> for Node {
    fn from(detail: &NodeDetail) -> Self {
        Self {
            id: Some(detail.id.clone()),
            ipv4: detail.ipv4,
            ipv6: detail.ipv6,
        }
    }
}

/// Lifecycle state reported by the compute provisioner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Pending,
    Running,
    Stopped,
    Terminated,
}

/// Full description of a node, resolved through the compute provisioner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDetail {
    pub id: NodeId,
    pub region: Region,
    pub ipv4: Option<Ipv4Addr>,
    pub ipv6: Option<Ipv6Addr>,
    pub instance_type: String,
    pub version: String,
    pub state: NodeState,
    /// Value of the node's last-change tag, if present.
    pub last_change: Option<DateTime<Utc>>,
}

/// Deploy version and last-change time as recorded on a traffic backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeployMetadata {
    pub version: Option<String>,
    pub last_change: Option<DateTime<Utc>>,
}

// ── Polling ───────────────────────────────────────────────────────

/// Fixed-interval polling budget. Exceeding `max_attempts` is a hard
/// failure for whoever polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollBudget {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollBudget {
    pub const fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }

    /// Upper bound on the time spent sleeping inside this budget.
    pub fn total(&self) -> Duration {
        self.interval * self.max_attempts
    }
}

// ── Tiers ─────────────────────────────────────────────────────────

/// Ordered list of instance types used for vertical scaling, smallest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierLadder {
    tiers: Vec<String>,
}

/// Where a move along the ladder lands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TierStep {
    /// Move to this instance type.
    To(String),
    /// Already at the end of the ladder in the requested direction.
    AtEdge,
    /// The current instance type is not on the ladder.
    Unknown,
}

impl TierLadder {
    pub fn new(tiers: Vec<String>) -> Self {
        Self { tiers }
    }

    pub fn smallest(&self) -> Option<&str> {
        self.tiers.first().map(String::as_str)
    }

    pub fn largest(&self) -> Option<&str> {
        self.tiers.last().map(String::as_str)
    }

    pub fn position(&self, instance_type: &str) -> Option<usize> {
        self.tiers.iter().position(|t| t == instance_type)
    }

    pub fn is_smallest(&self, instance_type: &str) -> bool {
        self.smallest() == Some(instance_type)
    }

    /// Next larger tier.
    pub fn larger(&self, instance_type: &str) -> TierStep {
        match self.position(instance_type) {
            Some(idx) => match self.tiers.get(idx + 1) {
                Some(next) => TierStep::To(next.clone()),
                None => TierStep::AtEdge,
            },
            None => TierStep::Unknown,
        }
    }

    /// Next smaller tier.
    pub fn smaller(&self, instance_type: &str) -> TierStep {
        match self.position(instance_type) {
            Some(0) => TierStep::AtEdge,
            Some(idx) => TierStep::To(self.tiers[idx - 1].clone()),
            None => TierStep::Unknown,
        }
    }

    pub fn as_slice(&self) -> &[String] {
        &self.tiers
    }
}
