//! SimWorld — the whole simulated cloud as one serializable value.
//!
//! Every provider call in `provider` and `traffic` is a short critical
//! section over this struct. Nothing here is async.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};
use fleetops_backend::{AcceleratorStatus, EndpointDescription, EndpointGroup, EndpointHealth, RecordSet};
use fleetops_core::tags::Tag;
use fleetops_core::{NodeDetail, NodeId, NodeState, ProviderError, ProviderResult};
use serde::{Deserialize, Serialize};

/// Temporary addresses handed to nodes at launch come from 203.0.113.0/24
/// and up; stable addresses from 192.0.2.0/24 and up.
const TEMP_BASE: u32 = u32::from_be_bytes([203, 0, 113, 1]);
const STABLE_BASE: u32 = u32::from_be_bytes([192, 0, 2, 1]);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimNode {
    pub detail: NodeDetail,
    pub module: String,
    /// Whether the node's application answers its health check.
    pub healthy: bool,
    /// Whether the node still holds its launch-time address.
    pub temporary_address: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimAddress {
    pub region: String,
    pub module: String,
    pub address: Ipv4Addr,
    pub handle: String,
    pub version: String,
    pub node_id: Option<NodeId>,
    pub last_change: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimAccelerator {
    pub listener: String,
    pub tags: Vec<Tag>,
    pub groups: Vec<EndpointGroup>,
    /// Status polls left before a pending change reports deployed.
    pub propagating: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimZone {
    pub tags: Vec<Tag>,
    pub records: Vec<RecordSet>,
}

/// One recorded provider call, for inspection in tests and `fleetctl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimEvent {
    pub at: DateTime<Utc>,
    pub action: String,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimAlert {
    pub subject: String,
    pub html: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimWorld {
    /// Module stamped on allocated addresses.
    pub module: String,
    pub next_node: u64,
    pub next_temp: u32,
    pub next_stable: u32,
    pub nodes: Vec<SimNode>,
    pub addresses: Vec<SimAddress>,
    pub accelerators: BTreeMap<String, SimAccelerator>,
    pub zones: BTreeMap<String, SimZone>,
    /// CPU utilization reported for every node of a region.
    pub region_cpu: BTreeMap<String, f64>,
    /// Versions whose nodes boot but never pass health checks.
    pub unhealthy_versions: Vec<String>,
    /// Launch calls left to fail.
    pub failing_launches: u32,
    /// Fail every `touch` call while set.
    #[serde(default)]
    pub failing_touches: bool,
    pub events: Vec<SimEvent>,
    pub alerts: Vec<SimAlert>,
}

impl SimWorld {
    pub fn record(&mut self, action: &str, detail: impl Into<String>) {
        self.events.push(SimEvent {
            at: Utc::now(),
            action: action.to_string(),
            detail: detail.into(),
        });
    }

    pub fn count(&self, action: &str) -> usize {
        self.events.iter().filter(|e| e.action == action).count()
    }

    pub fn temp_address(&mut self) -> Ipv4Addr {
        let address = Ipv4Addr::from(TEMP_BASE + self.next_temp);
        self.next_temp += 1;
        address
    }

    pub fn stable_address(&mut self) -> Ipv4Addr {
        let address = Ipv4Addr::from(STABLE_BASE + self.next_stable);
        self.next_stable += 1;
        address
    }

    // ── Compute ───────────────────────────────────────────────────

    pub fn node(&self, region: &str, id: &str) -> ProviderResult<&SimNode> {
        self.nodes
            .iter()
            .find(|n| n.detail.id == id && n.detail.region == region)
            .ok_or_else(|| ProviderError::NotFound(format!("node {id} in {region}")))
    }

    pub fn node_mut(&mut self, region: &str, id: &str) -> ProviderResult<&mut SimNode> {
        self.nodes
            .iter_mut()
            .find(|n| n.detail.id == id && n.detail.region == region)
            .ok_or_else(|| ProviderError::NotFound(format!("node {id} in {region}")))
    }

    pub fn node_by_address(&self, address: Ipv4Addr) -> Option<&SimNode> {
        self.nodes
            .iter()
            .find(|n| n.detail.ipv4 == Some(address) && n.detail.state != NodeState::Terminated)
    }

    /// Whether the node behind `address` would answer 200.
    pub fn answers_healthy(&self, address: Ipv4Addr) -> bool {
        self.node_by_address(address)
            .is_some_and(|n| n.detail.state == NodeState::Running && n.healthy)
    }

    fn endpoint_health(&self, region: &str, id: &str) -> EndpointHealth {
        match self.node(region, id) {
            Ok(n) if n.detail.state == NodeState::Running && n.healthy => EndpointHealth::Healthy,
            Ok(n) if n.detail.state == NodeState::Pending => EndpointHealth::Initial,
            _ => EndpointHealth::Unhealthy,
        }
    }

    // ── Addresses ─────────────────────────────────────────────────

    /// Point `handle` at `node_id`. The node's previous address is dropped;
    /// the address's previous holder gets a fresh temporary address.
    pub fn associate(&mut self, region: &str, node_id: &str, handle: &str, now: DateTime<Utc>) -> ProviderResult<()> {
        self.node(region, node_id)?;
        let idx = self
            .addresses
            .iter()
            .position(|a| a.handle == handle && a.region == region)
            .ok_or_else(|| ProviderError::NotFound(format!("address {handle} in {region}")))?;
        let address = self.addresses[idx].address;

        if let Some(previous) = self.addresses[idx].node_id.clone()
            && previous != node_id
        {
            let fresh = self.temp_address();
            if let Ok(holder) = self.node_mut(region, &previous) {
                holder.detail.ipv4 = Some(fresh);
                holder.temporary_address = true;
            }
        }
        for other in self.addresses.iter_mut() {
            if other.node_id.as_deref() == Some(node_id) && other.handle != handle {
                other.node_id = None;
            }
        }

        let entry = &mut self.addresses[idx];
        entry.node_id = Some(node_id.to_string());
        entry.last_change = Some(now);
        let node = self.node_mut(region, node_id)?;
        node.detail.ipv4 = Some(address);
        node.temporary_address = false;
        Ok(())
    }

    // ── Accelerator ───────────────────────────────────────────────

    pub fn accelerator(&self, arn: &str) -> ProviderResult<&SimAccelerator> {
        self.accelerators
            .get(arn)
            .ok_or_else(|| ProviderError::NotFound(format!("accelerator {arn}")))
    }

    pub fn accelerator_mut(&mut self, arn: &str) -> ProviderResult<&mut SimAccelerator> {
        self.accelerators
            .get_mut(arn)
            .ok_or_else(|| ProviderError::NotFound(format!("accelerator {arn}")))
    }

    pub fn accelerator_by_listener(&mut self, listener: &str) -> ProviderResult<&mut SimAccelerator> {
        self.accelerators
            .values_mut()
            .find(|a| a.listener == listener)
            .ok_or_else(|| ProviderError::NotFound(format!("listener {listener}")))
    }

    pub fn accelerator_by_group(&mut self, group_arn: &str) -> ProviderResult<&mut SimAccelerator> {
        self.accelerators
            .values_mut()
            .find(|a| a.groups.iter().any(|g| g.arn == group_arn))
            .ok_or_else(|| ProviderError::NotFound(format!("endpoint group {group_arn}")))
    }

    /// A group as the accelerator would report it, with endpoint health
    /// derived from the nodes behind it.
    pub fn observed(&self, group: &EndpointGroup) -> EndpointGroup {
        let endpoints = group
            .endpoints
            .iter()
            .map(|ep| EndpointDescription {
                health: self.endpoint_health(&group.region, &ep.endpoint_id),
                ..ep.clone()
            })
            .collect();
        EndpointGroup {
            endpoints,
            ..group.clone()
        }
    }

    pub fn accelerator_status(&mut self, arn: &str) -> ProviderResult<AcceleratorStatus> {
        let acc = self.accelerator_mut(arn)?;
        if acc.propagating > 0 {
            acc.propagating -= 1;
            return Ok(AcceleratorStatus::InProgress);
        }
        Ok(AcceleratorStatus::Deployed)
    }

    // ── DNS ───────────────────────────────────────────────────────

    pub fn zone_mut(&mut self, zone_id: &str) -> ProviderResult<&mut SimZone> {
        self.zones
            .get_mut(zone_id)
            .ok_or_else(|| ProviderError::NotFound(format!("zone {zone_id}")))
    }
}

/// Drop `remove` keys, then write `add` over what is left.
pub fn retag(tags: &mut Vec<Tag>, remove: &[String], add: &[Tag]) {
    tags.retain(|t| !remove.contains(&t.key));
    for tag in add {
        match tags.iter_mut().find(|t| t.key == tag.key) {
            Some(existing) => existing.value = tag.value.clone(),
            None => tags.push(tag.clone()),
        }
    }
}

/// Record name the way DNS providers echo it: trailing dot, `*` escaped.
pub fn echoed_name(name: &str) -> String {
    let mut echoed = name.replace('*', "\\052");
    if !echoed.ends_with('.') {
        echoed.push('.');
    }
    echoed
}

pub fn canonical_name(name: &str) -> String {
    name.replace("\\052", "*").trim_end_matches('.').to_string()
}
