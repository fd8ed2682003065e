//! SimProvider — compute, addresses, metrics and alerts over a SimWorld.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleetops_backend::{EndpointGroup, RecordSet};
use fleetops_core::tags::Tag;
use fleetops_core::{
    AddressManager, AllocatedAddress, ComputeProvisioner, Datapoint, FleetConfig, LaunchRequest,
    ManagedAddress, MetricSource, MetricWindow, NodeDetail, NodeId, NodeState, Notifier,
    ProviderError, ProviderResult,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{SimError, SimResult};
use crate::world::{SimAccelerator, SimAddress, SimAlert, SimEvent, SimNode, SimWorld, SimZone};

/// In-process stand-in for a cloud account. Clones share one world.
#[derive(Clone, Default)]
pub struct SimProvider {
    pub(crate) world: Arc<Mutex<SimWorld>>,
    path: Option<PathBuf>,
}

impl SimProvider {
    /// An empty world that is never persisted.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load the world from `path`, or start empty when the file is absent.
    pub fn open(path: &Path) -> SimResult<Self> {
        let world = if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            serde_json::from_str(&raw).map_err(|e| SimError::Decode(e.to_string()))?
        } else {
            SimWorld::default()
        };
        debug!(?path, "sim state opened");
        Ok(Self {
            world: Arc::new(Mutex::new(world)),
            path: Some(path.to_path_buf()),
        })
    }

    /// Write the world back to the file it was opened from.
    pub async fn save(&self) -> SimResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let world = self.world.lock().await;
        let raw = serde_json::to_string_pretty(&*world).map_err(|e| SimError::Encode(e.to_string()))?;
        std::fs::write(path, raw)?;
        debug!(?path, "sim state saved");
        Ok(())
    }

    /// Create the accelerators and zones `config` refers to, if missing,
    /// and tag future addresses with the config's module.
    pub async fn ensure_resources(&self, config: &FleetConfig) {
        let mut world = self.world.lock().await;
        world.module = config.module.clone();
        if let Some(acc) = &config.accelerator {
            for arn in &acc.arns {
                world.accelerators.entry(arn.clone()).or_insert_with(|| SimAccelerator {
                    listener: format!("{arn}/listener/1"),
                    tags: Vec::new(),
                    groups: Vec::new(),
                    propagating: 0,
                });
            }
        }
        if let Some(dns) = &config.dns {
            for zone in &dns.zones {
                world.zones.entry(zone.zone_id.clone()).or_insert_with(SimZone::default);
            }
        }
    }

    // ── Scenario controls ─────────────────────────────────────────

    /// Add a running node that no backend routes to yet.
    pub async fn seed_node(&self, module: &str, region: &str, version: &str, instance_type: &str) -> NodeDetail {
        let mut world = self.world.lock().await;
        world.next_node += 1;
        let detail = NodeDetail {
            id: format!("i-{:04}", world.next_node),
            region: region.to_string(),
            ipv4: Some(world.temp_address()),
            ipv6: None,
            instance_type: instance_type.to_string(),
            version: version.to_string(),
            state: NodeState::Running,
            last_change: Some(Utc::now()),
        };
        world.nodes.push(SimNode {
            detail: detail.clone(),
            module: module.to_string(),
            healthy: true,
            temporary_address: true,
        });
        detail
    }

    /// Give a node a stable address, as a previous deploy would have.
    pub async fn seed_address(&self, module: &str, region: &str, node_id: &str) -> ProviderResult<Ipv4Addr> {
        let mut world = self.world.lock().await;
        let address = world.stable_address();
        let handle = format!("eipalloc-{}", world.next_stable);
        world.addresses.push(SimAddress {
            region: region.to_string(),
            module: module.to_string(),
            address,
            handle: handle.clone(),
            version: String::new(),
            node_id: None,
            last_change: Some(Utc::now()),
        });
        world.associate(region, node_id, &handle, Utc::now())?;
        Ok(address)
    }

    pub async fn set_node_health(&self, region: &str, id: &str, healthy: bool) -> ProviderResult<()> {
        let mut world = self.world.lock().await;
        world.node_mut(region, id)?.healthy = healthy;
        Ok(())
    }

    /// Nodes launched with `version` boot but never pass health checks.
    pub async fn break_version(&self, version: &str) {
        self.world.lock().await.unhealthy_versions.push(version.to_string());
    }

    pub async fn fail_next_launches(&self, count: u32) {
        self.world.lock().await.failing_launches = count;
    }

    pub async fn fail_touches(&self, fail: bool) {
        self.world.lock().await.failing_touches = fail;
    }

    pub async fn set_region_cpu(&self, region: &str, cpu: f64) {
        self.world.lock().await.region_cpu.insert(region.to_string(), cpu);
    }

    /// Backdate a node's and its address's last-change mark.
    pub async fn age(&self, region: &str, id: &str, at: DateTime<Utc>) -> ProviderResult<()> {
        let mut world = self.world.lock().await;
        world.node_mut(region, id)?.detail.last_change = Some(at);
        for address in world.addresses.iter_mut().filter(|a| a.node_id.as_deref() == Some(id)) {
            address.last_change = Some(at);
        }
        Ok(())
    }

    /// Set an accelerator tag directly.
    pub async fn tag_accelerator(&self, arn: &str, tag: Tag) -> ProviderResult<()> {
        let mut world = self.world.lock().await;
        crate::world::retag(&mut world.accelerator_mut(arn)?.tags, &[], &[tag]);
        Ok(())
    }

    /// Set a zone tag directly.
    pub async fn tag_zone(&self, zone_id: &str, tag: Tag) -> ProviderResult<()> {
        let mut world = self.world.lock().await;
        crate::world::retag(&mut world.zone_mut(zone_id)?.tags, &[], &[tag]);
        Ok(())
    }

    /// Put a group straight into an accelerator.
    pub async fn seed_group(&self, arn: &str, group: EndpointGroup) -> ProviderResult<()> {
        let mut world = self.world.lock().await;
        world.accelerator_mut(arn)?.groups.push(group);
        Ok(())
    }

    /// Put a record straight into a zone.
    pub async fn seed_record(&self, zone_id: &str, record: RecordSet) -> ProviderResult<()> {
        let mut world = self.world.lock().await;
        world.zone_mut(zone_id)?.records.push(record);
        Ok(())
    }

    // ── Inspection ────────────────────────────────────────────────

    pub async fn snapshot(&self) -> SimWorld {
        self.world.lock().await.clone()
    }

    pub async fn events(&self) -> Vec<SimEvent> {
        self.world.lock().await.events.clone()
    }

    pub async fn count(&self, action: &str) -> usize {
        self.world.lock().await.count(action)
    }

    pub async fn alerts(&self) -> Vec<SimAlert> {
        self.world.lock().await.alerts.clone()
    }

    pub async fn node_detail(&self, region: &str, id: &str) -> ProviderResult<NodeDetail> {
        Ok(self.world.lock().await.node(region, id)?.detail.clone())
    }

    /// Ids of every non-terminated node in `region`.
    pub async fn live_nodes(&self, region: &str) -> Vec<NodeId> {
        self.world
            .lock()
            .await
            .nodes
            .iter()
            .filter(|n| n.detail.region == region && n.detail.state != NodeState::Terminated)
            .map(|n| n.detail.id.clone())
            .collect()
    }
}

// ── Compute ───────────────────────────────────────────────────────

#[async_trait]
impl ComputeProvisioner for SimProvider {
    async fn launch(&self, request: &LaunchRequest) -> ProviderResult<NodeDetail> {
        let mut world = self.world.lock().await;
        if world.failing_launches > 0 {
            world.failing_launches -= 1;
            world.record("launch-failed", &request.region);
            return Err(ProviderError::request("launch", "insufficient capacity"));
        }
        world.next_node += 1;
        let detail = NodeDetail {
            id: format!("i-{:04}", world.next_node),
            region: request.region.clone(),
            ipv4: Some(world.temp_address()),
            ipv6: None,
            instance_type: request.instance_type.clone(),
            version: request.version.clone(),
            state: NodeState::Pending,
            last_change: Some(Utc::now()),
        };
        let healthy = !world.unhealthy_versions.contains(&request.version);
        world.nodes.push(SimNode {
            detail: detail.clone(),
            module: request.module.clone(),
            healthy,
            temporary_address: true,
        });
        world.record(
            "launch",
            format!("{} {} {} {}", request.region, detail.id, request.instance_type, request.version),
        );
        info!(region = %request.region, id = %detail.id, name = %request.node_name(), "sim node launched");
        Ok(detail)
    }

    async fn describe(&self, region: &str, id: &str) -> ProviderResult<NodeDetail> {
        let mut world = self.world.lock().await;
        let node = world.node_mut(region, id)?;
        // Nodes finish booting the first time anyone looks.
        if node.detail.state == NodeState::Pending {
            node.detail.state = NodeState::Running;
        }
        Ok(node.detail.clone())
    }

    async fn describe_many(&self, region: &str, ids: &[NodeId]) -> ProviderResult<Vec<NodeDetail>> {
        let world = self.world.lock().await;
        Ok(ids
            .iter()
            .filter_map(|id| world.node(region, id).ok())
            .map(|n| n.detail.clone())
            .collect())
    }

    async fn find_by_addresses(&self, region: &str, addresses: &[Ipv4Addr]) -> ProviderResult<Vec<NodeDetail>> {
        let world = self.world.lock().await;
        Ok(addresses
            .iter()
            .filter_map(|a| world.node_by_address(*a))
            .filter(|n| n.detail.region == region)
            .map(|n| n.detail.clone())
            .collect())
    }

    async fn terminate(&self, region: &str, ids: &[NodeId]) -> ProviderResult<()> {
        let mut world = self.world.lock().await;
        for id in ids {
            world.node_mut(region, id)?.detail.state = NodeState::Terminated;
            for address in world.addresses.iter_mut().filter(|a| a.node_id.as_deref() == Some(id.as_str())) {
                address.node_id = None;
            }
            world.record("terminate", format!("{region} {id}"));
        }
        Ok(())
    }

    async fn touch(&self, region: &str, id: &str, at: DateTime<Utc>) -> ProviderResult<()> {
        let mut world = self.world.lock().await;
        if world.failing_touches {
            world.record("touch-failed", format!("{region} {id}"));
            return Err(ProviderError::request("touch", "tag write throttled"));
        }
        world.node_mut(region, id)?.detail.last_change = Some(at);
        world.record("touch", format!("{region} {id}"));
        Ok(())
    }

    async fn list_managed(&self, region: &str, module: &str) -> ProviderResult<Vec<NodeDetail>> {
        let world = self.world.lock().await;
        Ok(world
            .nodes
            .iter()
            .filter(|n| n.detail.region == region && n.module == module)
            .filter(|n| n.detail.state != NodeState::Terminated)
            .map(|n| n.detail.clone())
            .collect())
    }
}

// ── Addresses ─────────────────────────────────────────────────────

#[async_trait]
impl AddressManager for SimProvider {
    async fn allocate(&self, region: &str, version: &str) -> ProviderResult<AllocatedAddress> {
        let mut world = self.world.lock().await;
        let address = world.stable_address();
        let handle = format!("eipalloc-{}", world.next_stable);
        let module = world.module.clone();
        world.addresses.push(SimAddress {
            region: region.to_string(),
            module,
            address,
            handle: handle.clone(),
            version: version.to_string(),
            node_id: None,
            last_change: Some(Utc::now()),
        });
        world.record("allocate", format!("{region} {address}"));
        Ok(AllocatedAddress { address, handle })
    }

    async fn associate(&self, region: &str, node_id: &str, handle: &str) -> ProviderResult<()> {
        let mut world = self.world.lock().await;
        world.associate(region, node_id, handle, Utc::now())?;
        world.record("associate", format!("{region} {node_id} {handle}"));
        Ok(())
    }

    async fn find_handle(&self, region: &str, address: Ipv4Addr) -> ProviderResult<String> {
        let world = self.world.lock().await;
        world
            .addresses
            .iter()
            .find(|a| a.region == region && a.address == address)
            .map(|a| a.handle.clone())
            .ok_or_else(|| ProviderError::NotFound(format!("address {address} in {region}")))
    }

    async fn release(&self, region: &str, addresses: &[Ipv4Addr]) -> ProviderResult<()> {
        let mut world = self.world.lock().await;
        for address in addresses {
            let Some(idx) = world
                .addresses
                .iter()
                .position(|a| a.region == region && a.address == *address)
            else {
                warn!(%region, %address, "releasing unknown sim address");
                continue;
            };
            let released = world.addresses.remove(idx);
            if let Some(id) = released.node_id
                && let Ok(node) = world.node_mut(region, &id)
            {
                node.detail.ipv4 = None;
            }
            world.record("release", format!("{region} {address}"));
        }
        Ok(())
    }

    async fn list_managed(&self, region: &str, module: &str) -> ProviderResult<Vec<ManagedAddress>> {
        let world = self.world.lock().await;
        Ok(world
            .addresses
            .iter()
            .filter(|a| a.region == region && a.module == module)
            .map(|a| ManagedAddress {
                address: a.address,
                handle: a.handle.clone(),
                last_change: a.last_change,
            })
            .collect())
    }
}

// ── Metrics and alerts ────────────────────────────────────────────

#[async_trait]
impl MetricSource for SimProvider {
    async fn query(&self, region: &str, node_id: &str, window: MetricWindow) -> ProviderResult<Vec<Datapoint>> {
        let world = self.world.lock().await;
        let node = world.node(region, node_id)?;
        if node.detail.state != NodeState::Running {
            return Ok(Vec::new());
        }
        let Some(cpu) = world.region_cpu.get(region).copied() else {
            return Ok(Vec::new());
        };
        let step = chrono::Duration::from_std(window.period)
            .map_err(|e| ProviderError::request("metrics", e.to_string()))?;
        if step <= chrono::Duration::zero() {
            return Ok(Vec::new());
        }
        let mut points = Vec::new();
        let mut at = window.start + step;
        while at <= window.end {
            points.push(Datapoint { timestamp: at, value: cpu });
            at += step;
        }
        Ok(points)
    }
}

#[async_trait]
impl Notifier for SimProvider {
    async fn send_alert(&self, subject: &str, html: &str) -> anyhow::Result<()> {
        let mut world = self.world.lock().await;
        world.alerts.push(SimAlert {
            subject: subject.to_string(),
            html: html.to_string(),
        });
        world.record("alert", subject);
        info!(%subject, "sim alert recorded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    fn request(version: &str) -> LaunchRequest {
        LaunchRequest {
            module: "api".into(),
            region: "us-west-2".into(),
            version: version.into(),
            instance_type: "t4g.small".into(),
            template: None,
            startup_script: None,
            startup_script_region: None,
            startup_env: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn launched_nodes_boot_on_describe() {
        let sim = SimProvider::in_memory();
        let launched = sim.launch(&request("v1")).await.unwrap();
        assert_eq!(launched.state, NodeState::Pending);
        let described = sim.describe("us-west-2", &launched.id).await.unwrap();
        assert_eq!(described.state, NodeState::Running);
        assert_eq!(sim.count("launch").await, 1);
    }

    #[tokio::test]
    async fn moving_an_address_reassigns_the_old_holder() {
        let sim = SimProvider::in_memory();
        let old = sim.seed_node("api", "us-west-2", "v1", "t4g.small").await;
        let stable = sim.seed_address("api", "us-west-2", &old.id).await.unwrap();
        let new = sim.launch(&request("v2")).await.unwrap();

        let handle = sim.find_handle("us-west-2", stable).await.unwrap();
        sim.associate("us-west-2", &new.id, &handle).await.unwrap();

        let new = sim.node_detail("us-west-2", &new.id).await.unwrap();
        let old = sim.node_detail("us-west-2", &old.id).await.unwrap();
        assert_eq!(new.ipv4, Some(stable));
        assert_ne!(old.ipv4, Some(stable));
        assert!(old.ipv4.is_some());
    }

    #[tokio::test]
    async fn metrics_follow_region_load() {
        let sim = SimProvider::in_memory();
        let node = sim.seed_node("api", "us-west-2", "v1", "t4g.small").await;
        let window = MetricWindow::trailing(Utc::now(), Duration::from_secs(60), 12);
        assert!(sim.query("us-west-2", &node.id, window).await.unwrap().is_empty());

        sim.set_region_cpu("us-west-2", 42.0).await;
        let points = sim.query("us-west-2", &node.id, window).await.unwrap();
        assert_eq!(points.len(), 12);
        assert!(points.iter().all(|p| p.value == 42.0));
    }

    #[tokio::test]
    async fn state_survives_save_and_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sim.json");
        let sim = SimProvider::open(&path).unwrap();
        sim.seed_node("api", "us-west-2", "v1", "t4g.small").await;
        sim.save().await.unwrap();

        let reopened = SimProvider::open(&path).unwrap();
        assert_eq!(reopened.live_nodes("us-west-2").await.len(), 1);
    }

    #[tokio::test]
    async fn failing_launches_are_consumed() {
        let sim = SimProvider::in_memory();
        sim.fail_next_launches(1).await;
        assert!(sim.launch(&request("v1")).await.is_err());
        assert!(sim.launch(&request("v1")).await.is_ok());
    }
}
