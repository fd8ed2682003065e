//! FleetController — shared state and helpers behind every operation.
//!
//! The operations themselves live in `deploy`, `scale`, `clean`, `monitor`
//! and `status`; this module wires collaborators together from the config
//! and holds the steps they share: version and instance-type discovery,
//! provisioning, gating and address pairing.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

use fleetops_backend::{
    AcceleratorApi, BackendError, Detail, DnsApi, DnsBackend, EndpointGroupBackend,
    EndpointGroupSettings, TrafficBackend,
};
use fleetops_core::config::LaunchConfig;
use fleetops_core::{
    AddressManager, ComputeProvisioner, ConfigError, FleetConfig, LaunchRequest, MonitorSettings,
    Node, NodeDetail, Notifier, Region, TierLadder, Timings,
};
use fleetops_health::{HealthError, HealthProbeEngine, HttpProber, Prober};
use fleetops_state::{LockGuard, OperationLock};
use tracing::{debug, error, info, warn};

use crate::error::{ControllerError, ControllerResult};

/// Largest amount accepted by horizontal scaling.
pub const MAX_SCALE_AMOUNT: u32 = 50;

/// External clients the controller drives. Traffic backends are built
/// from the API clients according to the config.
#[derive(Clone)]
pub struct Collaborators {
    pub compute: Arc<dyn ComputeProvisioner>,
    pub addresses: Option<Arc<dyn AddressManager>>,
    pub accelerator: Option<Arc<dyn AcceleratorApi>>,
    pub dns: Option<Arc<dyn DnsApi>>,
    /// Health prober; defaults to HTTP probes of the configured URL.
    pub prober: Option<Arc<dyn Prober>>,
    pub notifier: Arc<dyn Notifier>,
}

pub struct FleetController {
    pub(crate) module: String,
    pub(crate) regions: Vec<Region>,
    pub(crate) launch: LaunchConfig,
    pub(crate) tiers: TierLadder,
    pub(crate) timings: Timings,
    pub(crate) monitor: MonitorSettings,
    pub(crate) compute: Arc<dyn ComputeProvisioner>,
    pub(crate) addresses: Option<Arc<dyn AddressManager>>,
    pub(crate) accelerator: Option<EndpointGroupBackend>,
    pub(crate) dns: Option<DnsBackend>,
    pub(crate) engine: HealthProbeEngine,
    pub(crate) lock: OperationLock,
    pub(crate) notifier: Arc<dyn Notifier>,
}

impl FleetController {
    pub fn new(config: &FleetConfig, collaborators: Collaborators) -> ControllerResult<Self> {
        config.validate()?;
        let check = config.health_check()?;
        let timings = config.timings()?;
        let monitor = config.monitor_settings()?;
        let Collaborators {
            compute,
            addresses,
            accelerator,
            dns,
            prober,
            notifier,
        } = collaborators;

        let accelerator = match (&config.accelerator, accelerator) {
            (Some(acc), Some(api)) => Some(EndpointGroupBackend::new(
                api,
                Arc::clone(&compute),
                config.module.clone(),
                acc.arns.clone(),
                &check,
                EndpointGroupSettings {
                    health: timings.endpoint_health,
                    propagation: timings.propagation,
                },
            )),
            (Some(_), None) => {
                return Err(ConfigError::Invalid("accelerator is configured but no accelerator client was given".into()).into());
            }
            (None, _) => None,
        };

        let dns = match (&config.dns, dns) {
            (Some(cfg), Some(api)) => {
                if addresses.is_none() {
                    return Err(ConfigError::Invalid("dns strategy needs an address manager".into()).into());
                }
                Some(DnsBackend::new(
                    api,
                    Arc::clone(&compute),
                    config.module.clone(),
                    cfg.subdomain.clone(),
                    cfg.ttl,
                    cfg.zones.clone(),
                ))
            }
            (Some(_), None) => {
                return Err(ConfigError::Invalid("dns is configured but no dns client was given".into()).into());
            }
            (None, _) => None,
        };

        if accelerator.is_none() && dns.is_none() {
            warn!(module = %config.module, "no traffic backend configured");
        }

        let prober = prober.unwrap_or_else(|| {
            Arc::new(HttpProber::new(check.clone(), monitor.probe_timeout, monitor.connect_timeout))
        });

        Ok(Self {
            module: config.module.clone(),
            regions: config.regions.clone(),
            launch: config.launch.clone(),
            tiers: config.tier_ladder(),
            timings,
            monitor,
            compute,
            addresses,
            accelerator,
            dns,
            engine: HealthProbeEngine::new(prober),
            lock: OperationLock::new(config.lock_path()),
            notifier,
        })
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn tiers(&self) -> &TierLadder {
        &self.tiers
    }

    pub fn lock(&self) -> &OperationLock {
        &self.lock
    }

    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    /// Configured backends, endpoint groups first.
    pub fn backends(&self) -> Vec<&dyn TrafficBackend> {
        let mut backends: Vec<&dyn TrafficBackend> = Vec::with_capacity(2);
        if let Some(acc) = &self.accelerator {
            backends.push(acc);
        }
        if let Some(dns) = &self.dns {
            backends.push(dns);
        }
        backends
    }

    // ── Discovery ─────────────────────────────────────────────────

    /// Deployed version from the first backend that reports one. Backends
    /// that cannot be read are logged and skipped.
    pub async fn current_version(&self) -> Option<String> {
        for backend in self.backends() {
            match backend.current_version().await {
                Ok(Some(version)) => return Some(version),
                Ok(None) => debug!(backend = %backend.kind(), "no version tag"),
                Err(e) => error!(backend = %backend.kind(), error = %e, "failed to read version"),
            }
        }
        None
    }

    pub(crate) async fn require_version(&self) -> ControllerResult<String> {
        self.current_version()
            .await
            .ok_or_else(|| ControllerError::precondition("unable to determine the deployed version"))
    }

    /// Detailed nodes of `region`: endpoint groups first, DNS when the
    /// group has none. Fails only when every configured backend failed.
    pub async fn region_nodes(&self, region: &str) -> ControllerResult<Vec<Node>> {
        let mut last_error: Option<BackendError> = None;
        let mut answered = false;
        for backend in self.backends() {
            match backend.list_nodes_in_region(region, Detail::Full).await {
                Ok(nodes) if !nodes.is_empty() => return Ok(nodes),
                Ok(_) => answered = true,
                Err(e) => {
                    error!(backend = %backend.kind(), %region, error = %e, "failed to list nodes");
                    last_error = Some(e);
                }
            }
        }
        match last_error {
            Some(e) if !answered => Err(e.into()),
            _ => Ok(Vec::new()),
        }
    }

    /// Traffic-bound nodes of every region, preferring DNS when both
    /// backends are configured.
    pub async fn fleet_nodes(&self) -> ControllerResult<BTreeMap<Region, Vec<Node>>> {
        let backend: &dyn TrafficBackend = match (&self.dns, &self.accelerator) {
            (Some(dns), _) => dns,
            (None, Some(acc)) => acc,
            (None, None) => return Err(ControllerError::precondition("no traffic backend configured")),
        };
        Ok(backend.list_all_nodes(Detail::Full).await?)
    }

    /// Instance type of the first node in `region`, or in the first
    /// configured region when `region` is `None`.
    pub async fn current_instance_type(&self, region: Option<&str>) -> ControllerResult<String> {
        let region = match region {
            Some(region) => region,
            None => self
                .regions
                .first()
                .map(String::as_str)
                .ok_or_else(|| ControllerError::precondition("no region configured"))?,
        };
        let nodes = self.region_nodes(region).await?;
        let id = nodes
            .iter()
            .find_map(Node::id)
            .ok_or_else(|| ControllerError::precondition(format!("no node in {region} to read the instance type from")))?;
        let detail = self.compute.describe(region, id).await?;
        Ok(detail.instance_type)
    }

    pub(crate) fn ensure_region(&self, region: &str) -> ControllerResult<()> {
        if self.regions.iter().any(|r| r == region) {
            Ok(())
        } else {
            Err(ControllerError::precondition(format!("region {region} is not configured")))
        }
    }

    // ── Operation plumbing ────────────────────────────────────────

    pub(crate) async fn acquire(&self, operation: &str) -> ControllerResult<LockGuard> {
        Ok(self.lock.lock(operation, self.timings.lock_confirm).await?)
    }

    /// Log the plan and give the operator a moment to interrupt.
    pub(crate) async fn pause(&self, plan: &str) {
        info!(pause = ?self.timings.pre_operation_pause, "{plan}");
        tokio::time::sleep(self.timings.pre_operation_pause).await;
    }

    pub(crate) async fn notify(&self, subject: &str, html: &str) {
        if let Err(e) = self.notifier.send_alert(subject, html).await {
            error!(%subject, error = %e, "failed to send alert");
        }
    }

    // ── Provisioning ──────────────────────────────────────────────

    fn launch_request(&self, region: &str, version: &str, instance_type: &str) -> LaunchRequest {
        let mut startup_env = self.launch.env.clone();
        startup_env.insert("DEPLOY_FILE".to_string(), LaunchRequest::deploy_file(version));
        startup_env.insert("DEPLOY_VERSION".to_string(), version.to_string());
        LaunchRequest {
            module: self.module.clone(),
            region: region.to_string(),
            version: version.to_string(),
            instance_type: instance_type.to_string(),
            template: self.launch.template.clone(),
            startup_script: self.launch.startup_script.clone(),
            startup_script_region: self.launch.startup_script_region.clone(),
            startup_env,
        }
    }

    /// Launch `count` nodes and wait for each to run. Nodes that fail to
    /// launch or boot are logged and skipped; an empty result is an error.
    pub(crate) async fn provision(
        &self,
        region: &str,
        version: &str,
        instance_type: &str,
        count: usize,
    ) -> ControllerResult<Vec<NodeDetail>> {
        info!(%region, %version, %instance_type, count, "provisioning nodes");
        let mut fresh = Vec::with_capacity(count);
        for n in 1..=count {
            let request = self.launch_request(region, version, instance_type);
            let launched = match self.compute.launch(&request).await {
                Ok(detail) => detail,
                Err(e) => {
                    error!(%region, node = n, error = %e, "failed to launch node");
                    continue;
                }
            };
            match self
                .compute
                .wait_running(region, &launched.id, self.timings.instance_running)
                .await
            {
                Ok(detail) => {
                    info!(%region, id = %detail.id, ipv4 = ?detail.ipv4, "node running");
                    fresh.push(detail);
                }
                Err(e) => error!(%region, id = %launched.id, error = %e, "node never reached running"),
            }
        }
        if fresh.is_empty() {
            return Err(ControllerError::NothingProvisioned {
                region: region.to_string(),
            });
        }
        if fresh.len() < count {
            warn!(%region, wanted = count, got = fresh.len(), "some nodes failed to provision");
        }
        Ok(fresh)
    }

    /// Wait until every new node answers the health check.
    pub(crate) async fn gate(&self, region: &str, nodes: &[Node]) -> ControllerResult<()> {
        info!(%region, count = nodes.len(), "waiting for new nodes to become healthy");
        self.engine
            .gate(nodes, self.timings.app_ready)
            .await
            .map_err(|e| match e {
                HealthError::GateTimeout { pending, .. } => ControllerError::GateTimeout {
                    region: region.to_string(),
                    pending,
                },
            })
    }

    // ── Addresses ─────────────────────────────────────────────────

    fn address_manager(&self) -> ControllerResult<&Arc<dyn AddressManager>> {
        self.addresses
            .as_ref()
            .ok_or_else(|| ControllerError::precondition("no address manager configured"))
    }

    /// Give each new node a fresh stable address. A node whose allocation
    /// fails keeps its temporary address.
    pub(crate) async fn allocate_addresses(
        &self,
        region: &str,
        version: &str,
        fresh: &[NodeDetail],
    ) -> ControllerResult<Vec<Node>> {
        let addresses = self.address_manager()?;
        let mut nodes = Vec::with_capacity(fresh.len());
        for detail in fresh {
            let node = Node::from(detail);
            let allocated = match addresses.allocate(region, version).await {
                Ok(allocated) => allocated,
                Err(e) => {
                    error!(%region, id = %detail.id, error = %e, "failed to allocate address, keeping temporary one");
                    nodes.push(node);
                    continue;
                }
            };
            match addresses.associate(region, &detail.id, &allocated.handle).await {
                Ok(()) => {
                    info!(%region, id = %detail.id, address = %allocated.address, "address associated");
                    nodes.push(node.with_ipv4(allocated.address));
                }
                Err(e) => {
                    error!(%region, id = %detail.id, error = %e, "failed to associate address, keeping temporary one");
                    nodes.push(node);
                }
            }
        }
        Ok(nodes)
    }

    /// Move each old node's stable address onto the new node at the same
    /// position. Both lists must be the same length.
    pub(crate) async fn reassociate(
        &self,
        region: &str,
        old: &[Node],
        fresh: &[NodeDetail],
    ) -> ControllerResult<Vec<Node>> {
        if old.len() != fresh.len() {
            return Err(ControllerError::AlignmentMismatch {
                region: region.to_string(),
                old: old.len(),
                new: fresh.len(),
            });
        }
        let old_addresses: Vec<Ipv4Addr> = old
            .iter()
            .map(|node| {
                node.ipv4
                    .ok_or_else(|| ControllerError::precondition(format!("node {node} in {region} has no address")))
            })
            .collect::<ControllerResult<_>>()?;

        let addresses = self.address_manager()?;
        let mut moved = Vec::with_capacity(fresh.len());
        for (address, detail) in old_addresses.into_iter().zip(fresh) {
            let handle = addresses.find_handle(region, address).await?;
            addresses.associate(region, &detail.id, &handle).await?;
            info!(%region, %address, id = %detail.id, "address moved to new node");
            moved.push(Node::from(detail).with_ipv4(address));
        }
        Ok(moved)
    }

    /// Point traffic in `region` at `fresh`, replacing what was there.
    /// DNS keeps its record and moves addresses; endpoint groups run the
    /// full staged replacement.
    pub(crate) async fn commit_replacement(&self, region: &str, fresh: &[NodeDetail]) -> ControllerResult<Vec<Node>> {
        let mut committed: Vec<Node> = fresh.iter().map(Node::from).collect();
        if let Some(dns) = &self.dns {
            let old = dns.list_nodes_in_region(region, Detail::Full).await?;
            committed = self.reassociate(region, &old, fresh).await?;
            dns.update_tags(None).await?;
        }
        if let Some(acc) = &self.accelerator {
            let nodes: Vec<Node> = fresh.iter().map(Node::from).collect();
            acc.replace_nodes(region, &nodes).await?;
            acc.update_tags(None).await?;
        }
        Ok(committed)
    }
}
