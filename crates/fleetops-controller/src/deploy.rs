//! Blue/green deploy of a new version across every region.
//!
//! New nodes are provisioned and gated in every region before any traffic
//! moves. Endpoint groups are committed in two passes (stage and enable
//! everywhere, then one propagation wait, then old members dropped) so a
//! multi-region deploy pays the propagation delay once. Old nodes are left
//! running; `clean` reclaims them later.

use fleetops_backend::{Detail, TrafficBackend};
use fleetops_core::{Node, NodeDetail, Region};
use tracing::info;

use crate::controller::FleetController;
use crate::error::{ControllerError, ControllerResult};
use crate::phase::{OperationPhase, PhaseTracker};
use crate::report::OperationReport;

#[derive(Debug, Clone, Default)]
pub struct DeployOptions {
    /// Give DNS nodes fresh stable addresses instead of moving the old ones.
    pub allocate_new_addresses: bool,
    /// Deploy only this region.
    pub region: Option<Region>,
    /// Instance type for new nodes; defaults to the fleet's current type.
    pub instance_type: Option<String>,
}

struct RegionPlan {
    region: Region,
    fresh: Vec<NodeDetail>,
}

impl RegionPlan {
    fn nodes(&self) -> Vec<Node> {
        self.fresh.iter().map(Node::from).collect()
    }
}

impl FleetController {
    pub async fn deploy(&self, version: &str, options: DeployOptions) -> ControllerResult<OperationReport> {
        if version.trim().is_empty() {
            return Err(ControllerError::precondition("version must not be empty"));
        }
        let targets: Vec<Region> = match &options.region {
            Some(region) => {
                self.ensure_region(region)?;
                vec![region.clone()]
            }
            None => self.regions.clone(),
        };

        let mut tracker = PhaseTracker::new("deploy");
        let guard = self.acquire("deploy").await?;
        tracker.advance(OperationPhase::Locked);

        let previous = self.current_version().await;
        let instance_type = match &options.instance_type {
            Some(t) => t.clone(),
            None => self.current_instance_type(None).await?,
        };
        self.pause(&format!(
            "deploying {version} (was {}) as {instance_type} to {}",
            previous.as_deref().unwrap_or("unknown"),
            targets.join(", ")
        ))
        .await;

        tracker.advance(OperationPhase::Provisioning);
        let mut plans = Vec::with_capacity(targets.len());
        for region in targets {
            let count = self.region_nodes(&region).await?.len().max(1);
            let fresh = self.provision(&region, version, &instance_type, count).await?;
            plans.push(RegionPlan { region, fresh });
        }

        tracker.advance(OperationPhase::Gating);
        for plan in &plans {
            self.gate(&plan.region, &plan.nodes()).await?;
        }

        tracker.advance(OperationPhase::TrafficCommit);
        let mut report_nodes = Vec::with_capacity(plans.len());
        for plan in &plans {
            let nodes = self.commit_dns(version, plan, options.allocate_new_addresses).await?;
            report_nodes.push((plan.region.clone(), nodes));
        }
        if let Some(acc) = &self.accelerator {
            for plan in &plans {
                acc.stage_nodes(&plan.region, &plan.nodes()).await?;
            }
            for plan in &plans {
                acc.await_healthy(&plan.region, &plan.nodes()).await?;
                acc.enable_nodes(&plan.region, &plan.nodes()).await?;
            }
        }

        tracker.advance(OperationPhase::Decommission);
        if let Some(acc) = &self.accelerator {
            acc.await_propagation().await?;
            for plan in &plans {
                acc.retain_only(&plan.region, &plan.nodes()).await?;
            }
        }
        for backend in self.backends() {
            backend.update_tags(Some(version)).await?;
        }

        guard.release()?;
        let phase = tracker.finish();
        info!(%version, regions = plans.len(), "deploy finished");
        let mut report = OperationReport::new(
            "deploy",
            phase,
            format!("deployed {version} to {} region(s)", plans.len()),
        );
        for (region, nodes) in report_nodes {
            report = report.with_nodes(&region, nodes);
        }
        Ok(report)
    }

    /// DNS half of the commit for one region. Returns the new nodes with
    /// the addresses they serve on.
    async fn commit_dns(&self, version: &str, plan: &RegionPlan, allocate_new: bool) -> ControllerResult<Vec<Node>> {
        let Some(dns) = &self.dns else {
            return Ok(plan.nodes());
        };
        let old = dns.list_nodes_in_region(&plan.region, Detail::Full).await?;
        if allocate_new || old.is_empty() {
            let nodes = self.allocate_addresses(&plan.region, version, &plan.fresh).await?;
            dns.replace_nodes(&plan.region, &nodes).await?;
            Ok(nodes)
        } else {
            self.reassociate(&plan.region, &old, &plan.fresh).await
        }
    }
}
