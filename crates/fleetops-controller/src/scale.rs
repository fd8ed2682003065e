//! Horizontal and vertical scaling of one region.

use fleetops_backend::TrafficBackend;
use fleetops_core::{Node, TierStep};
use rand::seq::index::sample;
use tracing::{error, info, warn};

use crate::controller::{FleetController, MAX_SCALE_AMOUNT};
use crate::error::{ControllerError, ControllerResult};
use crate::phase::{OperationPhase, PhaseTracker};
use crate::report::OperationReport;

fn check_amount(operation: &'static str, amount: u32) -> ControllerResult<()> {
    if (1..=MAX_SCALE_AMOUNT).contains(&amount) {
        Ok(())
    } else {
        Err(ControllerError::InvalidAmount {
            operation,
            amount,
            max: MAX_SCALE_AMOUNT,
        })
    }
}

/// Pick `amount` nodes at random. Returns `(removed, remaining)`.
pub fn split_random(nodes: Vec<Node>, amount: usize) -> (Vec<Node>, Vec<Node>) {
    let amount = amount.min(nodes.len());
    let picked = sample(&mut rand::thread_rng(), nodes.len(), amount).into_vec();
    let mut removed = Vec::with_capacity(amount);
    let mut remaining = Vec::with_capacity(nodes.len() - amount);
    for (idx, node) in nodes.into_iter().enumerate() {
        if picked.contains(&idx) {
            removed.push(node);
        } else {
            remaining.push(node);
        }
    }
    (removed, remaining)
}

impl FleetController {
    // ── Horizontal ────────────────────────────────────────────────

    /// Add `amount` nodes of the current version and instance type.
    pub async fn scale_out(&self, region: &str, amount: u32) -> ControllerResult<OperationReport> {
        check_amount("scale-out", amount)?;
        self.ensure_region(region)?;

        let mut tracker = PhaseTracker::new("scale-out");
        let guard = self.acquire("scale-out").await?;
        tracker.advance(OperationPhase::Locked);
        let nodes = self.scale_out_locked(region, amount, &mut tracker).await?;
        guard.release()?;

        Ok(OperationReport::new(
            "scale-out",
            tracker.finish(),
            format!("added {} node(s) to {region}", nodes.len()),
        )
        .with_nodes(region, nodes))
    }

    async fn scale_out_locked(
        &self,
        region: &str,
        amount: u32,
        tracker: &mut PhaseTracker,
    ) -> ControllerResult<Vec<Node>> {
        check_amount("scale-out", amount)?;
        let version = self.require_version().await?;
        let instance_type = match self.current_instance_type(Some(region)).await {
            Ok(t) => t,
            Err(_) => self.current_instance_type(None).await?,
        };
        self.pause(&format!("scaling out {region} by {amount} node(s) of {instance_type} at {version}"))
            .await;

        tracker.advance(OperationPhase::Provisioning);
        let fresh = self
            .provision(region, &version, &instance_type, amount as usize)
            .await?;
        let mut nodes: Vec<Node> = fresh.iter().map(Node::from).collect();

        tracker.advance(OperationPhase::Gating);
        self.gate(region, &nodes).await?;

        tracker.advance(OperationPhase::TrafficCommit);
        if let Some(dns) = &self.dns {
            nodes = self.allocate_addresses(region, &version, &fresh).await?;
            dns.add_nodes(region, &nodes).await?;
            dns.update_tags(None).await?;
        }
        if let Some(acc) = &self.accelerator {
            let ids: Vec<Node> = fresh.iter().map(Node::from).collect();
            acc.add_nodes(region, &ids).await?;
            acc.update_tags(None).await?;
        }
        info!(%region, added = nodes.len(), "scale out finished");
        Ok(nodes)
    }

    /// Remove `amount` randomly chosen nodes. The region must keep at
    /// least one node. Removed nodes keep running, marked with the time
    /// they left traffic.
    pub async fn scale_in(&self, region: &str, amount: u32) -> ControllerResult<OperationReport> {
        check_amount("scale-in", amount)?;
        self.ensure_region(region)?;

        let nodes = self.region_nodes(region).await?;
        if nodes.len() <= amount as usize {
            return Err(ControllerError::precondition(format!(
                "cannot remove {amount} of {} node(s) in {region}",
                nodes.len()
            )));
        }
        let (removed, remaining) = split_random(nodes, amount as usize);

        let mut tracker = PhaseTracker::new("scale-in");
        let guard = self.acquire("scale-in").await?;
        tracker.advance(OperationPhase::Locked);
        let listed: Vec<String> = removed.iter().map(Node::to_string).collect();
        self.pause(&format!("scaling in {region}, removing {}", listed.join(", ")))
            .await;

        tracker.advance(OperationPhase::TrafficCommit);
        if let Some(dns) = &self.dns {
            dns.replace_nodes(region, &remaining).await?;
            dns.update_tags(None).await?;
        }
        if let Some(acc) = &self.accelerator {
            acc.rewrite_membership(region, &remaining).await?;
            acc.update_tags(None).await?;
        }

        // Clean ages removed nodes from this mark.
        tracker.advance(OperationPhase::Decommission);
        let now = chrono::Utc::now();
        let mut touch_failure = None;
        for node in &removed {
            let Some(id) = node.id() else {
                warn!(%region, %node, "removed node has no id, cannot mark it");
                continue;
            };
            if let Err(e) = self.compute.touch(region, id, now).await {
                error!(%region, %id, error = %e, "failed to mark removed node");
                touch_failure.get_or_insert(e);
            }
        }
        guard.release()?;
        if let Some(e) = touch_failure {
            return Err(e.into());
        }

        info!(%region, removed = removed.len(), remaining = remaining.len(), "scale in finished");
        Ok(OperationReport::new(
            "scale-in",
            tracker.finish(),
            format!("removed {} node(s) from {region}", removed.len()),
        )
        .with_nodes(region, removed))
    }

    // ── Vertical ──────────────────────────────────────────────────

    /// Replace every node in `region` with the next larger tier. At the top
    /// tier this scales out by the current node count instead, capped at
    /// [`MAX_SCALE_AMOUNT`]. `force`
    /// skips the operation lock; monitor uses it to react while another
    /// operation may hold the lock.
    pub async fn scale_up(&self, region: &str, force: bool) -> ControllerResult<OperationReport> {
        self.ensure_region(region)?;
        let version = self.require_version().await?;
        let current = self.region_nodes(region).await?;
        if current.is_empty() {
            return Err(ControllerError::precondition(format!("no nodes in {region} to scale up")));
        }
        let amount = current.len();

        let mut tracker = PhaseTracker::new("scale-up");
        let guard = if force {
            warn!(%region, "scale up forced, skipping operation lock");
            None
        } else {
            let guard = self.acquire("scale-up").await?;
            tracker.advance(OperationPhase::Locked);
            Some(guard)
        };

        let current_type = self.current_instance_type(Some(region)).await.ok();
        let target = match current_type.as_deref().map(|t| self.tiers.larger(t)) {
            Some(TierStep::To(t)) => t,
            Some(TierStep::AtEdge) => {
                let extra = u32::try_from(amount).unwrap_or(u32::MAX).min(MAX_SCALE_AMOUNT);
                info!(%region, extra, "already at the largest tier, scaling out instead");
                let nodes = self.scale_out_locked(region, extra, &mut tracker).await?;
                if let Some(guard) = guard {
                    guard.release()?;
                }
                return Ok(OperationReport::new(
                    "scale-up",
                    tracker.finish(),
                    format!("{region} at the largest tier, added {} node(s)", nodes.len()),
                )
                .with_nodes(region, nodes));
            }
            Some(TierStep::Unknown) | None => self
                .tiers
                .largest()
                .map(str::to_string)
                .ok_or_else(|| ControllerError::precondition("no instance tiers configured"))?,
        };

        let nodes = self
            .replace_region(region, &version, &target, amount, &mut tracker)
            .await?;
        if let Some(guard) = guard {
            guard.release()?;
        }
        Ok(OperationReport::new(
            "scale-up",
            tracker.finish(),
            format!("replaced {amount} node(s) in {region} with {target}"),
        )
        .with_nodes(region, nodes))
    }

    /// Replace every node in `region` with the next smaller tier. At the
    /// smallest tier this scales in by one node instead.
    pub async fn scale_down(&self, region: &str) -> ControllerResult<OperationReport> {
        self.ensure_region(region)?;
        let version = self.require_version().await?;
        let current_type = self.current_instance_type(Some(region)).await?;
        let current = self.region_nodes(region).await?;
        if current.is_empty() {
            return Err(ControllerError::precondition(format!("no nodes in {region} to scale down")));
        }

        let target = match self.tiers.smaller(&current_type) {
            TierStep::To(t) => t,
            TierStep::AtEdge => {
                info!(%region, "already at the smallest tier, scaling in instead");
                return self.scale_in(region, 1).await;
            }
            TierStep::Unknown => {
                return Err(ControllerError::precondition(format!(
                    "instance type {current_type} is not in the tier list"
                )));
            }
        };

        let mut tracker = PhaseTracker::new("scale-down");
        let guard = self.acquire("scale-down").await?;
        tracker.advance(OperationPhase::Locked);
        let amount = current.len();
        let nodes = self
            .replace_region(region, &version, &target, amount, &mut tracker)
            .await?;
        guard.release()?;
        Ok(OperationReport::new(
            "scale-down",
            tracker.finish(),
            format!("replaced {amount} node(s) in {region} with {target}"),
        )
        .with_nodes(region, nodes))
    }

    async fn replace_region(
        &self,
        region: &str,
        version: &str,
        instance_type: &str,
        amount: usize,
        tracker: &mut PhaseTracker,
    ) -> ControllerResult<Vec<Node>> {
        self.pause(&format!("replacing {amount} node(s) in {region} with {instance_type}"))
            .await;

        tracker.advance(OperationPhase::Provisioning);
        let fresh = self.provision(region, version, instance_type, amount).await?;

        tracker.advance(OperationPhase::Gating);
        let nodes: Vec<Node> = fresh.iter().map(Node::from).collect();
        self.gate(region, &nodes).await?;

        tracker.advance(OperationPhase::TrafficCommit);
        let committed = self.commit_replacement(region, &fresh).await?;
        info!(%region, %instance_type, count = committed.len(), "region replaced");
        Ok(committed)
    }
}
