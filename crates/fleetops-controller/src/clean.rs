//! Reclaim stable addresses and nodes that no backend uses any more.

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use fleetops_backend::Detail;
use fleetops_core::{Node, NodeId, NodeState};
use tracing::{error, info, warn};

use crate::controller::FleetController;
use crate::error::ControllerResult;
use crate::phase::{OperationPhase, PhaseTracker};
use crate::report::OperationReport;

/// Resources younger than this are never reclaimed.
pub const DEFAULT_MIN_ALIVE: Duration = Duration::from_secs(40 * 60);

#[derive(Debug, Clone)]
pub struct CleanOptions {
    pub min_alive: Duration,
    pub except_addresses: Vec<Ipv4Addr>,
    pub except_node_ids: Vec<NodeId>,
}

impl Default for CleanOptions {
    fn default() -> Self {
        Self {
            min_alive: DEFAULT_MIN_ALIVE,
            except_addresses: Vec::new(),
            except_node_ids: Vec::new(),
        }
    }
}

/// Whether a resource last changed at `last_change` is old enough to go.
/// Resources without a last-change mark are kept.
pub fn reclaimable(last_change: Option<DateTime<Utc>>, now: DateTime<Utc>, min_alive: Duration) -> bool {
    let Some(changed) = last_change else {
        return false;
    };
    let Ok(min_alive) = chrono::Duration::from_std(min_alive) else {
        return false;
    };
    now - changed > min_alive
}

#[derive(Default)]
struct Reserved {
    ids: HashSet<NodeId>,
    addresses: HashSet<Ipv4Addr>,
}

impl FleetController {
    pub async fn clean(&self, options: CleanOptions) -> ControllerResult<OperationReport> {
        let mut tracker = PhaseTracker::new("clean");
        let guard = self.acquire("clean").await?;
        tracker.advance(OperationPhase::Locked);
        self.pause(&format!(
            "cleaning resources of {} unused for more than {:?}",
            self.module, options.min_alive
        ))
        .await;

        tracker.advance(OperationPhase::Decommission);
        let now = Utc::now();
        let mut released = 0;
        let mut terminated = 0;
        let mut skipped = Vec::new();
        for region in &self.regions {
            let Some(reserved) = self.reserved(region).await else {
                skipped.push(region.clone());
                continue;
            };
            released += self.release_addresses(region, &reserved, &options, now).await;
            terminated += self.terminate_nodes(region, &reserved, &options, now).await;
        }
        guard.release()?;

        let mut message = format!("released {released} address(es), terminated {terminated} node(s)");
        if !skipped.is_empty() {
            message.push_str(&format!(", skipped {}", skipped.join(", ")));
        }
        info!(released, terminated, "clean finished");
        Ok(OperationReport::new("clean", tracker.finish(), message))
    }

    /// Everything any backend still routes to in `region`. `None` when a
    /// backend cannot be read, since reclaiming blind could kill live nodes.
    async fn reserved(&self, region: &str) -> Option<Reserved> {
        let mut per_backend = Vec::new();
        for backend in self.backends() {
            match backend.list_nodes_in_region(region, Detail::Full).await {
                Ok(nodes) => per_backend.push((backend.kind(), nodes)),
                Err(e) => {
                    error!(%region, backend = %backend.kind(), error = %e, "cannot read reserved nodes, skipping region");
                    return None;
                }
            }
        }

        if let [(first_kind, first), (second_kind, second)] = per_backend.as_slice() {
            let ids = |nodes: &[Node]| nodes.iter().filter_map(|n| n.id.clone()).collect::<HashSet<_>>();
            let ips = |nodes: &[Node]| nodes.iter().filter_map(|n| n.ipv4).collect::<HashSet<_>>();
            if ids(first) != ids(second) || ips(first) != ips(second) {
                error!(%region, first = %first_kind, second = %second_kind, "backends disagree on the node set");
            }
        }

        let mut reserved = Reserved::default();
        for (_, nodes) in per_backend {
            for node in nodes {
                reserved.ids.extend(node.id);
                reserved.addresses.extend(node.ipv4);
            }
        }
        Some(reserved)
    }

    async fn release_addresses(
        &self,
        region: &str,
        reserved: &Reserved,
        options: &CleanOptions,
        now: DateTime<Utc>,
    ) -> usize {
        let Some(addresses) = &self.addresses else {
            return 0;
        };
        let managed = match addresses.list_managed(region, &self.module).await {
            Ok(managed) => managed,
            Err(e) => {
                error!(%region, error = %e, "failed to list managed addresses");
                return 0;
            }
        };
        let doomed: Vec<Ipv4Addr> = managed
            .iter()
            .filter(|a| !reserved.addresses.contains(&a.address))
            .filter(|a| !options.except_addresses.contains(&a.address))
            .filter(|a| reclaimable(a.last_change, now, options.min_alive))
            .map(|a| a.address)
            .collect();
        if doomed.is_empty() {
            return 0;
        }
        match addresses.release(region, &doomed).await {
            Ok(()) => {
                for address in &doomed {
                    info!(%region, %address, "address released");
                }
                doomed.len()
            }
            Err(e) => {
                error!(%region, error = %e, "failed to release addresses");
                0
            }
        }
    }

    async fn terminate_nodes(
        &self,
        region: &str,
        reserved: &Reserved,
        options: &CleanOptions,
        now: DateTime<Utc>,
    ) -> usize {
        let managed = match self.compute.list_managed(region, &self.module).await {
            Ok(managed) => managed,
            Err(e) => {
                error!(%region, error = %e, "failed to list managed nodes");
                return 0;
            }
        };
        let doomed: Vec<NodeId> = managed
            .iter()
            .filter(|n| matches!(n.state, NodeState::Running | NodeState::Stopped))
            .filter(|n| !reserved.ids.contains(&n.id))
            .filter(|n| !options.except_node_ids.contains(&n.id))
            .filter(|n| reclaimable(n.last_change, now, options.min_alive))
            .map(|n| n.id.clone())
            .collect();
        if doomed.is_empty() {
            return 0;
        }
        match self.compute.terminate(region, &doomed).await {
            Ok(()) => {
                warn!(%region, nodes = %doomed.join(","), "nodes terminated");
                doomed.len()
            }
            Err(e) => {
                error!(%region, error = %e, "failed to terminate nodes");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unmarked_resources_are_kept() {
        assert!(!reclaimable(None, Utc::now(), DEFAULT_MIN_ALIVE));
    }

    #[test]
    fn age_must_exceed_min_alive() {
        let now = Utc::now();
        let min = Duration::from_secs(600);
        assert!(!reclaimable(Some(now - chrono::Duration::seconds(600)), now, min));
        assert!(reclaimable(Some(now - chrono::Duration::seconds(601)), now, min));
        assert!(!reclaimable(Some(now), now, min));
    }
}
