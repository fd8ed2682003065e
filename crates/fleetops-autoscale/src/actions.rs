//! The controller surface the autoscaler drives.

use std::collections::BTreeMap;

use async_trait::async_trait;
use fleetops_controller::FleetController;
use fleetops_core::{Node, Region, TierLadder};

/// Scaling operations and fleet reads used by [`crate::Autoscaler`].
/// Operations return the controller's success message.
#[async_trait]
pub trait ScaleActions: Send + Sync {
    /// Traffic-bound nodes per region.
    async fn fleet_nodes(&self) -> anyhow::Result<BTreeMap<Region, Vec<Node>>>;

    async fn instance_type(&self, region: &str) -> anyhow::Result<String>;

    fn tiers(&self) -> &TierLadder;

    async fn scale_up(&self, region: &str) -> anyhow::Result<String>;

    async fn scale_down(&self, region: &str) -> anyhow::Result<String>;

    async fn scale_in(&self, region: &str, amount: u32) -> anyhow::Result<String>;
}

#[async_trait]
impl ScaleActions for FleetController {
    async fn fleet_nodes(&self) -> anyhow::Result<BTreeMap<Region, Vec<Node>>> {
        Ok(FleetController::fleet_nodes(self).await?)
    }

    async fn instance_type(&self, region: &str) -> anyhow::Result<String> {
        Ok(self.current_instance_type(Some(region)).await?)
    }

    fn tiers(&self) -> &TierLadder {
        FleetController::tiers(self)
    }

    async fn scale_up(&self, region: &str) -> anyhow::Result<String> {
        Ok(FleetController::scale_up(self, region, false).await?.message)
    }

    async fn scale_down(&self, region: &str) -> anyhow::Result<String> {
        Ok(FleetController::scale_down(self, region).await?.message)
    }

    async fn scale_in(&self, region: &str, amount: u32) -> anyhow::Result<String> {
        Ok(FleetController::scale_in(self, region, amount).await?.message)
    }
}
