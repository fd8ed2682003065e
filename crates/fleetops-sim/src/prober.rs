//! Health probes answered from the simulated world.

use std::net::Ipv4Addr;

use async_trait::async_trait;
use fleetops_health::{ProbeResult, Prober};

use crate::provider::SimProvider;

/// Answers healthy for running nodes whose application is up, and as an
/// unreachable host for everything else.
#[derive(Clone)]
pub struct SimProber {
    sim: SimProvider,
}

impl SimProber {
    pub fn new(sim: SimProvider) -> Self {
        Self { sim }
    }
}

#[async_trait]
impl Prober for SimProber {
    async fn probe(&self, address: Ipv4Addr) -> ProbeResult {
        let mut world = self.sim.world.lock().await;
        world.record("probe", address.to_string());
        if world.answers_healthy(address) {
            ProbeResult::Healthy
        } else if world.node_by_address(address).is_some() {
            ProbeResult::Unhealthy
        } else {
            ProbeResult::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn probes_follow_node_health() {
        let sim = SimProvider::in_memory();
        let node = sim.seed_node("api", "us-west-2", "v1", "t4g.small").await;
        let address = node.ipv4.unwrap();
        let prober = SimProber::new(sim.clone());

        assert_eq!(prober.probe(address).await, ProbeResult::Healthy);
        sim.set_node_health("us-west-2", &node.id, false).await.unwrap();
        assert_eq!(prober.probe(address).await, ProbeResult::Unhealthy);
        assert_eq!(prober.probe(Ipv4Addr::new(10, 9, 9, 9)).await, ProbeResult::Failed);
    }
}
