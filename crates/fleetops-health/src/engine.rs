//! HealthProbeEngine — concurrent rounds of probes over a node set.
//!
//! Each round spawns one probe task per still-active node and joins them
//! all before deciding anything. Rounds are paced to the configured
//! interval regardless of how long the probes took.

use std::sync::Arc;
use std::time::Duration;

use fleetops_core::{MonitorSettings, Node, PollBudget};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::checker::{HealthStatus, HealthTracker, ProbeResult, Prober};
use crate::error::{HealthError, HealthResult};

/// What a monitoring session observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorOutcome {
    /// Rounds actually run.
    pub rounds: u32,
    /// Nodes that crossed the failure threshold. Empty when the fleet
    /// stayed healthy.
    pub unhealthy: Vec<Node>,
}

#[derive(Clone)]
pub struct HealthProbeEngine {
    prober: Arc<dyn Prober>,
}

impl HealthProbeEngine {
    pub fn new(prober: Arc<dyn Prober>) -> Self {
        Self { prober }
    }

    /// Probe `nodes` for up to `max_rounds` rounds. The session ends after
    /// the first round in which any node reaches `fail_threshold`.
    pub async fn monitor(&self, region: &str, nodes: &[Node], settings: &MonitorSettings) -> MonitorOutcome {
        let mut trackers: Vec<HealthTracker> = nodes
            .iter()
            .map(|_| HealthTracker::new(settings.fail_threshold))
            .collect();
        let mut rounds = 0;

        while rounds < settings.max_rounds {
            rounds += 1;
            let started = Instant::now();

            let active: Vec<usize> = (0..nodes.len()).filter(|&i| !trackers[i].is_unhealthy()).collect();
            for (idx, result) in self.probe_round(nodes, &active).await {
                trackers[idx].record(result);
            }

            let unhealthy: Vec<Node> = nodes
                .iter()
                .zip(&trackers)
                .filter(|(_, t)| t.is_unhealthy())
                .map(|(n, _)| n.clone())
                .collect();
            if !unhealthy.is_empty() {
                warn!(%region, round = rounds, count = unhealthy.len(), "nodes crossed failure threshold");
                return MonitorOutcome { rounds, unhealthy };
            }
            debug!(%region, round = rounds, nodes = nodes.len(), "monitor round passed");

            if rounds < settings.max_rounds {
                let elapsed = started.elapsed();
                tokio::time::sleep(settings.interval.saturating_sub(elapsed)).await;
            }
        }

        info!(%region, rounds, "all nodes healthy");
        MonitorOutcome {
            rounds,
            unhealthy: Vec::new(),
        }
    }

    /// Probe until every node has answered healthy once, within `budget`.
    pub async fn gate(&self, nodes: &[Node], budget: PollBudget) -> HealthResult<()> {
        let mut trackers: Vec<HealthTracker> = nodes.iter().map(|_| HealthTracker::new(u32::MAX)).collect();

        for attempt in 1..=budget.max_attempts {
            let started = Instant::now();
            let pending: Vec<usize> = (0..nodes.len())
                .filter(|&i| trackers[i].status() != HealthStatus::Healthy)
                .collect();
            if pending.is_empty() {
                break;
            }

            for (idx, result) in self.probe_round(nodes, &pending).await {
                trackers[idx].record(result);
            }

            let remaining = trackers.iter().filter(|t| t.status() != HealthStatus::Healthy).count();
            if remaining == 0 {
                info!(attempt, nodes = nodes.len(), "all new nodes healthy");
                return Ok(());
            }
            debug!(attempt, remaining, "waiting for new nodes to become healthy");
            if attempt < budget.max_attempts {
                tokio::time::sleep(budget.interval.saturating_sub(started.elapsed())).await;
            }
        }

        let pending: Vec<Node> = nodes
            .iter()
            .zip(&trackers)
            .filter(|(_, t)| t.status() != HealthStatus::Healthy)
            .map(|(n, _)| n.clone())
            .collect();
        if pending.is_empty() {
            return Ok(());
        }
        error!(count = pending.len(), "new nodes never became healthy");
        Err(HealthError::GateTimeout {
            attempts: budget.max_attempts,
            pending,
        })
    }

    /// One concurrent probe per selected node. Nodes without a public
    /// address cannot be reached and count as failed.
    async fn probe_round(&self, nodes: &[Node], selected: &[usize]) -> Vec<(usize, ProbeResult)> {
        let mut tasks = JoinSet::new();
        let mut results = Vec::with_capacity(selected.len());

        for &idx in selected {
            let Some(address) = nodes[idx].ipv4 else {
                warn!(node = %nodes[idx], "node has no public address to probe");
                results.push((idx, ProbeResult::Failed));
                continue;
            };
            let prober = Arc::clone(&self.prober);
            tasks.spawn(async move { (idx, prober.probe(address).await) });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => error!(error = %e, "probe task panicked"),
            }
        }
        results
    }
}

/// Shortest interval accepted for monitoring sessions.
pub const MIN_MONITOR_INTERVAL: Duration = Duration::from_secs(10);

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::net::Ipv4Addr;
    use std::sync::Mutex;

    /// Scripted prober: each address answers from its queue, then repeats
    /// the last answer.
    #[derive(Default)]
    struct Scripted {
        answers: Mutex<HashMap<Ipv4Addr, Vec<ProbeResult>>>,
        calls: Mutex<Vec<Ipv4Addr>>,
    }

    impl Scripted {
        fn answer(self, address: Ipv4Addr, results: &[ProbeResult]) -> Self {
            self.answers.lock().unwrap().insert(address, results.to_vec());
            self
        }

        fn calls_for(&self, address: Ipv4Addr) -> usize {
            self.calls.lock().unwrap().iter().filter(|a| **a == address).count()
        }
    }

    #[async_trait]
    impl Prober for Scripted {
        async fn probe(&self, address: Ipv4Addr) -> ProbeResult {
            self.calls.lock().unwrap().push(address);
            let mut answers = self.answers.lock().unwrap();
            let queue = answers.entry(address).or_default();
            match queue.len() {
                0 => ProbeResult::Healthy,
                1 => queue[0],
                _ => queue.remove(0),
            }
        }
    }

    fn ip(n: u8) -> Ipv4Addr {
        Ipv4Addr::new(10, 0, 0, n)
    }

    fn node(n: u8) -> Node {
        Node::from_id(format!("i-{n}")).with_ipv4(ip(n))
    }

    fn settings(fail_threshold: u32, max_rounds: u32) -> MonitorSettings {
        MonitorSettings {
            interval: Duration::from_secs(10),
            fail_threshold,
            max_rounds,
            probe_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(3),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn single_failing_node_stops_after_first_round() {
        let prober = Arc::new(Scripted::default().answer(ip(1), &[ProbeResult::Failed]));
        let engine = HealthProbeEngine::new(prober.clone());

        let outcome = engine.monitor("us-west-2", &[node(1)], &settings(1, 10)).await;
        assert_eq!(outcome.rounds, 1);
        assert_eq!(outcome.unhealthy, vec![node(1)]);
        assert_eq!(prober.calls_for(ip(1)), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_once_threshold_reached() {
        let prober = Arc::new(Scripted::default().answer(ip(2), &[ProbeResult::Unhealthy]));
        let engine = HealthProbeEngine::new(prober.clone());

        let outcome = engine
            .monitor("us-west-2", &[node(1), node(2)], &settings(3, 10))
            .await;
        assert_eq!(outcome.rounds, 3);
        assert_eq!(outcome.unhealthy, vec![node(2)]);
        // The healthy node was still probed in the final round.
        assert_eq!(prober.calls_for(ip(1)), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn healthy_fleet_runs_every_round() {
        let prober = Arc::new(Scripted::default());
        let engine = HealthProbeEngine::new(prober.clone());

        let started = Instant::now();
        let outcome = engine
            .monitor("us-west-2", &[node(1), node(2)], &settings(2, 4))
            .await;
        assert_eq!(outcome.rounds, 4);
        assert!(outcome.unhealthy.is_empty());
        // Three pauses between four rounds.
        assert_eq!(started.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn gate_waits_for_slow_nodes() {
        let prober = Arc::new(Scripted::default().answer(
            ip(2),
            &[ProbeResult::Failed, ProbeResult::Failed, ProbeResult::Healthy],
        ));
        let engine = HealthProbeEngine::new(prober.clone());

        engine
            .gate(&[node(1), node(2)], PollBudget::new(Duration::from_secs(5), 30))
            .await
            .unwrap();
        // Healthy nodes are not re-probed.
        assert_eq!(prober.calls_for(ip(1)), 1);
        assert_eq!(prober.calls_for(ip(2)), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gate_fails_when_budget_runs_out() {
        let prober = Arc::new(Scripted::default().answer(ip(1), &[ProbeResult::Unhealthy]));
        let engine = HealthProbeEngine::new(prober);

        let err = engine
            .gate(&[node(1), node(2)], PollBudget::new(Duration::from_secs(5), 4))
            .await
            .unwrap_err();
        match err {
            HealthError::GateTimeout { attempts, pending } => {
                assert_eq!(attempts, 4);
                assert_eq!(pending, vec![node(1)]);
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn addressless_node_fails_gate() {
        let engine = HealthProbeEngine::new(Arc::new(Scripted::default()));
        let err = engine
            .gate(&[Node::from_id("i-9")], PollBudget::new(Duration::from_secs(1), 2))
            .await;
        assert!(err.is_err());
    }
}
