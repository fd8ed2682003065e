//! Health monitoring with automatic scale-up of unhealthy regions.

use std::time::Duration;

use fleetops_health::MIN_MONITOR_INTERVAL;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::controller::FleetController;
use crate::error::{ControllerError, ControllerResult};
use crate::notify::paragraphs;
use crate::phase::OperationPhase;
use crate::report::OperationReport;

impl FleetController {
    /// One monitoring pass over every region. Regions where a node crosses
    /// the failure threshold are force-scaled up and an alert goes out
    /// either way.
    pub async fn monitor_once(&self) -> ControllerResult<OperationReport> {
        if self.monitor.interval < MIN_MONITOR_INTERVAL {
            return Err(ControllerError::precondition(format!(
                "monitor interval {:?} is below the minimum of {:?}",
                self.monitor.interval, MIN_MONITOR_INTERVAL
            )));
        }
        let fleet = self.fleet_nodes().await?;
        if fleet.is_empty() {
            return Err(ControllerError::precondition("no nodes to monitor"));
        }

        let mut report = OperationReport::new("monitor", OperationPhase::Idle, String::new());
        let mut scaled = Vec::new();
        for (region, nodes) in &fleet {
            if nodes.is_empty() {
                continue;
            }
            info!(%region, nodes = nodes.len(), "monitoring region");
            let outcome = self.engine.monitor(region, nodes, &self.monitor).await;
            if outcome.unhealthy.is_empty() {
                continue;
            }

            let mut lines: Vec<String> = outcome
                .unhealthy
                .iter()
                .map(|node| format!("Unhealthy node {node} in {region}"))
                .collect();
            let subject = match self.scale_up(region, true).await {
                Ok(scaled_up) => {
                    lines.push(scaled_up.message);
                    scaled.push(region.clone());
                    "Unhealthy nodes, scale up succeeded"
                }
                Err(e) => {
                    error!(%region, error = %e, "scale up after failed health checks failed");
                    lines.push(e.to_string());
                    "Unhealthy nodes, scale up failed"
                }
            };
            self.notify(subject, &paragraphs(&lines)).await;
            report = report.with_nodes(region, outcome.unhealthy);
        }

        report.message = if report.nodes.is_empty() {
            format!("{} region(s) healthy", fleet.len())
        } else {
            format!(
                "{} unhealthy node(s), scaled up {}",
                report.node_count(),
                if scaled.is_empty() { "nothing".to_string() } else { scaled.join(", ") }
            )
        };
        Ok(report)
    }

    /// Repeat monitoring passes until `shutdown` flips. A pass in progress
    /// is allowed to finish.
    pub async fn run_monitor(&self, mut shutdown: watch::Receiver<bool>) {
        let mut tick = tokio::time::interval(self.monitor.interval.max(Duration::from_secs(1)));
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval = ?self.monitor.interval, "continuous monitoring started");

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    match self.monitor_once().await {
                        Ok(report) => info!(message = %report.message, "monitor pass finished"),
                        Err(e) => warn!(error = %e, "monitor pass failed"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("monitor shutting down");
                    break;
                }
            }
        }
    }
}
