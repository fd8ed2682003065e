//! Contracts for the external collaborators the controller drives.
//!
//! Compute provisioning, public address management, metric queries and
//! alert delivery are not implemented here. Real cloud clients and the
//! simulated provider both implement these traits.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ProviderError, ProviderResult};
use crate::types::{NodeDetail, NodeId, NodeState, PollBudget, Region};

// ── Compute ───────────────────────────────────────────────────────

/// Parameters for launching one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchRequest {
    pub module: String,
    pub region: Region,
    pub version: String,
    pub instance_type: String,
    pub template: Option<String>,
    pub startup_script: Option<String>,
    pub startup_script_region: Option<String>,
    /// Extra environment for the startup script. Always includes
    /// `DEPLOY_FILE={version}.tgz`.
    pub startup_env: HashMap<String, String>,
}

impl LaunchRequest {
    /// Artifact the startup script fetches for `version`.
    pub fn deploy_file(version: &str) -> String {
        format!("{version}.tgz")
    }

    /// Value of the `Name` tag put on launched nodes.
    pub fn node_name(&self) -> String {
        format!("{}-{}", self.module, self.version)
    }
}

#[async_trait]
pub trait ComputeProvisioner: Send + Sync {
    /// Launch one node. The node is tagged with its module, version and
    /// launch time.
    async fn launch(&self, request: &LaunchRequest) -> ProviderResult<NodeDetail>;

    async fn describe(&self, region: &str, id: &str) -> ProviderResult<NodeDetail>;

    /// Describe several nodes. Unknown ids are omitted from the result.
    async fn describe_many(&self, region: &str, ids: &[NodeId]) -> ProviderResult<Vec<NodeDetail>>;

    /// Nodes currently holding any of `addresses`.
    async fn find_by_addresses(
        &self,
        region: &str,
        addresses: &[Ipv4Addr],
    ) -> ProviderResult<Vec<NodeDetail>>;

    async fn terminate(&self, region: &str, ids: &[NodeId]) -> ProviderResult<()>;

    /// Overwrite a node's last-change tag.
    async fn touch(&self, region: &str, id: &str, at: DateTime<Utc>) -> ProviderResult<()>;

    /// Every non-terminated node tagged with `module`.
    async fn list_managed(&self, region: &str, module: &str) -> ProviderResult<Vec<NodeDetail>>;

    /// Poll `describe` until the node is running.
    async fn wait_running(
        &self,
        region: &str,
        id: &str,
        budget: PollBudget,
    ) -> ProviderResult<NodeDetail> {
        for attempt in 1..=budget.max_attempts {
            let detail = self.describe(region, id).await?;
            match detail.state {
                NodeState::Running => return Ok(detail),
                NodeState::Terminated | NodeState::Stopped => {
                    return Err(ProviderError::request(
                        "wait_running",
                        format!("node {id} entered {:?}", detail.state),
                    ));
                }
                NodeState::Pending => {
                    debug!(region, node = id, attempt, "node not running yet");
                    tokio::time::sleep(budget.interval).await;
                }
            }
        }
        Err(ProviderError::Timeout(format!(
            "node {id} in {region} not running after {:?}",
            budget.total()
        )))
    }
}

// ── Addresses ─────────────────────────────────────────────────────

/// A freshly allocated public address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocatedAddress {
    pub address: Ipv4Addr,
    pub handle: String,
}

/// A public address owned by the module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedAddress {
    pub address: Ipv4Addr,
    pub handle: String,
    pub last_change: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait AddressManager: Send + Sync {
    async fn allocate(&self, region: &str, version: &str) -> ProviderResult<AllocatedAddress>;

    async fn associate(&self, region: &str, node_id: &str, handle: &str) -> ProviderResult<()>;

    async fn find_handle(&self, region: &str, address: Ipv4Addr) -> ProviderResult<String>;

    async fn release(&self, region: &str, addresses: &[Ipv4Addr]) -> ProviderResult<()>;

    async fn list_managed(&self, region: &str, module: &str) -> ProviderResult<Vec<ManagedAddress>>;
}

// ── Metrics ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub period: Duration,
}

impl MetricWindow {
    /// Window covering `periods` periods ending at `end`.
    pub fn trailing(end: DateTime<Utc>, period: Duration, periods: u32) -> Self {
        let span = chrono::Duration::from_std(period * periods).unwrap_or(chrono::Duration::zero());
        Self {
            start: end - span,
            end,
            period,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Datapoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

#[async_trait]
pub trait MetricSource: Send + Sync {
    /// CPU utilization datapoints for one node. Ordering is unspecified.
    async fn query(
        &self,
        region: &str,
        node_id: &str,
        window: MetricWindow,
    ) -> ProviderResult<Vec<Datapoint>>;
}

// ── Notification ──────────────────────────────────────────────────

/// Alert delivery. Callers log failures and move on.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_alert(&self, subject: &str, html: &str) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct SlowBoot {
        polls: Mutex<u32>,
        ready_after: u32,
    }

    fn detail(state: NodeState) -> NodeDetail {
        NodeDetail {
            id: "i-1".into(),
            region: "us-west-2".into(),
            ipv4: None,
            ipv6: None,
            instance_type: "t4g.small".into(),
            version: "v1".into(),
            state,
            last_change: None,
        }
    }

    #[async_trait]
    impl ComputeProvisioner for SlowBoot {
        async fn launch(&self, _request: &LaunchRequest) -> ProviderResult<NodeDetail> {
            Ok(detail(NodeState::Pending))
        }

        async fn describe(&self, _region: &str, _id: &str) -> ProviderResult<NodeDetail> {
            let mut polls = self.polls.lock().unwrap();
            *polls += 1;
            if *polls >= self.ready_after {
                Ok(detail(NodeState::Running))
            } else {
                Ok(detail(NodeState::Pending))
            }
        }

        async fn describe_many(
            &self,
            _region: &str,
            _ids: &[NodeId],
        ) -> ProviderResult<Vec<NodeDetail>> {
            Ok(vec![])
        }

        async fn find_by_addresses(
            &self,
            _region: &str,
            _addresses: &[Ipv4Addr],
        ) -> ProviderResult<Vec<NodeDetail>> {
            Ok(vec![])
        }

        async fn terminate(&self, _region: &str, _ids: &[NodeId]) -> ProviderResult<()> {
            Ok(())
        }

        async fn touch(&self, _region: &str, _id: &str, _at: DateTime<Utc>) -> ProviderResult<()> {
            Ok(())
        }

        async fn list_managed(&self, _region: &str, _module: &str) -> ProviderResult<Vec<NodeDetail>> {
            Ok(vec![])
        }
    }

    #[tokio::test(start_paused = true)]
    async fn wait_running_polls_until_running() {
        let compute = SlowBoot {
            polls: Mutex::new(0),
            ready_after: 3,
        };
        let budget = PollBudget::new(Duration::from_secs(1), 5);
        let node = compute.wait_running("us-west-2", "i-1", budget).await.unwrap();
        assert_eq!(node.state, NodeState::Running);
        assert_eq!(*compute.polls.lock().unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_running_times_out() {
        let compute = SlowBoot {
            polls: Mutex::new(0),
            ready_after: 100,
        };
        let budget = PollBudget::new(Duration::from_secs(1), 4);
        let err = compute.wait_running("us-west-2", "i-1", budget).await.unwrap_err();
        assert!(matches!(err, ProviderError::Timeout(_)));
    }

    #[test]
    fn launch_request_naming() {
        assert_eq!(LaunchRequest::deploy_file("v2"), "v2.tgz");
    }
}
