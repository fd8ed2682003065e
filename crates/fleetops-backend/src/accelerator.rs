//! Weighted endpoint-group strategy.
//!
//! Each configured accelerator has one endpoint group per region under its
//! first listener. New nodes enter a group at weight 0, wait until the
//! accelerator reports them healthy, and only then get the enabled weight.
//! A replacement finally drops every member that is not a candidate.
//!
//! Reads (version, membership) go to the first accelerator; writes go to
//! all of them.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleetops_core::tags;
use fleetops_core::{ComputeProvisioner, HealthCheckUrl, Node, PollBudget, Region};
use tracing::{debug, error, info, warn};

use crate::backend::{BackendKind, Detail, TrafficBackend};
use crate::error::{BackendError, BackendResult};
use crate::provider::{
    AcceleratorApi, AcceleratorStatus, CreateEndpointGroup, EndpointConfiguration, EndpointGroup,
    EndpointHealth, GroupHealthCheck,
};

/// Weight of an endpoint that receives traffic.
pub const ENABLED_WEIGHT: u8 = 128;

const GROUP_CHECK_INTERVAL_SECS: u32 = 10;
const GROUP_THRESHOLD_COUNT: u32 = 2;

/// Polling budgets for the accelerator's own health and propagation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointGroupSettings {
    pub health: PollBudget,
    pub propagation: PollBudget,
}

pub struct EndpointGroupBackend {
    api: Arc<dyn AcceleratorApi>,
    compute: Arc<dyn ComputeProvisioner>,
    module: String,
    arns: Vec<String>,
    health_check: GroupHealthCheck,
    settings: EndpointGroupSettings,
}

impl EndpointGroupBackend {
    pub fn new(
        api: Arc<dyn AcceleratorApi>,
        compute: Arc<dyn ComputeProvisioner>,
        module: impl Into<String>,
        arns: Vec<String>,
        check: &HealthCheckUrl,
        settings: EndpointGroupSettings,
    ) -> Self {
        Self {
            api,
            compute,
            module: module.into(),
            arns,
            health_check: group_health_check(check),
            settings,
        }
    }

    pub fn arns(&self) -> &[String] {
        &self.arns
    }

    // ── Replacement phases ────────────────────────────────────────
    //
    // `replace_nodes` runs these in order for one region. A multi-region
    // deploy runs staging and health for every region first and commits
    // afterwards, so the accelerator propagates once.

    /// Add candidates at weight 0, creating the region's group if needed.
    pub async fn stage_nodes(&self, region: &str, nodes: &[Node]) -> BackendResult<()> {
        let ids = candidate_ids(nodes)?;
        let staged: Vec<EndpointConfiguration> = ids
            .iter()
            .map(|id| EndpointConfiguration {
                endpoint_id: id.clone(),
                weight: 0,
                client_ip_preservation: true,
            })
            .collect();

        for arn in &self.arns {
            let listener = self.first_listener(arn).await?;
            match self.find_group(&listener, region).await? {
                None => {
                    info!(%region, accelerator = %arn, "no endpoint group, creating one");
                    self.api
                        .create_endpoint_group(CreateEndpointGroup {
                            listener_arn: &listener,
                            region,
                            endpoints: &staged,
                            health_check: &self.health_check,
                            idempotency_token: format!("{region}{listener}"),
                        })
                        .await
                        .inspect_err(|e| error!(%region, error = %e, "failed to create endpoint group"))?;
                }
                Some(group) => {
                    let mut endpoints: Vec<EndpointConfiguration> =
                        group.endpoints.iter().map(EndpointConfiguration::from).collect();
                    for conf in &staged {
                        if !endpoints.iter().any(|e| e.endpoint_id == conf.endpoint_id) {
                            endpoints.push(conf.clone());
                        }
                    }
                    self.api
                        .update_endpoint_group(&group.arn, &endpoints)
                        .await
                        .inspect_err(|e| error!(%region, error = %e, "failed to stage endpoints"))?;
                }
            }
            info!(%region, accelerator = %arn, nodes = %ids.join(","), "endpoints staged at weight 0");
        }
        Ok(())
    }

    /// Poll until the accelerator reports every candidate healthy.
    pub async fn await_healthy(&self, region: &str, nodes: &[Node]) -> BackendResult<()> {
        let ids = candidate_ids(nodes)?;
        for arn in &self.arns {
            let listener = self.first_listener(arn).await?;
            self.await_healthy_on(&listener, region, &ids).await?;
        }
        Ok(())
    }

    async fn await_healthy_on(&self, listener: &str, region: &str, ids: &[String]) -> BackendResult<()> {
        let budget = self.settings.health;
        let mut pending = ids.to_vec();
        for attempt in 1..=budget.max_attempts {
            let group = self.require_group(listener, region).await?;
            pending.retain(|id| {
                !group
                    .endpoints
                    .iter()
                    .any(|ep| &ep.endpoint_id == id && ep.health == EndpointHealth::Healthy)
            });
            if pending.is_empty() {
                info!(%region, attempt, "endpoints healthy");
                return Ok(());
            }
            debug!(%region, attempt, pending = pending.len(), "waiting for endpoints");
            tokio::time::sleep(budget.interval).await;
        }
        error!(%region, pending = %pending.join(","), "endpoints never became healthy");
        Err(BackendError::HealthTimeout {
            region: region.to_string(),
            attempts: budget.max_attempts,
            pending,
        })
    }

    /// Give candidates the enabled weight; other members keep theirs.
    pub async fn enable_nodes(&self, region: &str, nodes: &[Node]) -> BackendResult<()> {
        let ids = candidate_ids(nodes)?;
        for arn in &self.arns {
            let listener = self.first_listener(arn).await?;
            let group = self.require_group(&listener, region).await?;
            let endpoints: Vec<EndpointConfiguration> = group
                .endpoints
                .iter()
                .map(|ep| {
                    let mut conf = EndpointConfiguration::from(ep);
                    if ids.contains(&ep.endpoint_id) {
                        conf.weight = ENABLED_WEIGHT;
                    }
                    conf
                })
                .collect();
            self.api.update_endpoint_group(&group.arn, &endpoints).await?;
            info!(%region, accelerator = %arn, "endpoints enabled");
        }
        Ok(())
    }

    /// Poll every accelerator until its status is deployed.
    pub async fn await_propagation(&self) -> BackendResult<()> {
        let budget = self.settings.propagation;
        'accelerators: for arn in &self.arns {
            for attempt in 1..=budget.max_attempts {
                tokio::time::sleep(budget.interval).await;
                if self.api.accelerator_status(arn).await? == AcceleratorStatus::Deployed {
                    info!(accelerator = %arn, attempt, "accelerator deployed");
                    continue 'accelerators;
                }
            }
            error!(accelerator = %arn, "accelerator did not finish deploying");
            return Err(BackendError::PropagationTimeout {
                arn: arn.clone(),
                attempts: budget.max_attempts,
            });
        }
        Ok(())
    }

    /// Drop every member that is not a candidate.
    pub async fn retain_only(&self, region: &str, nodes: &[Node]) -> BackendResult<()> {
        let ids = candidate_ids(nodes)?;
        for arn in &self.arns {
            let listener = self.first_listener(arn).await?;
            let group = self.require_group(&listener, region).await?;
            let endpoints: Vec<EndpointConfiguration> = group
                .endpoints
                .iter()
                .filter(|ep| ids.contains(&ep.endpoint_id))
                .map(EndpointConfiguration::from)
                .collect();
            self.api.update_endpoint_group(&group.arn, &endpoints).await?;
            info!(%region, accelerator = %arn, kept = endpoints.len(), "old endpoints removed");
        }
        Ok(())
    }

    /// Set the group to exactly `nodes` at the enabled weight, with no
    /// staging or health wait. Used when shrinking.
    pub async fn rewrite_membership(&self, region: &str, nodes: &[Node]) -> BackendResult<()> {
        let ids = candidate_ids(nodes)?;
        let endpoints: Vec<EndpointConfiguration> = ids
            .iter()
            .map(|id| EndpointConfiguration {
                endpoint_id: id.clone(),
                weight: ENABLED_WEIGHT,
                client_ip_preservation: true,
            })
            .collect();
        for arn in &self.arns {
            let listener = self.first_listener(arn).await?;
            let group = self.require_group(&listener, region).await?;
            self.api.update_endpoint_group(&group.arn, &endpoints).await?;
            info!(%region, accelerator = %arn, nodes = %ids.join(","), "endpoint group rewritten");
        }
        Ok(())
    }

    // ── Lookups ───────────────────────────────────────────────────

    fn representative_arn(&self) -> BackendResult<&str> {
        self.arns
            .first()
            .map(String::as_str)
            .ok_or(BackendError::NoResources(BackendKind::EndpointGroup))
    }

    async fn first_listener(&self, arn: &str) -> BackendResult<String> {
        let listeners = self
            .api
            .list_listeners(arn)
            .await
            .inspect_err(|e| error!(accelerator = %arn, error = %e, "failed to list listeners"))?;
        listeners
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::NoListener(arn.to_string()))
    }

    async fn find_group(&self, listener: &str, region: &str) -> BackendResult<Option<EndpointGroup>> {
        let groups = self.api.list_endpoint_groups(listener).await?;
        Ok(groups.into_iter().find(|g| g.region == region))
    }

    async fn require_group(&self, listener: &str, region: &str) -> BackendResult<EndpointGroup> {
        self.find_group(listener, region)
            .await?
            .ok_or_else(|| BackendError::NoEndpointGroup {
                region: region.to_string(),
            })
    }

    async fn resolve(&self, region: &str, group: &EndpointGroup, detail: Detail) -> BackendResult<Vec<Node>> {
        let ids: Vec<String> = group
            .endpoints
            .iter()
            .filter(|ep| ep.weight > 0)
            .map(|ep| ep.endpoint_id.clone())
            .collect();
        match detail {
            Detail::Identity => Ok(ids.into_iter().map(Node::from_id).collect()),
            Detail::Full if ids.is_empty() => Ok(Vec::new()),
            Detail::Full => {
                let details = self.compute.describe_many(region, &ids).await?;
                Ok(details.iter().map(Node::from).collect())
            }
        }
    }

    async fn read_tag(&self, key: &str) -> BackendResult<Option<String>> {
        let arn = self.representative_arn()?;
        let tags = self
            .api
            .list_tags(arn)
            .await
            .inspect_err(|e| error!(accelerator = %arn, error = %e, "failed to list tags"))?;
        Ok(tags::find(&tags, key).map(str::to_string))
    }
}

fn group_health_check(check: &HealthCheckUrl) -> GroupHealthCheck {
    GroupHealthCheck {
        protocol: check.scheme().to_ascii_uppercase(),
        port: check.port(),
        path: check.path().to_string(),
        interval_secs: GROUP_CHECK_INTERVAL_SECS,
        threshold_count: GROUP_THRESHOLD_COUNT,
    }
}

fn candidate_ids(nodes: &[Node]) -> BackendResult<Vec<String>> {
    if nodes.is_empty() {
        return Err(BackendError::EmptyCandidates);
    }
    nodes
        .iter()
        .map(|node| {
            node.id.clone().ok_or_else(|| BackendError::MissingIdentity {
                backend: BackendKind::EndpointGroup,
                node: node.to_string(),
            })
        })
        .collect()
}

#[async_trait]
impl TrafficBackend for EndpointGroupBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::EndpointGroup
    }

    async fn current_version(&self) -> BackendResult<Option<String>> {
        self.read_tag(&tags::version_key(&self.module)).await
    }

    async fn last_change_time(&self) -> BackendResult<Option<DateTime<Utc>>> {
        let value = self.read_tag(&tags::last_change_key(&self.module)).await?;
        Ok(value.as_deref().and_then(tags::parse_time))
    }

    async fn update_tags(&self, version: Option<&str>) -> BackendResult<()> {
        if self.arns.is_empty() {
            return Err(BackendError::NoResources(BackendKind::EndpointGroup));
        }
        let (remove, add) = tags::metadata_update(&self.module, version, Utc::now());
        for arn in &self.arns {
            self.api
                .retag(arn, &remove, &add)
                .await
                .inspect_err(|e| error!(accelerator = %arn, error = %e, "failed to tag accelerator"))?;
        }
        info!(version = version.unwrap_or("-"), "accelerator tags updated");
        Ok(())
    }

    async fn list_all_nodes(&self, detail: Detail) -> BackendResult<BTreeMap<Region, Vec<Node>>> {
        let arn = self.representative_arn()?;
        let listener = self.first_listener(arn).await?;
        let groups = self.api.list_endpoint_groups(&listener).await?;
        let mut all = BTreeMap::new();
        for group in &groups {
            let nodes = self.resolve(&group.region, group, detail).await?;
            all.insert(group.region.clone(), nodes);
        }
        Ok(all)
    }

    async fn list_nodes_in_region(&self, region: &str, detail: Detail) -> BackendResult<Vec<Node>> {
        let arn = self.representative_arn()?;
        let listener = self.first_listener(arn).await?;
        match self.find_group(&listener, region).await? {
            Some(group) => self.resolve(region, &group, detail).await,
            None => Ok(Vec::new()),
        }
    }

    async fn replace_nodes(&self, region: &str, nodes: &[Node]) -> BackendResult<()> {
        candidate_ids(nodes)?;
        info!(%region, count = nodes.len(), "replacing endpoints");
        self.stage_nodes(region, nodes).await?;
        self.await_healthy(region, nodes).await?;
        self.enable_nodes(region, nodes).await?;
        if let Err(e) = self.await_propagation().await {
            // Enabled weights stay in place; old members are not dropped
            // until the accelerator has converged.
            warn!(%region, error = %e, "endpoints enabled but accelerator did not converge");
            return Err(e);
        }
        self.retain_only(region, nodes).await
    }

    async fn add_nodes(&self, region: &str, nodes: &[Node]) -> BackendResult<()> {
        candidate_ids(nodes)?;
        info!(%region, count = nodes.len(), "adding endpoints");
        self.stage_nodes(region, nodes).await?;
        self.await_healthy(region, nodes).await?;
        self.enable_nodes(region, nodes).await
    }
}
