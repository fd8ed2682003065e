//! Recording fakes for the backend unit tests.

use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleetops_core::tags::{self, Tag};
use fleetops_core::{
    ComputeProvisioner, LaunchRequest, NodeDetail, NodeId, NodeState, ProviderError,
    ProviderResult,
};

use crate::provider::{
    AcceleratorApi, AcceleratorStatus, CreateEndpointGroup, DnsApi, EndpointConfiguration,
    EndpointDescription, EndpointGroup, EndpointHealth, GroupHealthCheck, RecordSet,
};

const LISTENER: &str = "arn:acc/1/listener/1";

#[derive(Debug, Clone)]
pub enum AcceleratorCall {
    Create {
        region: String,
        endpoints: Vec<EndpointConfiguration>,
    },
    Update {
        group: String,
        endpoints: Vec<EndpointConfiguration>,
    },
}

struct Tracked {
    desc: EndpointDescription,
    listings: u32,
}

struct AcceleratorState {
    tags: Vec<Tag>,
    fail_tags: bool,
    groups: Vec<(String, Vec<Tracked>)>,
    healthy_after: u32,
    staged: HashSet<String>,
    reported_healthy: HashSet<String>,
    violations: Vec<String>,
    calls: Vec<AcceleratorCall>,
}

/// Accelerator that reports staged endpoints healthy after a number of
/// listings and records any endpoint enabled before it was seen healthy.
pub struct FakeAccelerator {
    state: Mutex<AcceleratorState>,
}

impl Default for FakeAccelerator {
    fn default() -> Self {
        Self {
            state: Mutex::new(AcceleratorState {
                tags: Vec::new(),
                fail_tags: false,
                groups: Vec::new(),
                healthy_after: 1,
                staged: HashSet::new(),
                reported_healthy: HashSet::new(),
                violations: Vec::new(),
                calls: Vec::new(),
            }),
        }
    }
}

fn healthy(id: &str, weight: u8) -> Tracked {
    Tracked {
        desc: EndpointDescription {
            endpoint_id: id.to_string(),
            weight,
            health: EndpointHealth::Healthy,
            client_ip_preservation: true,
        },
        listings: 0,
    }
}

fn group_arn(region: &str) -> String {
    format!("{LISTENER}/group/{region}")
}

fn check() -> GroupHealthCheck {
    GroupHealthCheck {
        protocol: "HTTPS".into(),
        port: 443,
        path: "/health".into(),
        interval_secs: 10,
        threshold_count: 2,
    }
}

impl FakeAccelerator {
    pub fn with_group(region: &str, ids: &[&str]) -> Self {
        let fake = Self::default();
        fake.state.lock().unwrap().groups.push((
            region.to_string(),
            ids.iter().map(|id| healthy(id, 128)).collect(),
        ));
        fake
    }

    pub fn push_endpoint(&self, region: &str, id: &str, weight: u8) {
        let mut state = self.state.lock().unwrap();
        if let Some((_, endpoints)) = state.groups.iter_mut().find(|(r, _)| r == region) {
            endpoints.push(healthy(id, weight));
        }
    }

    pub fn set_healthy_after(&self, listings: u32) {
        self.state.lock().unwrap().healthy_after = listings;
    }

    pub fn set_tags(&self, tags: Vec<Tag>) {
        self.state.lock().unwrap().tags = tags;
    }

    pub fn fail_tags(&self, fail: bool) {
        self.state.lock().unwrap().fail_tags = fail;
    }

    pub fn violations(&self) -> Vec<String> {
        self.state.lock().unwrap().violations.clone()
    }

    pub fn calls(&self) -> Vec<AcceleratorCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn members(&self, region: &str) -> Vec<(String, u8)> {
        let state = self.state.lock().unwrap();
        state
            .groups
            .iter()
            .find(|(r, _)| r == region)
            .map(|(_, eps)| {
                eps.iter()
                    .map(|t| (t.desc.endpoint_id.clone(), t.desc.weight))
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl AcceleratorState {
    fn write(&mut self, region: &str, endpoints: &[EndpointConfiguration]) -> EndpointGroup {
        let previous = self
            .groups
            .iter()
            .position(|(r, _)| r == region)
            .map(|idx| self.groups.remove(idx).1)
            .unwrap_or_default();

        let mut next = Vec::new();
        for conf in endpoints {
            if conf.weight > 0
                && self.staged.contains(&conf.endpoint_id)
                && !self.reported_healthy.contains(&conf.endpoint_id)
            {
                self.violations.push(conf.endpoint_id.clone());
            }
            let tracked = match previous.iter().find(|t| t.desc.endpoint_id == conf.endpoint_id) {
                Some(old) => Tracked {
                    desc: EndpointDescription {
                        weight: conf.weight,
                        ..old.desc.clone()
                    },
                    listings: old.listings,
                },
                None => {
                    if conf.weight == 0 {
                        self.staged.insert(conf.endpoint_id.clone());
                    }
                    Tracked {
                        desc: EndpointDescription {
                            endpoint_id: conf.endpoint_id.clone(),
                            weight: conf.weight,
                            health: EndpointHealth::Initial,
                            client_ip_preservation: conf.client_ip_preservation,
                        },
                        listings: 0,
                    }
                }
            };
            next.push(tracked);
        }
        self.groups.push((region.to_string(), next));
        self.snapshot(region)
    }

    fn snapshot(&self, region: &str) -> EndpointGroup {
        let endpoints = self
            .groups
            .iter()
            .find(|(r, _)| r == region)
            .map(|(_, eps)| eps.iter().map(|t| t.desc.clone()).collect())
            .unwrap_or_default();
        EndpointGroup {
            arn: group_arn(region),
            region: region.to_string(),
            endpoints,
            health_check: check(),
        }
    }
}

#[async_trait]
impl AcceleratorApi for FakeAccelerator {
    async fn list_tags(&self, _arn: &str) -> ProviderResult<Vec<Tag>> {
        let state = self.state.lock().unwrap();
        if state.fail_tags {
            return Err(ProviderError::request("list_tags", "throttled"));
        }
        Ok(state.tags.clone())
    }

    async fn retag(&self, _arn: &str, remove: &[String], add: &[Tag]) -> ProviderResult<()> {
        let mut state = self.state.lock().unwrap();
        state.tags.retain(|t| !remove.contains(&t.key));
        state.tags.extend(add.iter().cloned());
        Ok(())
    }

    async fn list_listeners(&self, _arn: &str) -> ProviderResult<Vec<String>> {
        Ok(vec![LISTENER.to_string()])
    }

    async fn list_endpoint_groups(&self, _listener: &str) -> ProviderResult<Vec<EndpointGroup>> {
        let mut state = self.state.lock().unwrap();
        let healthy_after = state.healthy_after;
        let mut seen = Vec::new();
        for (_, endpoints) in state.groups.iter_mut() {
            for tracked in endpoints.iter_mut() {
                if tracked.desc.health == EndpointHealth::Initial {
                    tracked.listings = tracked.listings.saturating_add(1);
                    if tracked.listings >= healthy_after {
                        tracked.desc.health = EndpointHealth::Healthy;
                    }
                }
                if tracked.desc.health == EndpointHealth::Healthy {
                    seen.push(tracked.desc.endpoint_id.clone());
                }
            }
        }
        state.reported_healthy.extend(seen);
        let regions: Vec<String> = state.groups.iter().map(|(r, _)| r.clone()).collect();
        Ok(regions.iter().map(|r| state.snapshot(r)).collect())
    }

    async fn create_endpoint_group(
        &self,
        request: CreateEndpointGroup<'_>,
    ) -> ProviderResult<EndpointGroup> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(AcceleratorCall::Create {
            region: request.region.to_string(),
            endpoints: request.endpoints.to_vec(),
        });
        Ok(state.write(request.region, request.endpoints))
    }

    async fn update_endpoint_group(
        &self,
        group: &str,
        endpoints: &[EndpointConfiguration],
    ) -> ProviderResult<EndpointGroup> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(AcceleratorCall::Update {
            group: group.to_string(),
            endpoints: endpoints.to_vec(),
        });
        let region = state
            .groups
            .iter()
            .map(|(r, _)| r.clone())
            .find(|r| group_arn(r) == group)
            .ok_or_else(|| ProviderError::NotFound(group.to_string()))?;
        Ok(state.write(&region, endpoints))
    }

    async fn accelerator_status(&self, _arn: &str) -> ProviderResult<AcceleratorStatus> {
        Ok(AcceleratorStatus::Deployed)
    }
}

// ── DNS ───────────────────────────────────────────────────────────

#[derive(Default)]
struct DnsState {
    tags: HashMap<String, Vec<Tag>>,
    records: HashMap<String, Vec<RecordSet>>,
    upserts: Vec<(String, RecordSet)>,
}

#[derive(Default)]
pub struct FakeDns {
    state: Mutex<DnsState>,
}

impl FakeDns {
    pub fn seed(&self, zone: &str, record: RecordSet) {
        self.state
            .lock()
            .unwrap()
            .records
            .entry(zone.to_string())
            .or_default()
            .push(record);
    }

    pub fn upserts(&self) -> Vec<(String, RecordSet)> {
        self.state.lock().unwrap().upserts.clone()
    }

    pub fn tag(&self, zone: &str, key: &str) -> Option<String> {
        let state = self.state.lock().unwrap();
        state
            .tags
            .get(zone)
            .and_then(|tags| tags::find(tags, key).map(str::to_string))
    }
}

#[async_trait]
impl DnsApi for FakeDns {
    async fn list_tags(&self, zone_id: &str) -> ProviderResult<Vec<Tag>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .tags
            .get(zone_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn change_tags(&self, zone_id: &str, remove: &[String], add: &[Tag]) -> ProviderResult<()> {
        let mut state = self.state.lock().unwrap();
        let tags = state.tags.entry(zone_id.to_string()).or_default();
        tags.retain(|t| !remove.contains(&t.key));
        tags.extend(add.iter().cloned());
        Ok(())
    }

    async fn list_record_sets(&self, zone_id: &str) -> ProviderResult<Vec<RecordSet>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .records
            .get(zone_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn upsert_record_set(&self, zone_id: &str, record: &RecordSet) -> ProviderResult<()> {
        let mut state = self.state.lock().unwrap();
        state.upserts.push((zone_id.to_string(), record.clone()));
        let records = state.records.entry(zone_id.to_string()).or_default();
        records.retain(|r| r.set_identifier != record.set_identifier);
        // Stored the way the provider echoes names back.
        let mut stored = record.clone();
        stored.name = format!("{}.", stored.name.replace('*', "\\052"));
        records.push(stored);
        Ok(())
    }
}

// ── Compute ───────────────────────────────────────────────────────

/// Compute fake that derives addresses from node ids (`i-N` ↔ `198.51.100.N`).
#[derive(Default)]
pub struct FakeCompute;

fn detail(id: &str) -> Option<NodeDetail> {
    let n: u8 = id.strip_prefix("i-")?.parse().ok()?;
    Some(NodeDetail {
        id: id.to_string(),
        region: "us-west-2".into(),
        ipv4: Some(Ipv4Addr::new(198, 51, 100, n)),
        ipv6: None,
        instance_type: "t4g.small".into(),
        version: "v1".into(),
        state: NodeState::Running,
        last_change: None,
    })
}

#[async_trait]
impl ComputeProvisioner for FakeCompute {
    async fn launch(&self, _request: &LaunchRequest) -> ProviderResult<NodeDetail> {
        Err(ProviderError::request("launch", "not supported"))
    }

    async fn describe(&self, _region: &str, id: &str) -> ProviderResult<NodeDetail> {
        detail(id).ok_or_else(|| ProviderError::NotFound(id.to_string()))
    }

    async fn describe_many(&self, _region: &str, ids: &[NodeId]) -> ProviderResult<Vec<NodeDetail>> {
        Ok(ids.iter().filter_map(|id| detail(id)).collect())
    }

    async fn find_by_addresses(
        &self,
        _region: &str,
        addresses: &[Ipv4Addr],
    ) -> ProviderResult<Vec<NodeDetail>> {
        Ok(addresses
            .iter()
            .filter_map(|ip| detail(&format!("i-{}", ip.octets()[3])))
            .collect())
    }

    async fn terminate(&self, _region: &str, _ids: &[NodeId]) -> ProviderResult<()> {
        Ok(())
    }

    async fn touch(&self, _region: &str, _id: &str, _at: DateTime<Utc>) -> ProviderResult<()> {
        Ok(())
    }

    async fn list_managed(&self, _region: &str, _module: &str) -> ProviderResult<Vec<NodeDetail>> {
        Ok(Vec::new())
    }
}
