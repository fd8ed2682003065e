//! Shared fixtures: a simulated fleet and a controller wired to it.

#![allow(dead_code)]

use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::Arc;

use fleetops_backend::{
    AcceleratorApi, DnsApi, EndpointDescription, EndpointGroup, EndpointHealth, GroupHealthCheck,
    RecordSet,
};
use fleetops_controller::{Collaborators, FleetController};
use fleetops_core::tags::{self, Tag};
use fleetops_core::{FleetConfig, NodeDetail};
use fleetops_sim::{SimProber, SimProvider};

pub const MODULE: &str = "api";
pub const ARN: &str = "arn:acc/1";
pub const ZONE: &str = "Z1";
pub const WEST: &str = "us-west-2";
pub const EU: &str = "eu-west-1";

pub enum Backends {
    Accelerator,
    Dns,
    Both,
}

pub fn config(state_dir: &Path, backends: Backends) -> FleetConfig {
    let accelerator = "\n[accelerator]\narns = [\"arn:acc/1\"]\n";
    let dns = "\n[dns]\nsubdomain = \"*\"\nzones = [{ zone_id = \"Z1\", domain = \"example.com\" }]\n";
    let sections = match backends {
        Backends::Accelerator => accelerator.to_string(),
        Backends::Dns => dns.to_string(),
        Backends::Both => format!("{accelerator}{dns}"),
    };
    let raw = format!(
        r#"
module = "{MODULE}"
regions = ["{WEST}", "{EU}"]
health_check_url = "https://api.example.com/.devops/health"
state_dir = "{}"
instance_tiers = ["t4g.small", "t4g.medium", "t4g.large"]
{sections}"#,
        state_dir.display()
    );
    FleetConfig::from_toml_str(&raw).unwrap()
}

pub async fn sim(config: &FleetConfig) -> SimProvider {
    let sim = SimProvider::in_memory();
    sim.ensure_resources(config).await;
    sim
}

pub fn controller(config: &FleetConfig, sim: &SimProvider) -> FleetController {
    let shared = Arc::new(sim.clone());
    let accelerator = config
        .accelerator
        .as_ref()
        .map(|_| shared.clone() as Arc<dyn AcceleratorApi>);
    let dns = config.dns.as_ref().map(|_| shared.clone() as Arc<dyn DnsApi>);
    FleetController::new(
        config,
        Collaborators {
            compute: shared.clone(),
            addresses: Some(shared.clone()),
            accelerator,
            dns,
            prober: Some(Arc::new(SimProber::new(sim.clone()))),
            notifier: shared,
        },
    )
    .unwrap()
}

pub async fn tag_version(sim: &SimProvider, version: &str) {
    let tag = Tag::new(tags::version_key(MODULE), version);
    let world = sim.snapshot().await;
    if world.accelerators.contains_key(ARN) {
        sim.tag_accelerator(ARN, tag.clone()).await.unwrap();
    }
    if world.zones.contains_key(ZONE) {
        sim.tag_zone(ZONE, tag).await.unwrap();
    }
}

/// Seed `count` running nodes and route an accelerator group to them.
pub async fn seed_group(sim: &SimProvider, region: &str, count: usize, instance_type: &str) -> Vec<NodeDetail> {
    let mut nodes = Vec::with_capacity(count);
    for _ in 0..count {
        nodes.push(sim.seed_node(MODULE, region, "v1", instance_type).await);
    }
    let endpoints = nodes
        .iter()
        .map(|n| EndpointDescription {
            endpoint_id: n.id.clone(),
            weight: 128,
            health: EndpointHealth::Healthy,
            client_ip_preservation: true,
        })
        .collect();
    sim.seed_group(
        ARN,
        EndpointGroup {
            arn: format!("{ARN}/listener/1/group/{region}"),
            region: region.to_string(),
            endpoints,
            health_check: GroupHealthCheck {
                protocol: "HTTPS".into(),
                port: 443,
                path: "/.devops/health".into(),
                interval_secs: 10,
                threshold_count: 2,
            },
        },
    )
    .await
    .unwrap();
    nodes
}

/// Seed `count` running nodes with stable addresses behind the region's
/// DNS record. Returns the nodes and their stable addresses.
pub async fn seed_dns(sim: &SimProvider, region: &str, count: usize) -> (Vec<NodeDetail>, Vec<Ipv4Addr>) {
    let mut nodes = Vec::with_capacity(count);
    let mut addresses = Vec::with_capacity(count);
    for _ in 0..count {
        let node = sim.seed_node(MODULE, region, "v1", "t4g.small").await;
        addresses.push(sim.seed_address(MODULE, region, &node.id).await.unwrap());
        nodes.push(node);
    }
    sim.seed_record(
        ZONE,
        RecordSet {
            name: "*.example.com".into(),
            record_type: "A".into(),
            ttl: 300,
            values: addresses.iter().map(Ipv4Addr::to_string).collect(),
            region: Some(region.to_string()),
            set_identifier: Some(format!("{region}-a")),
        },
    )
    .await
    .unwrap();
    (nodes, addresses)
}

/// Endpoint ids and weights of the region's group.
pub async fn members(sim: &SimProvider, region: &str) -> Vec<(String, u8)> {
    let world = sim.snapshot().await;
    world.accelerators[ARN]
        .groups
        .iter()
        .find(|g| g.region == region)
        .map(|g| g.endpoints.iter().map(|e| (e.endpoint_id.clone(), e.weight)).collect())
        .unwrap_or_default()
}

/// Values of the region's DNS record.
pub async fn record_values(sim: &SimProvider, region: &str) -> Vec<String> {
    let world = sim.snapshot().await;
    world.zones[ZONE]
        .records
        .iter()
        .find(|r| r.region.as_deref() == Some(region))
        .map(|r| r.values.clone())
        .unwrap_or_default()
}
