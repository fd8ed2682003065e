//! Weighted DNS strategy.
//!
//! Each region owns one latency-routed A record per zone, named
//! `{subdomain}.{domain}` with set identifier `{region}-a`. Replacing the
//! address list is a single upsert with no health gating, so callers must
//! probe new nodes before handing them over.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleetops_core::config::DnsZone;
use fleetops_core::tags;
use fleetops_core::{ComputeProvisioner, Node, Region};
use tracing::{error, info, warn};

use crate::backend::{BackendKind, Detail, TrafficBackend};
use crate::error::{BackendError, BackendResult};
use crate::provider::{DnsApi, RecordSet};

pub struct DnsBackend {
    api: Arc<dyn DnsApi>,
    compute: Arc<dyn ComputeProvisioner>,
    module: String,
    subdomain: String,
    ttl: u32,
    zones: Vec<DnsZone>,
}

impl DnsBackend {
    pub fn new(
        api: Arc<dyn DnsApi>,
        compute: Arc<dyn ComputeProvisioner>,
        module: impl Into<String>,
        subdomain: impl Into<String>,
        ttl: u32,
        zones: Vec<DnsZone>,
    ) -> Self {
        Self {
            api,
            compute,
            module: module.into(),
            subdomain: subdomain.into(),
            ttl,
            zones,
        }
    }

    fn representative_zone(&self) -> BackendResult<&DnsZone> {
        self.zones
            .first()
            .ok_or(BackendError::NoResources(BackendKind::Dns))
    }

    fn record_name(&self, zone: &DnsZone) -> String {
        format!("{}.{}", self.subdomain, zone.domain)
    }

    /// Whether `record` is this module's A record in `zone`. Providers echo
    /// names with a trailing dot and `*` escaped as `\052`.
    fn is_ours(&self, zone: &DnsZone, record: &RecordSet) -> bool {
        if record.record_type != "A" {
            return false;
        }
        let name = record.name.replace("\\052", "*");
        name.trim_end_matches('.') == self.record_name(zone)
    }

    async fn region_records(&self, zone: &DnsZone) -> BackendResult<Vec<RecordSet>> {
        let records = self
            .api
            .list_record_sets(&zone.zone_id)
            .await
            .inspect_err(|e| error!(zone = %zone.zone_id, error = %e, "failed to list dns records"))?;
        Ok(records.into_iter().filter(|r| self.is_ours(zone, r)).collect())
    }

    async fn addresses_in(&self, zone: &DnsZone, region: &str) -> BackendResult<Vec<Ipv4Addr>> {
        let records = self.region_records(zone).await?;
        Ok(records
            .iter()
            .find(|r| r.region.as_deref() == Some(region))
            .map(parse_values)
            .unwrap_or_default())
    }

    async fn resolve(&self, region: &str, addresses: Vec<Ipv4Addr>, detail: Detail) -> BackendResult<Vec<Node>> {
        match detail {
            Detail::Identity => Ok(addresses.into_iter().map(Node::from_address).collect()),
            Detail::Full if addresses.is_empty() => Ok(Vec::new()),
            Detail::Full => {
                let details = self.compute.find_by_addresses(region, &addresses).await?;
                Ok(details.iter().map(Node::from).collect())
            }
        }
    }

    async fn upsert(&self, zone: &DnsZone, region: &str, addresses: &[Ipv4Addr]) -> BackendResult<()> {
        let record = RecordSet {
            name: self.record_name(zone),
            record_type: "A".to_string(),
            ttl: self.ttl,
            values: addresses.iter().map(Ipv4Addr::to_string).collect(),
            region: Some(region.to_string()),
            set_identifier: Some(format!("{region}-a")),
        };
        self.api
            .upsert_record_set(&zone.zone_id, &record)
            .await
            .inspect_err(|e| error!(zone = %zone.zone_id, %region, error = %e, "failed to update dns"))?;
        Ok(())
    }

    async fn read_tag(&self, key: &str) -> BackendResult<Option<String>> {
        let zone = self.representative_zone()?;
        let tags = self
            .api
            .list_tags(&zone.zone_id)
            .await
            .inspect_err(|e| error!(zone = %zone.zone_id, error = %e, "failed to list zone tags"))?;
        Ok(tags::find(&tags, key).map(str::to_string))
    }
}

fn parse_values(record: &RecordSet) -> Vec<Ipv4Addr> {
    record
        .values
        .iter()
        .filter_map(|v| match v.parse() {
            Ok(ip) => Some(ip),
            Err(_) => {
                warn!(value = %v, record = %record.name, "skipping non-ipv4 record value");
                None
            }
        })
        .collect()
}

fn candidate_addresses(nodes: &[Node]) -> BackendResult<Vec<Ipv4Addr>> {
    if nodes.is_empty() {
        return Err(BackendError::EmptyCandidates);
    }
    nodes
        .iter()
        .map(|node| {
            node.ipv4.ok_or_else(|| BackendError::MissingIdentity {
                backend: BackendKind::Dns,
                node: node.to_string(),
            })
        })
        .collect()
}

#[async_trait]
impl TrafficBackend for DnsBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Dns
    }

    async fn current_version(&self) -> BackendResult<Option<String>> {
        self.read_tag(&tags::version_key(&self.module)).await
    }

    async fn last_change_time(&self) -> BackendResult<Option<DateTime<Utc>>> {
        let value = self.read_tag(&tags::last_change_key(&self.module)).await?;
        Ok(value.as_deref().and_then(tags::parse_time))
    }

    async fn update_tags(&self, version: Option<&str>) -> BackendResult<()> {
        if self.zones.is_empty() {
            return Err(BackendError::NoResources(BackendKind::Dns));
        }
        let (remove, add) = tags::metadata_update(&self.module, version, Utc::now());
        for zone in &self.zones {
            self.api
                .change_tags(&zone.zone_id, &remove, &add)
                .await
                .inspect_err(|e| error!(zone = %zone.zone_id, error = %e, "failed to tag zone"))?;
        }
        info!(version = version.unwrap_or("-"), "dns tags updated");
        Ok(())
    }

    async fn list_all_nodes(&self, detail: Detail) -> BackendResult<BTreeMap<Region, Vec<Node>>> {
        let zone = self.representative_zone()?;
        let records = self.region_records(zone).await?;
        let mut all = BTreeMap::new();
        for record in &records {
            let Some(region) = record.region.clone() else {
                continue;
            };
            let nodes = self.resolve(&region, parse_values(record), detail).await?;
            all.insert(region, nodes);
        }
        Ok(all)
    }

    async fn list_nodes_in_region(&self, region: &str, detail: Detail) -> BackendResult<Vec<Node>> {
        let zone = self.representative_zone()?;
        let addresses = self.addresses_in(zone, region).await?;
        self.resolve(region, addresses, detail).await
    }

    async fn replace_nodes(&self, region: &str, nodes: &[Node]) -> BackendResult<()> {
        let addresses = candidate_addresses(nodes)?;
        let listed: Vec<String> = addresses.iter().map(Ipv4Addr::to_string).collect();
        info!(%region, addresses = %listed.join(","), "updating dns");
        for zone in &self.zones {
            self.upsert(zone, region, &addresses).await?;
        }
        info!(%region, "dns updated");
        Ok(())
    }

    async fn add_nodes(&self, region: &str, nodes: &[Node]) -> BackendResult<()> {
        let added = candidate_addresses(nodes)?;
        for zone in &self.zones {
            let mut addresses = self.addresses_in(zone, region).await?;
            for ip in &added {
                if !addresses.contains(ip) {
                    addresses.push(*ip);
                }
            }
            self.upsert(zone, region, &addresses).await?;
            info!(%region, zone = %zone.zone_id, count = addresses.len(), "dns record extended");
        }
        Ok(())
    }
}
