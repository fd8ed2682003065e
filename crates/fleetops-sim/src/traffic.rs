//! Simulated accelerator and DNS APIs.

use async_trait::async_trait;
use fleetops_backend::{
    AcceleratorApi, AcceleratorStatus, CreateEndpointGroup, DnsApi, EndpointConfiguration,
    EndpointDescription, EndpointGroup, EndpointHealth, RecordSet,
};
use fleetops_core::tags::Tag;
use fleetops_core::{ProviderError, ProviderResult};
use tracing::debug;

use crate::provider::SimProvider;
use crate::world::{canonical_name, echoed_name, retag};

/// Status polls a change stays in progress.
const PROPAGATION_POLLS: u32 = 1;

fn describe(endpoints: &[EndpointConfiguration]) -> Vec<EndpointDescription> {
    endpoints
        .iter()
        .map(|ep| EndpointDescription {
            endpoint_id: ep.endpoint_id.clone(),
            weight: ep.weight,
            health: EndpointHealth::Initial,
            client_ip_preservation: ep.client_ip_preservation,
        })
        .collect()
}

fn summary(endpoints: &[EndpointConfiguration]) -> String {
    endpoints
        .iter()
        .map(|ep| format!("{}={}", ep.endpoint_id, ep.weight))
        .collect::<Vec<_>>()
        .join(",")
}

#[async_trait]
impl AcceleratorApi for SimProvider {
    async fn list_tags(&self, accelerator_arn: &str) -> ProviderResult<Vec<Tag>> {
        let world = self.world.lock().await;
        Ok(world.accelerator(accelerator_arn)?.tags.clone())
    }

    async fn retag(&self, accelerator_arn: &str, remove: &[String], add: &[Tag]) -> ProviderResult<()> {
        let mut world = self.world.lock().await;
        retag(&mut world.accelerator_mut(accelerator_arn)?.tags, remove, add);
        world.record("accelerator-tag", accelerator_arn);
        Ok(())
    }

    async fn list_listeners(&self, accelerator_arn: &str) -> ProviderResult<Vec<String>> {
        let world = self.world.lock().await;
        Ok(vec![world.accelerator(accelerator_arn)?.listener.clone()])
    }

    async fn list_endpoint_groups(&self, listener_arn: &str) -> ProviderResult<Vec<EndpointGroup>> {
        let mut world = self.world.lock().await;
        let groups = world.accelerator_by_listener(listener_arn)?.groups.clone();
        Ok(groups.iter().map(|g| world.observed(g)).collect())
    }

    async fn create_endpoint_group(&self, request: CreateEndpointGroup<'_>) -> ProviderResult<EndpointGroup> {
        let mut world = self.world.lock().await;
        let acc = world.accelerator_by_listener(request.listener_arn)?;
        if let Some(existing) = acc.groups.iter().find(|g| g.region == request.region) {
            debug!(region = %request.region, token = %request.idempotency_token, "endpoint group already exists");
            let existing = existing.clone();
            return Ok(world.observed(&existing));
        }
        let group = EndpointGroup {
            arn: format!("{}/group/{}", request.listener_arn, request.region),
            region: request.region.to_string(),
            endpoints: describe(request.endpoints),
            health_check: request.health_check.clone(),
        };
        acc.groups.push(group.clone());
        acc.propagating = PROPAGATION_POLLS;
        world.record(
            "endpoint-group-create",
            format!("{} {}", request.region, summary(request.endpoints)),
        );
        Ok(world.observed(&group))
    }

    async fn update_endpoint_group(
        &self,
        group_arn: &str,
        endpoints: &[EndpointConfiguration],
    ) -> ProviderResult<EndpointGroup> {
        let mut world = self.world.lock().await;
        let acc = world.accelerator_by_group(group_arn)?;
        acc.propagating = PROPAGATION_POLLS;
        let group = acc
            .groups
            .iter_mut()
            .find(|g| g.arn == group_arn)
            .ok_or_else(|| ProviderError::NotFound(format!("endpoint group {group_arn}")))?;
        group.endpoints = describe(endpoints);
        let group = group.clone();
        world.record("endpoint-group-update", format!("{} {}", group.region, summary(endpoints)));
        Ok(world.observed(&group))
    }

    async fn accelerator_status(&self, accelerator_arn: &str) -> ProviderResult<AcceleratorStatus> {
        self.world.lock().await.accelerator_status(accelerator_arn)
    }
}

#[async_trait]
impl DnsApi for SimProvider {
    async fn list_tags(&self, zone_id: &str) -> ProviderResult<Vec<Tag>> {
        let mut world = self.world.lock().await;
        Ok(world.zone_mut(zone_id)?.tags.clone())
    }

    async fn change_tags(&self, zone_id: &str, remove: &[String], add: &[Tag]) -> ProviderResult<()> {
        let mut world = self.world.lock().await;
        retag(&mut world.zone_mut(zone_id)?.tags, remove, add);
        world.record("zone-tag", zone_id);
        Ok(())
    }

    async fn list_record_sets(&self, zone_id: &str) -> ProviderResult<Vec<RecordSet>> {
        let mut world = self.world.lock().await;
        Ok(world
            .zone_mut(zone_id)?
            .records
            .iter()
            .map(|r| RecordSet {
                name: echoed_name(&r.name),
                ..r.clone()
            })
            .collect())
    }

    async fn upsert_record_set(&self, zone_id: &str, record: &RecordSet) -> ProviderResult<()> {
        let mut world = self.world.lock().await;
        let zone = world.zone_mut(zone_id)?;
        let name = canonical_name(&record.name);
        let stored = RecordSet {
            name: name.clone(),
            ..record.clone()
        };
        match zone
            .records
            .iter_mut()
            .find(|r| canonical_name(&r.name) == name && r.set_identifier == record.set_identifier)
        {
            Some(existing) => *existing = stored,
            None => zone.records.push(stored),
        }
        world.record(
            "dns-upsert",
            format!("{zone_id} {} {}", record.region.as_deref().unwrap_or("-"), record.values.join(",")),
        );
        Ok(())
    }
}
