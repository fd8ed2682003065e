//! fleetops-backend — traffic-directing backends.
//!
//! Two interchangeable strategies implement [`TrafficBackend`]:
//!
//! - [`EndpointGroupBackend`] stages new nodes at weight 0 in a regional
//!   accelerator endpoint group, waits for the accelerator to see them
//!   healthy, enables them, waits for propagation and drops old members.
//! - [`DnsBackend`] swaps the regional A record in one upsert.
//!
//! ```text
//! TrafficBackend
//!   ├── EndpointGroupBackend ── AcceleratorApi
//!   └── DnsBackend ──────────── DnsApi
//!         (both resolve node details through ComputeProvisioner)
//! ```

pub mod accelerator;
pub mod backend;
pub mod dns;
pub mod error;
pub mod provider;

#[cfg(test)]
mod testing;

pub use accelerator::{ENABLED_WEIGHT, EndpointGroupBackend, EndpointGroupSettings};
pub use backend::{BackendKind, Detail, TrafficBackend};
pub use dns::DnsBackend;
pub use error::{BackendError, BackendResult};
pub use provider::{
    AcceleratorApi, AcceleratorStatus, CreateEndpointGroup, DnsApi, EndpointConfiguration,
    EndpointDescription, EndpointGroup, EndpointHealth, GroupHealthCheck, RecordSet,
};
