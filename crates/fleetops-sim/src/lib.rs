//! fleetops-sim — an in-process cloud for exercising fleetops end to end.
//!
//! One [`SimProvider`] implements every collaborator contract the
//! controller needs: compute, stable addresses, metrics, alerts, and the
//! accelerator and DNS wire APIs. [`SimProber`] answers health probes from
//! the same world. State can be persisted as JSON so `fleetctl` runs
//! against the simulator accumulate history across invocations.
//!
//! ```text
//! SimProvider ── Arc<Mutex<SimWorld>> ── SimProber
//!   ComputeProvisioner, AddressManager, MetricSource, Notifier,
//!   AcceleratorApi, DnsApi
//! ```

pub mod error;
pub mod prober;
pub mod provider;
pub mod traffic;
pub mod world;

pub use error::{SimError, SimResult};
pub use prober::SimProber;
pub use provider::SimProvider;
pub use world::{SimAlert, SimEvent, SimWorld};
