//! fleetops-controller — fleet operations over regional traffic backends.
//!
//! Every destructive operation runs under the module's operation lock and
//! walks the same phases:
//!
//! ```text
//! Locked → Provisioning → Gating → TrafficCommit → Decommission
//! ```
//!
//! New nodes answer the health check before any backend routes to them,
//! and old nodes leave traffic only after the new ones are committed.

pub mod clean;
pub mod controller;
pub mod deploy;
pub mod error;
pub mod monitor;
pub mod notify;
pub mod phase;
pub mod report;
pub mod scale;
pub mod status;

pub use clean::{CleanOptions, DEFAULT_MIN_ALIVE};
pub use controller::{Collaborators, FleetController, MAX_SCALE_AMOUNT};
pub use deploy::DeployOptions;
pub use error::{ControllerError, ControllerResult};
pub use notify::{LogNotifier, WebhookNotifier};
pub use phase::{OperationPhase, PhaseTracker};
pub use report::{BackendStatus, FleetStatus, OperationReport};
