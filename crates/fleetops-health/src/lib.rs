//! fleetops-health — concurrent HTTP health probing of fleet nodes.
//!
//! Two session shapes run on the same probe rounds:
//!
//! - **monitoring** probes a live fleet for a bounded number of rounds and
//!   stops as soon as any node reaches its failure threshold;
//! - **gating** holds freshly provisioned nodes until each has answered
//!   healthy once, or fails when the attempt budget runs out.
//!
//! ```text
//! HealthProbeEngine
//!   ├── HealthTracker per node (consecutive failures, attempts)
//!   └── Prober (HttpProber: GET health URL pinned to the node address)
//! ```

pub mod checker;
pub mod engine;
pub mod error;

pub use checker::{HealthStatus, HealthTracker, HttpProber, ProbeResult, Prober};
pub use engine::{HealthProbeEngine, MIN_MONITOR_INTERVAL, MonitorOutcome};
pub use error::{HealthError, HealthResult};
