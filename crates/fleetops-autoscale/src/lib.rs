//! fleetops-autoscale — CPU-driven fleet scaling.
//!
//! Reads per-node CPU datapoints from a `MetricSource`, averages them per
//! region, and drives the controller's scaling operations. Cooldown
//! markers on disk keep repeated invocations from thrashing.
//!
//! # Scaling Algorithm
//!
//! ```text
//! node_avg   = mean of the 6 most recent datapoints (0 without data)
//! region_avg = sum(node_avg) / nodes
//! low_load   = 0 < node_avg < low_threshold
//!
//! if region_avg > high_threshold and scale-up cooldown elapsed:
//!     scale_up(region)
//!
//! if every node is low_load:
//!     if tier > smallest and scale-small cooldown elapsed:
//!         scale_down(region)
//!     if nodes > region minimum and scale-small cooldown elapsed:
//!         scale_in(region, 1)
//! ```
//!
//! Markers are written only after an action succeeds. Scale-down and
//! scale-in share one marker, so a scale-down blocks a scale-in in the
//! same pass.

pub mod actions;
pub mod scaler;

pub use actions::ScaleActions;
pub use scaler::{Autoscaler, RegionLoad, ScaleDecision, node_average};
