//! fleetops-core — shared types, configuration, and collaborator contracts.
//!
//! Every other fleetops crate builds on the types defined here. Nothing in
//! this crate talks to a cloud provider; it only describes what a provider
//! must offer.

pub mod config;
pub mod error;
pub mod provider;
pub mod tags;
pub mod types;

pub use config::{
    AutoscalePolicy, FleetConfig, HealthCheckUrl, MonitorSettings, Timings, parse_duration,
};
pub use error::{ConfigError, ConfigResult, ProviderError, ProviderResult};
pub use provider::{
    AddressManager, AllocatedAddress, ComputeProvisioner, Datapoint, LaunchRequest, ManagedAddress,
    MetricSource, MetricWindow, Notifier,
};
pub use types::{
    DeployMetadata, Node, NodeDetail, NodeId, NodeState, PollBudget, Region, TierLadder, TierStep,
};
