//! Operation results returned to callers.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use fleetops_backend::BackendKind;
use fleetops_core::{Node, Region};
use serde::Serialize;

use crate::phase::OperationPhase;

/// Summary of a completed operation.
#[derive(Debug, Clone, Serialize)]
pub struct OperationReport {
    pub operation: &'static str,
    pub message: String,
    /// Furthest phase reached.
    pub phase: OperationPhase,
    /// Nodes the operation touched, per region: new nodes for deploys and
    /// scale-ups, removed nodes for scale-ins.
    pub nodes: BTreeMap<Region, Vec<Node>>,
}

impl OperationReport {
    pub fn new(operation: &'static str, phase: OperationPhase, message: impl Into<String>) -> Self {
        Self {
            operation,
            message: message.into(),
            phase,
            nodes: BTreeMap::new(),
        }
    }

    pub fn with_nodes(mut self, region: &str, nodes: Vec<Node>) -> Self {
        self.nodes.insert(region.to_string(), nodes);
        self
    }

    pub fn node_count(&self) -> usize {
        self.nodes.values().map(Vec::len).sum()
    }
}

/// What one traffic backend currently reports.
#[derive(Debug, Clone, Serialize)]
pub struct BackendStatus {
    pub backend: String,
    pub version: Option<String>,
    pub last_change: Option<DateTime<Utc>>,
    pub nodes: BTreeMap<Region, Vec<Node>>,
}

impl BackendStatus {
    pub fn new(kind: BackendKind) -> Self {
        Self {
            backend: kind.to_string(),
            version: None,
            last_change: None,
            nodes: BTreeMap::new(),
        }
    }
}

/// Read-only view of the fleet.
#[derive(Debug, Clone, Serialize)]
pub struct FleetStatus {
    pub module: String,
    pub lock_holder: Option<String>,
    pub backends: Vec<BackendStatus>,
}
