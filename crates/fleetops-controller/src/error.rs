//! Controller error type.

use fleetops_backend::BackendError;
use fleetops_core::{ConfigError, Node, ProviderError};
use fleetops_state::LockError;
use thiserror::Error;

pub type ControllerResult<T> = Result<T, ControllerError>;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("provisioner error: {0}")]
    Provisioner(#[from] ProviderError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("new nodes in {region} never became healthy: {}", list(.pending))]
    GateTimeout { region: String, pending: Vec<Node> },

    #[error("cannot pair addresses in {region}: {old} existing node(s) but {new} new node(s)")]
    AlignmentMismatch { region: String, old: usize, new: usize },

    #[error("{operation} amount must be between 1 and {max}, got {amount}")]
    InvalidAmount {
        operation: &'static str,
        amount: u32,
        max: u32,
    },

    #[error("{0}")]
    Precondition(String),

    #[error("no node could be provisioned in {region}")]
    NothingProvisioned { region: String },
}

impl ControllerError {
    pub(crate) fn precondition(message: impl Into<String>) -> Self {
        Self::Precondition(message.into())
    }
}

fn list(nodes: &[Node]) -> String {
    nodes.iter().map(Node::to_string).collect::<Vec<_>>().join(", ")
}
