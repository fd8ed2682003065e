//! Health probing error types.

use fleetops_core::Node;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HealthError {
    #[error("{} node(s) not healthy after {attempts} checks", pending.len())]
    GateTimeout { attempts: u32, pending: Vec<Node> },
}

pub type HealthResult<T> = Result<T, HealthError>;
