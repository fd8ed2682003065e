//! Traffic backend error types.

use fleetops_core::ProviderError;
use thiserror::Error;

use crate::backend::BackendKind;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend unavailable: {0}")]
    Unavailable(#[from] ProviderError),

    #[error("no {0} resource configured")]
    NoResources(BackendKind),

    #[error("accelerator {0} has no listener")]
    NoListener(String),

    #[error("no endpoint group in {region}")]
    NoEndpointGroup { region: String },

    #[error("{backend} backend cannot address node {node}")]
    MissingIdentity { backend: BackendKind, node: String },

    #[error("no candidate nodes given")]
    EmptyCandidates,

    #[error("endpoints in {region} not healthy after {attempts} checks: {}", pending.join(","))]
    HealthTimeout {
        region: String,
        attempts: u32,
        pending: Vec<String>,
    },

    #[error("accelerator {arn} not deployed after {attempts} checks")]
    PropagationTimeout { arn: String, attempts: u32 },
}

pub type BackendResult<T> = Result<T, BackendError>;
