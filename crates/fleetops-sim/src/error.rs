//! Simulator persistence errors.

use thiserror::Error;

pub type SimResult<T> = Result<T, SimError>;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("failed to read sim state: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to decode sim state: {0}")]
    Decode(String),

    #[error("failed to encode sim state: {0}")]
    Encode(String),
}
