//! Error taxonomy shared by every store and engine in the crate.

use thiserror::Error;

/// Uniform error type returned by store operations, the topology generator,
/// the subscription engine, and the service-model registry.
#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid: {0}")]
    Invalid(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("not supported: {0}")]
    NotSupported(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
