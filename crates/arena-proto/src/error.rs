//! Error types shared across Arena crates.

use thiserror::Error;

/// Errors raised by the shared data model.
#[derive(Debug, Error)]
pub enum Error {
    /// Data chunks and annotations are keyed by a fully-qualified name.
    #[error("a non-empty fully-qualified name is required")]
    MissingFqdn,

    /// The payload could not be serialized into a chunk.
    #[error("failed to encode data chunk: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Result alias for the shared data model.
pub type Result<T> = std::result::Result<T, Error>;
