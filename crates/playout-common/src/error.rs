//! Error types shared across the playout crates

use thiserror::Error;

/// Result type alias for playout-common operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the shared building blocks.
#[derive(Debug, Error)]
pub enum Error {
    /// A frame record in shared memory could not be decoded.
    #[error("Malformed frame record: {0}")]
    MalformedFrame(String),

    /// A write would exceed the region bounds agreed for the request.
    #[error("Region exhausted: {region} needs {needed} bytes, {available} available")]
    RegionExhausted {
        region: &'static str,
        needed: usize,
        available: usize,
    },

    /// Configuration value rejected.
    #[error("Invalid configuration: {0}")]
    Config(String),
}
