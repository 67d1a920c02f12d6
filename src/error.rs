//! Error types for the cache

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced synchronously by cache operations.
///
/// Background eviction never produces these; failures there are logged and
/// retried on the next tick.
#[derive(Error, Debug)]
pub enum Error {
    /// Expiration was zero or overflowed the clock when added to now
    #[error("Invalid expiration: {0}")]
    InvalidExpiration(String),

    /// Argument out of its accepted range
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Paired key/value batches of differing lengths
    #[error("Length mismatch: {keys} keys but {values} values")]
    LengthMismatch { keys: usize, values: usize },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
