//! Error types for aerowire
//!
//! Errors here are the synchronous kind: a request that cannot be built or
//! a buffer that cannot be parsed. Outcomes of in-flight requests are
//! reported through [`ResultCode`](crate::protocol::ResultCode) instead.

use thiserror::Error;

/// Result type alias using AeroError
pub type Result<T> = std::result::Result<T, AeroError>;

/// Unified error type for aerowire operations
#[derive(Debug, Error)]
pub enum AeroError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Request Errors
    // -------------------------------------------------------------------------
    /// The request cannot be laid out on the wire (bad name, bad key type).
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// The request timer could not be armed.
    #[error("Timer error: {0}")]
    Timer(String),

    // -------------------------------------------------------------------------
    // Wire Errors
    // -------------------------------------------------------------------------
    #[error("Protocol error: {0}")]
    Protocol(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}
