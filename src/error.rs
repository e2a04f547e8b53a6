//! Error types for the identity certificate authority.

use thiserror::Error;

/// Errors surfaced by the generator, the store and the lifecycle service.
#[derive(Debug, Error)]
pub enum CaError {
    /// Root CA material missing or unparseable. Fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// Key generation, request construction or signing failed.
    #[error("certificate generation failed: {0}")]
    Generation(String),

    /// Malformed certificate input or chain verification failure.
    #[error("certificate validation failed: {0}")]
    Validation(String),

    /// The identity embedded in a certificate disagrees with the caller's.
    #[error("certificate identity mismatch: expected uid={expected_uid} did={expected_did}, found uid={found_uid} did={found_did}")]
    IdentityMismatch {
        expected_uid: String,
        expected_did: String,
        found_uid: String,
        found_did: String,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type CaResult<T> = Result<T, CaError>;
