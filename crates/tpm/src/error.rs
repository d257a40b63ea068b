//! Error types for TPM operations.

use thiserror::Error;

/// Errors raised by TPM providers and the credential-activation primitives.
#[derive(Debug, Error)]
pub enum TpmError {
    /// TPM could not be opened or has no enumerable endorsement key
    #[error("TPM unavailable: {0}")]
    HardwareUnavailable(String),

    /// Attestation key creation failed
    #[error("attestation key generation failed: {0}")]
    KeyGeneration(String),

    /// The TPM rejected the encrypted credential. Wrong EK/AK pairing,
    /// corrupted blob, or hardware fault; callers must treat this as a
    /// verification failure, not something to retry.
    #[error("credential activation failed")]
    ActivationFailed,

    /// An AK handle or marshaled blob that this provider never issued
    #[error("unknown attestation key")]
    UnknownAk,

    /// Malformed key material (PEM/DER/point encoding)
    #[error("key codec error: {0}")]
    Codec(String),
}

pub type Result<T> = std::result::Result<T, TpmError>;
