//! The closed error taxonomy of the attestation protocol.
//!
//! Callers branch on kind, never on message text. Two variants are
//! deliberately detail-free: `UntrustedEndorsementKey` says nothing about
//! whether the key was unknown or the requested identity mismatched, and
//! `ChallengeMismatch` never carries the compared values.

use thiserror::Error;

use fogid_identity::IdentityError;
use fogid_tpm::TpmError;

#[derive(Debug, Error)]
pub enum AttestationError {
    /// Structurally invalid or out-of-order protocol message
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// EK fingerprint/identity pair failed the trust-store check. Surfaced
    /// identically regardless of which half failed.
    #[error("invalid endorsement key")]
    UntrustedEndorsementKey,

    /// The TPM could not decrypt the activation challenge (client side)
    #[error("credential activation failed")]
    ActivationFailed,

    /// The returned secret did not match (server side)
    #[error("challenge response does not match")]
    ChallengeMismatch,

    /// Attestation key generation failed on the client
    #[error("attestation key generation failed: {0}")]
    KeyGeneration(String),

    /// TPM open/enumerate failure
    #[error("TPM unavailable: {0}")]
    HardwareUnavailable(String),

    /// Stream read/write failure, including terminal server statuses
    #[error("transport failure: {0}")]
    Transport(#[from] tonic::Status),
}

impl AttestationError {
    /// The gRPC status a session terminates with.
    pub fn into_status(self) -> tonic::Status {
        match self {
            AttestationError::MalformedMessage(_)
            | AttestationError::UntrustedEndorsementKey => {
                tonic::Status::invalid_argument(self.to_string())
            }
            AttestationError::ChallengeMismatch => {
                tonic::Status::permission_denied(self.to_string())
            }
            AttestationError::Transport(status) => status,
            AttestationError::ActivationFailed
            | AttestationError::KeyGeneration(_)
            | AttestationError::HardwareUnavailable(_) => {
                tonic::Status::internal(self.to_string())
            }
        }
    }
}

impl From<TpmError> for AttestationError {
    fn from(e: TpmError) -> Self {
        match e {
            TpmError::HardwareUnavailable(msg) => AttestationError::HardwareUnavailable(msg),
            TpmError::KeyGeneration(msg) => AttestationError::KeyGeneration(msg),
            TpmError::ActivationFailed | TpmError::UnknownAk => AttestationError::ActivationFailed,
            TpmError::Codec(msg) => AttestationError::MalformedMessage(msg),
        }
    }
}

impl From<IdentityError> for AttestationError {
    fn from(e: IdentityError) -> Self {
        AttestationError::MalformedMessage(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AttestationError>;
