//! The fogid remote-attestation protocol.
//!
//! A node proves, via TPM2.0 credential activation, that it physically holds
//! a pre-registered endorsement key, and receives a SPIFFE-style SVID for the
//! identity bound to that key. One bidirectional gRPC stream carries exactly
//! one session:
//!
//! 1. client → server: attestation material (EK + AK parameters) and a CSR
//!    naming the requested identity;
//! 2. server → client: a fresh secret encrypted so that only a TPM holding
//!    both the named EK and the named AK can recover it;
//! 3. client → server: the recovered secret;
//! 4. server → client: the issued SVID.
//!
//! The server side lives in [`engine`], the client side in [`driver`]. Both
//! are explicit state machines; any out-of-order or structurally incomplete
//! message terminates the session, and nothing is ever issued before the
//! challenge verifies.

pub mod driver;
pub mod engine;
pub mod error;

pub mod proto {
    tonic::include_proto!("fogid.attestation.v1");
}

pub use driver::AttestationDriver;
pub use engine::NodeAttestationService;
pub use error::{AttestationError, Result};

/// The only attestation mechanism this protocol revision speaks.
pub const TPM_ACTIVATION_TYPE: &str = "tpm_activation";
