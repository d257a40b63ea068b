//! TPM integration for fogid node attestation.
//!
//! Everything the attestation protocol needs from a TPM sits behind the
//! [`TpmProvider`] trait: enumerate the endorsement key, mint and reload
//! attestation keys, and decrypt activation challenges in hardware. Two
//! providers exist:
//!
//! - [`SoftTpm`]: an in-memory provider that runs the same commitment scheme
//!   with software P-256 keys. Used by the test suite and by deployments
//!   without a TPM device.
//! - `HardwareTpm` (feature `hardware-tpm`): a tss-esapi binding against
//!   `/dev/tpmrm0` or whatever TCTI the environment names.
//!
//! The server-side half of credential activation lives in
//! [`credential::CredentialIssuer`]: encrypt a fresh secret so that only a TPM
//! holding both the named EK and the named AK can recover it. Neither side of
//! this crate makes trust decisions; it only performs the primitives.

pub mod activation;
pub mod credential;
pub mod ek;
pub mod error;
#[cfg(feature = "hardware-tpm")]
pub mod hardware;
pub mod provider;
pub mod soft;

pub use activation::{generate_activation_material, solve_challenge, AttestationMaterial};
pub use credential::{CredentialIssuer, EncryptedCredential, SoftwareCredentialIssuer};
pub use ek::EkRecord;
pub use error::TpmError;
#[cfg(feature = "hardware-tpm")]
pub use hardware::HardwareTpm;
pub use provider::{AkHandle, AkParameters, TpmProvider};
pub use soft::SoftTpm;
