//! The capability interface every TPM backend implements.

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::credential::EncryptedCredential;
use crate::ek::EkRecord;
use crate::error::Result;

/// Opaque handle to a TPM-resident attestation key.
///
/// Handles are only meaningful to the provider that issued them and never
/// leave the process; the network representation of an AK is
/// [`AkParameters`], and the reloadable representation is the blob returned
/// by [`TpmProvider::marshal_ak`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AkHandle(pub(crate) u32);

/// The public portion of an attestation key as exported to a verifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AkParameters {
    /// Public key material (software providers: SEC1 point encoding)
    pub public: Vec<u8>,
    /// TPM name of the key; the credential-activation KDF binds to this
    pub name: Vec<u8>,
}

/// Capability interface over a TPM.
///
/// A provider is a scoped resource: it is acquired once per attestation
/// attempt and releases hardware handles when dropped, so early-failure paths
/// cannot exhaust the TPM for subsequent attempts. Implementations perform
/// cryptographic primitives only; none of them evaluate trust.
pub trait TpmProvider {
    /// The first enumerable endorsement key.
    ///
    /// Fails with [`TpmError::HardwareUnavailable`](crate::TpmError) when the
    /// TPM exposes none.
    fn endorsement_key(&mut self) -> Result<EkRecord>;

    /// Create a fresh attestation key bound to the endorsement hierarchy.
    fn create_ak(&mut self) -> Result<AkHandle>;

    /// Reload an attestation key from a blob produced by [`Self::marshal_ak`].
    fn load_ak(&mut self, blob: &[u8]) -> Result<AkHandle>;

    /// Export the public parameters of a loaded attestation key.
    fn ak_parameters(&self, ak: AkHandle) -> Result<AkParameters>;

    /// Export an opaque blob from which this provider can reload the exact
    /// same key later in the same session.
    fn marshal_ak(&self, ak: AkHandle) -> Result<Vec<u8>>;

    /// Decrypt an activation credential inside the TPM, proving the loaded AK
    /// is resident in the same TPM as the endorsement key the credential was
    /// encrypted to.
    fn activate_credential(
        &mut self,
        ak: AkHandle,
        credential: &EncryptedCredential,
    ) -> Result<Zeroizing<Vec<u8>>>;
}
