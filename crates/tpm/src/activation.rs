//! Credential-activation adapter: the two client-side operations the
//! attestation driver needs, expressed over any [`TpmProvider`].

use serde::{Deserialize, Serialize};
use tracing::debug;
use zeroize::Zeroizing;

use crate::credential::EncryptedCredential;
use crate::error::Result;
use crate::provider::{AkParameters, TpmProvider};

/// First-message payload: the encoded endorsement key plus the public
/// parameters of a freshly minted attestation key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttestationMaterial {
    /// PEM-encoded [`EkRecord`](crate::EkRecord)
    pub ek: Vec<u8>,
    pub ak: AkParameters,
}

/// Mint a fresh AK bound to the TPM's endorsement key and export everything a
/// verifier needs to challenge it.
///
/// Returns the material to send and an opaque blob that reloads the same AK
/// later in the session (the handle itself is not returned; callers go
/// through [`solve_challenge`]).
pub fn generate_activation_material<P: TpmProvider + ?Sized>(
    tpm: &mut P,
) -> Result<(AttestationMaterial, Vec<u8>)> {
    let ek = tpm.endorsement_key()?;
    let ak = tpm.create_ak()?;
    let params = tpm.ak_parameters(ak)?;
    let blob = tpm.marshal_ak(ak)?;

    debug!(ak_name = %hex::encode(&params.name), "generated activation material");
    Ok((
        AttestationMaterial {
            ek: ek.encode(),
            ak: params,
        },
        blob,
    ))
}

/// Reload the session AK and decrypt the activation challenge in the TPM.
///
/// An [`ActivationFailed`](crate::TpmError::ActivationFailed) result means
/// this device cannot prove possession of the challenged EK/AK pair; it must
/// not be retried with the same material.
pub fn solve_challenge<P: TpmProvider + ?Sized>(
    tpm: &mut P,
    ak_blob: &[u8],
    credential: &EncryptedCredential,
) -> Result<Zeroizing<Vec<u8>>> {
    let ak = tpm.load_ak(ak_blob)?;
    tpm.activate_credential(ak, credential)
}
