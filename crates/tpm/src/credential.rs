//! Server-side credential protection (TPM2 MakeCredential analogue).
//!
//! The verifier commits to a random secret by encrypting it such that only a
//! TPM holding both the named endorsement key and the named attestation key
//! can recover it. The software scheme here mirrors the ECC form of TPM2
//! MakeCredential: an ephemeral ECDH agreement against the EK public key
//! yields a seed, the seal key is derived from that seed and the AK name, and
//! the secret is sealed with an AEAD that also authenticates the AK name.
//! Swapping either key breaks decryption.

use chacha20poly1305::aead::{Aead, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, KeyInit, Nonce};
use p256::ecdh::EphemeralSecret;
use p256::pkcs8::DecodePublicKey;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Result, TpmError};
use crate::provider::AkParameters;

/// AEAD nonce length for the sealed credential.
pub(crate) const SEAL_NONCE_LEN: usize = 12;

/// The encrypted half of an activation challenge.
///
/// Field names follow the TPM2 wire structures: `id_object` carries the
/// sealed credential, `encrypted_secret` the encrypted seed (here, the
/// ephemeral public key). Only this structure crosses the network; the plain
/// secret stays with the verifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedCredential {
    pub id_object: Vec<u8>,
    pub encrypted_secret: Vec<u8>,
}

/// Produces activation challenges for a verifier.
pub trait CredentialIssuer: Send + Sync {
    /// Encrypt `secret` to the endorsement key `ek_spki_der` and the
    /// attestation key named by `ak`.
    fn make_credential(
        &self,
        ek_spki_der: &[u8],
        ak: &AkParameters,
        secret: &[u8],
    ) -> Result<EncryptedCredential>;
}

/// Software issuer matching [`SoftTpm`](crate::SoftTpm)'s activation scheme.
#[derive(Debug, Default, Clone, Copy)]
pub struct SoftwareCredentialIssuer;

impl CredentialIssuer for SoftwareCredentialIssuer {
    fn make_credential(
        &self,
        ek_spki_der: &[u8],
        ak: &AkParameters,
        secret: &[u8],
    ) -> Result<EncryptedCredential> {
        let ek_public = p256::PublicKey::from_public_key_der(ek_spki_der)
            .map_err(|e| TpmError::Codec(format!("EK is not a P-256 public key: {e}")))?;

        let ephemeral = EphemeralSecret::random(&mut OsRng);
        let ephemeral_public = ephemeral.public_key().to_sec1_bytes().to_vec();
        let shared = ephemeral.diffie_hellman(&ek_public);

        let key = derive_seal_key(shared.raw_secret_bytes().as_slice(), &ak.name);
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));

        let mut nonce = [0u8; SEAL_NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: secret,
                    aad: &ak.name,
                },
            )
            .map_err(|_| TpmError::Codec("credential seal failed".to_string()))?;

        let mut id_object = nonce.to_vec();
        id_object.extend_from_slice(&ciphertext);

        Ok(EncryptedCredential {
            id_object,
            encrypted_secret: ephemeral_public,
        })
    }
}

/// Seal-key derivation shared by the issuer and the software TPM. Binding the
/// AK name into the KDF (and the AEAD additional data) is what makes the
/// challenge unsolvable with the right EK but the wrong AK.
pub(crate) fn derive_seal_key(shared_secret: &[u8], ak_name: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b"fogid-credential-activation-v1");
    hasher.update(shared_secret);
    hasher.update(ak_name);
    hasher.finalize().into()
}
