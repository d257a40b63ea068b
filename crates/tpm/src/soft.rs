//! In-memory TPM provider.
//!
//! `SoftTpm` holds software P-256 keys and performs the same credential
//! activation scheme as [`SoftwareCredentialIssuer`](crate::credential::
//! SoftwareCredentialIssuer), which makes the full attestation protocol
//! testable deterministically and without hardware. Keys live only as long as
//! the provider instance, matching the one-attempt-per-handle lifecycle of
//! the hardware binding.

use std::collections::HashMap;

use chacha20poly1305::aead::{Aead, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, KeyInit, Nonce};
use p256::pkcs8::EncodePublicKey;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::credential::{derive_seal_key, EncryptedCredential, SEAL_NONCE_LEN};
use crate::ek::EkRecord;
use crate::error::{Result, TpmError};
use crate::provider::{AkHandle, AkParameters, TpmProvider};

struct SoftAk {
    // The AK private half is never used by the activation scheme itself (the
    // TPM proves possession by decrypting, not signing), but a real AK is a
    // signing key, so the software one is too.
    secret: p256::SecretKey,
    public_sec1: Vec<u8>,
    name: Vec<u8>,
    blob: [u8; 16],
}

/// Software TPM with one endorsement key and any number of session AKs.
pub struct SoftTpm {
    ek_secret: Option<p256::SecretKey>,
    ek_certificate: Option<Vec<u8>>,
    aks: HashMap<u32, SoftAk>,
    blobs: HashMap<[u8; 16], u32>,
    next_handle: u32,
}

impl SoftTpm {
    /// A TPM with a freshly generated endorsement key.
    pub fn new() -> Self {
        Self::with_endorsement_key(p256::SecretKey::random(&mut OsRng))
    }

    /// A TPM with a caller-supplied endorsement key, for fixtures whose EK
    /// fingerprint must be known up front.
    pub fn with_endorsement_key(ek_secret: p256::SecretKey) -> Self {
        Self {
            ek_secret: Some(ek_secret),
            ek_certificate: None,
            aks: HashMap::new(),
            blobs: HashMap::new(),
            next_handle: 1,
        }
    }

    /// A TPM that enumerates no endorsement key at all.
    pub fn without_endorsement_key() -> Self {
        Self {
            ek_secret: None,
            ek_certificate: None,
            aks: HashMap::new(),
            blobs: HashMap::new(),
            next_handle: 1,
        }
    }

    /// Attach a DER endorsement certificate; [`TpmProvider::endorsement_key`]
    /// then reports the certificate form instead of the bare key.
    pub fn set_endorsement_certificate(&mut self, cert_der: Vec<u8>) {
        self.ek_certificate = Some(cert_der);
    }

    /// The EK public key as SubjectPublicKeyInfo DER.
    pub fn ek_spki_der(&self) -> Result<Vec<u8>> {
        let secret = self
            .ek_secret
            .as_ref()
            .ok_or_else(|| TpmError::HardwareUnavailable("no EK provisioned".to_string()))?;
        secret
            .public_key()
            .to_public_key_der()
            .map(|der| der.into_vec())
            .map_err(|e| TpmError::Codec(format!("EK SPKI encoding failed: {e}")))
    }

    fn ak(&self, handle: AkHandle) -> Result<&SoftAk> {
        self.aks.get(&handle.0).ok_or(TpmError::UnknownAk)
    }
}

impl Default for SoftTpm {
    fn default() -> Self {
        Self::new()
    }
}

impl TpmProvider for SoftTpm {
    fn endorsement_key(&mut self) -> Result<EkRecord> {
        if let Some(cert) = &self.ek_certificate {
            return Ok(EkRecord::Certificate(cert.clone()));
        }
        self.ek_spki_der().map(EkRecord::PublicKey)
    }

    fn create_ak(&mut self) -> Result<AkHandle> {
        let secret = p256::SecretKey::random(&mut OsRng);
        let public_sec1 = secret.public_key().to_sec1_bytes().to_vec();
        let name = Sha256::digest(&public_sec1).to_vec();

        let mut blob = [0u8; 16];
        OsRng.fill_bytes(&mut blob);

        let handle = self.next_handle;
        self.next_handle += 1;
        self.aks.insert(
            handle,
            SoftAk {
                secret,
                public_sec1,
                name,
                blob,
            },
        );
        self.blobs.insert(blob, handle);
        Ok(AkHandle(handle))
    }

    fn load_ak(&mut self, blob: &[u8]) -> Result<AkHandle> {
        let blob: [u8; 16] = blob.try_into().map_err(|_| TpmError::UnknownAk)?;
        let original = *self.blobs.get(&blob).ok_or(TpmError::UnknownAk)?;
        let ak = self.aks.get(&original).ok_or(TpmError::UnknownAk)?;

        let reloaded = SoftAk {
            secret: ak.secret.clone(),
            public_sec1: ak.public_sec1.clone(),
            name: ak.name.clone(),
            blob,
        };
        let handle = self.next_handle;
        self.next_handle += 1;
        self.aks.insert(handle, reloaded);
        Ok(AkHandle(handle))
    }

    fn ak_parameters(&self, ak: AkHandle) -> Result<AkParameters> {
        let ak = self.ak(ak)?;
        Ok(AkParameters {
            public: ak.public_sec1.clone(),
            name: ak.name.clone(),
        })
    }

    fn marshal_ak(&self, ak: AkHandle) -> Result<Vec<u8>> {
        Ok(self.ak(ak)?.blob.to_vec())
    }

    fn activate_credential(
        &mut self,
        ak: AkHandle,
        credential: &EncryptedCredential,
    ) -> Result<Zeroizing<Vec<u8>>> {
        let ak_name = self.ak(ak)?.name.clone();
        let ek_secret = self
            .ek_secret
            .as_ref()
            .ok_or_else(|| TpmError::HardwareUnavailable("no EK provisioned".to_string()))?;

        let ephemeral_public = p256::PublicKey::from_sec1_bytes(&credential.encrypted_secret)
            .map_err(|_| TpmError::ActivationFailed)?;
        let shared = p256::ecdh::diffie_hellman(
            ek_secret.to_nonzero_scalar(),
            ephemeral_public.as_affine(),
        );

        if credential.id_object.len() <= SEAL_NONCE_LEN {
            return Err(TpmError::ActivationFailed);
        }
        let (nonce, ciphertext) = credential.id_object.split_at(SEAL_NONCE_LEN);

        let key = derive_seal_key(shared.raw_secret_bytes().as_slice(), &ak_name);
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
        let secret = cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: &ak_name,
                },
            )
            .map_err(|_| TpmError::ActivationFailed)?;

        Ok(Zeroizing::new(secret))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::{CredentialIssuer, SoftwareCredentialIssuer};

    #[test]
    fn make_then_activate_recovers_secret() {
        let mut tpm = SoftTpm::new();
        let ak = tpm.create_ak().unwrap();
        let params = tpm.ak_parameters(ak).unwrap();

        let secret = b"correct horse battery staple".to_vec();
        let credential = SoftwareCredentialIssuer
            .make_credential(&tpm.ek_spki_der().unwrap(), &params, &secret)
            .unwrap();

        let recovered = tpm.activate_credential(ak, &credential).unwrap();
        assert_eq!(recovered.as_slice(), secret.as_slice());
    }

    #[test]
    fn reloaded_ak_activates_the_same_credential() {
        let mut tpm = SoftTpm::new();
        let ak = tpm.create_ak().unwrap();
        let params = tpm.ak_parameters(ak).unwrap();
        let blob = tpm.marshal_ak(ak).unwrap();

        let credential = SoftwareCredentialIssuer
            .make_credential(&tpm.ek_spki_der().unwrap(), &params, b"secret")
            .unwrap();

        let reloaded = tpm.load_ak(&blob).unwrap();
        let recovered = tpm.activate_credential(reloaded, &credential).unwrap();
        assert_eq!(recovered.as_slice(), b"secret");
    }

    #[test]
    fn wrong_ek_cannot_activate() {
        let mut tpm = SoftTpm::new();
        let ak = tpm.create_ak().unwrap();
        let params = tpm.ak_parameters(ak).unwrap();

        let mut other_tpm = SoftTpm::new();
        let other_ak = other_tpm.create_ak().unwrap();

        // Encrypted to the first TPM's EK, presented to the second.
        let credential = SoftwareCredentialIssuer
            .make_credential(&tpm.ek_spki_der().unwrap(), &params, b"secret")
            .unwrap();
        assert!(matches!(
            other_tpm.activate_credential(other_ak, &credential),
            Err(TpmError::ActivationFailed)
        ));
    }

    #[test]
    fn wrong_ak_cannot_activate() {
        let mut tpm = SoftTpm::new();
        let ak = tpm.create_ak().unwrap();
        let params = tpm.ak_parameters(ak).unwrap();
        let other_ak = tpm.create_ak().unwrap();

        let credential = SoftwareCredentialIssuer
            .make_credential(&tpm.ek_spki_der().unwrap(), &params, b"secret")
            .unwrap();
        // Right TPM, wrong key: the AK name no longer matches the KDF input.
        assert!(matches!(
            tpm.activate_credential(other_ak, &credential),
            Err(TpmError::ActivationFailed)
        ));
    }

    #[test]
    fn tampered_credential_fails() {
        let mut tpm = SoftTpm::new();
        let ak = tpm.create_ak().unwrap();
        let params = tpm.ak_parameters(ak).unwrap();

        let mut credential = SoftwareCredentialIssuer
            .make_credential(&tpm.ek_spki_der().unwrap(), &params, b"secret")
            .unwrap();
        let last = credential.id_object.len() - 1;
        credential.id_object[last] ^= 0x01;

        assert!(matches!(
            tpm.activate_credential(ak, &credential),
            Err(TpmError::ActivationFailed)
        ));
    }

    #[test]
    fn unknown_handles_and_blobs_are_rejected() {
        let mut tpm = SoftTpm::new();
        assert!(matches!(
            tpm.ak_parameters(AkHandle(42)),
            Err(TpmError::UnknownAk)
        ));
        assert!(matches!(tpm.load_ak(b"bogus"), Err(TpmError::UnknownAk)));
    }
}
