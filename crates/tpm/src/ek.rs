//! Endorsement key records and their PEM codec.
//!
//! An EK record is either the TPM's endorsement certificate or, for TPMs
//! provisioned without one, the bare endorsement public key. Every piece of
//! cryptography downstream (fingerprinting, credential encryption) uses the
//! DER-encoded SubjectPublicKeyInfo extracted from whichever form is present,
//! so a TPM is identified the same way with or without a certificate.

use ::pem;
use sha2::{Digest, Sha256};
use x509_parser::prelude::*;

use crate::error::{Result, TpmError};

const CERTIFICATE_TAG: &str = "CERTIFICATE";
const PUBLIC_KEY_TAG: &str = "PUBLIC KEY";

/// One TPM's endorsement identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EkRecord {
    /// DER-encoded endorsement certificate
    Certificate(Vec<u8>),
    /// DER-encoded SubjectPublicKeyInfo of the endorsement key
    PublicKey(Vec<u8>),
}

impl EkRecord {
    /// Serialize as a PEM block tagged `CERTIFICATE` or `PUBLIC KEY`.
    pub fn encode(&self) -> Vec<u8> {
        let block = match self {
            EkRecord::Certificate(der) => pem::Pem::new(CERTIFICATE_TAG, der.clone()),
            EkRecord::PublicKey(der) => pem::Pem::new(PUBLIC_KEY_TAG, der.clone()),
        };
        pem::encode(&block).into_bytes()
    }

    /// Parse a PEM block produced by [`EkRecord::encode`].
    pub fn decode(pem_bytes: &[u8]) -> Result<Self> {
        let block = pem::parse(pem_bytes)
            .map_err(|e| TpmError::Codec(format!("invalid EK PEM: {e}")))?;

        match block.tag() {
            CERTIFICATE_TAG => {
                let der = block.into_contents();
                X509Certificate::from_der(&der)
                    .map_err(|e| TpmError::Codec(format!("invalid EK certificate: {e}")))?;
                Ok(EkRecord::Certificate(der))
            }
            PUBLIC_KEY_TAG => {
                let der = block.into_contents();
                SubjectPublicKeyInfo::from_der(&der)
                    .map_err(|e| TpmError::Codec(format!("invalid EK public key: {e}")))?;
                Ok(EkRecord::PublicKey(der))
            }
            other => Err(TpmError::Codec(format!("unexpected PEM tag: {other}"))),
        }
    }

    /// The DER-encoded SubjectPublicKeyInfo of the endorsement key, extracted
    /// from the certificate when one wraps it.
    pub fn spki_der(&self) -> Result<Vec<u8>> {
        match self {
            EkRecord::PublicKey(der) => Ok(der.clone()),
            EkRecord::Certificate(der) => {
                let (_, cert) = X509Certificate::from_der(der)
                    .map_err(|e| TpmError::Codec(format!("invalid EK certificate: {e}")))?;
                Ok(cert.public_key().raw.to_vec())
            }
        }
    }

    /// Lowercase hex SHA-256 of the public-key DER. This is the fingerprint
    /// the trust store is keyed by; it is never taken over the certificate
    /// DER, so it stays stable whether or not a certificate wraps the key.
    pub fn fingerprint(&self) -> Result<String> {
        let spki = self.spki_der()?;
        Ok(hex::encode(Sha256::digest(&spki)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use p256::pkcs8::EncodePublicKey;

    fn sample_spki() -> Vec<u8> {
        let secret = p256::SecretKey::random(&mut rand::thread_rng());
        secret
            .public_key()
            .to_public_key_der()
            .unwrap()
            .into_vec()
    }

    #[test]
    fn public_key_round_trip() {
        let record = EkRecord::PublicKey(sample_spki());
        let encoded = record.encode();
        assert!(encoded.starts_with(b"-----BEGIN PUBLIC KEY-----"));
        let decoded = EkRecord::decode(&encoded).unwrap();
        assert_eq!(record, decoded);
    }

    #[test]
    fn certificate_round_trip_and_fingerprint_matches_bare_key() {
        use p256::pkcs8::EncodePrivateKey;

        let secret = p256::SecretKey::random(&mut rand::thread_rng());
        let spki = secret
            .public_key()
            .to_public_key_der()
            .unwrap()
            .into_vec();

        let pkcs8 = secret.to_pkcs8_der().unwrap();
        let key_pair = rcgen::KeyPair::try_from(pkcs8.as_bytes()).unwrap();
        let params = rcgen::CertificateParams::default();
        let cert = params.self_signed(&key_pair).unwrap();

        let record = EkRecord::Certificate(cert.der().to_vec());
        let decoded = EkRecord::decode(&record.encode()).unwrap();
        assert_eq!(record, decoded);

        // The certificate-wrapped key and the bare key identify the same TPM.
        assert_eq!(
            decoded.fingerprint().unwrap(),
            EkRecord::PublicKey(spki).fingerprint().unwrap()
        );
    }

    #[test]
    fn rejects_foreign_pem_tag() {
        let block = pem::Pem::new("PRIVATE KEY", vec![1, 2, 3]);
        let err = EkRecord::decode(pem::encode(&block).as_bytes()).unwrap_err();
        assert!(matches!(err, TpmError::Codec(_)));
    }

    #[test]
    fn rejects_garbage() {
        assert!(EkRecord::decode(b"not pem at all").is_err());
        let block = pem::Pem::new(super::PUBLIC_KEY_TAG, vec![0u8; 16]);
        assert!(EkRecord::decode(pem::encode(&block).as_bytes()).is_err());
    }
}
