//! Building and parsing identity certificate signing requests.
//!
//! The only protocol-relevant content of a fogid CSR is a single URI
//! subject-alternative-name carrying the requested SPIFFE identity. Requests
//! are signed with a caller-held P-256 key; the key never travels.

use rcgen::{CertificateParams, DnType, Ia5String, KeyPair, SanType};
use x509_parser::prelude::*;

use crate::error::{IdentityError, Result};
use crate::spiffe::SpiffeId;

/// Build a CSR for `id`, generating a fresh P-256 signing key.
///
/// Returns the DER request and the key pair so the caller can later prove
/// ownership of the issued certificate.
pub fn build_csr(id: &SpiffeId) -> Result<(Vec<u8>, KeyPair)> {
    let key = KeyPair::generate()?;
    let der = build_csr_with_key(id, &key)?;
    Ok((der, key))
}

/// Build a CSR for `id` signed with a caller-supplied key.
pub fn build_csr_with_key(id: &SpiffeId, key: &KeyPair) -> Result<Vec<u8>> {
    let uri = Ia5String::try_from(id.uri())
        .map_err(|_| IdentityError::InvalidIdentityUri(id.uri()))?;

    let mut params = CertificateParams::default();
    params
        .distinguished_name
        .push(DnType::OrganizationName, "fogid");
    params.subject_alt_names.push(SanType::URI(uri));

    let csr = params.serialize_request(key)?;
    Ok(csr.der().to_vec())
}

/// Extract the requested identity URI from a DER CSR.
///
/// The request's self-signature is verified first, so a CSR tampered in
/// transit fails here rather than being half-honored downstream.
///
/// Exactly one URI SAN is accepted: zero is [`IdentityError::
/// MissingIdentityUri`], more than one is [`IdentityError::
/// MultipleIdentityUris`].
pub fn extract_identity_uri(csr_der: &[u8]) -> Result<String> {
    let (_, csr) = X509CertificationRequest::from_der(csr_der)
        .map_err(|e| IdentityError::MalformedCsr(e.to_string()))?;
    csr.verify_signature()
        .map_err(|e| IdentityError::MalformedCsr(format!("signature check failed: {e}")))?;

    let mut uris = Vec::new();
    if let Some(extensions) = csr.requested_extensions() {
        for extension in extensions {
            if let ParsedExtension::SubjectAlternativeName(san) = extension {
                for name in &san.general_names {
                    if let GeneralName::URI(uri) = name {
                        uris.push(uri.to_string());
                    }
                }
            }
        }
    }

    match uris.len() {
        0 => Err(IdentityError::MissingIdentityUri),
        1 => Ok(uris.remove(0)),
        _ => Err(IdentityError::MultipleIdentityUris),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_then_extract_round_trip() {
        let id = SpiffeId::new("spiffe_fog", "gcp");
        let (der, _key) = build_csr(&id).unwrap();
        assert_eq!(extract_identity_uri(&der).unwrap(), "spiffe://spiffe_fog/gcp");
    }

    #[test]
    fn caller_supplied_key_is_used() {
        let id = SpiffeId::new("spiffe_fog", "rpi");
        let key = KeyPair::generate().unwrap();
        let der = build_csr_with_key(&id, &key).unwrap();
        assert_eq!(extract_identity_uri(&der).unwrap(), id.uri());
    }

    #[test]
    fn tampered_csr_fails_signature_check() {
        let id = SpiffeId::new("spiffe_fog", "gcp");
        let (mut der, _key) = build_csr(&id).unwrap();
        // The signature sits at the tail of the request.
        let last = der.len() - 1;
        der[last] ^= 0x01;

        assert!(matches!(
            extract_identity_uri(&der),
            Err(IdentityError::MalformedCsr(_))
        ));
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(matches!(
            extract_identity_uri(&[0u8; 32]),
            Err(IdentityError::MalformedCsr(_))
        ));
    }

    #[test]
    fn csr_without_uri_san_is_rejected() {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::default();
        params
            .distinguished_name
            .push(DnType::OrganizationName, "fogid");
        let der = params.serialize_request(&key).unwrap().der().to_vec();

        assert!(matches!(
            extract_identity_uri(&der),
            Err(IdentityError::MissingIdentityUri)
        ));
    }

    #[test]
    fn csr_with_two_uri_sans_is_rejected() {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::default();
        params.subject_alt_names.push(SanType::URI(
            Ia5String::try_from("spiffe://spiffe_fog/gcp".to_string()).unwrap(),
        ));
        params.subject_alt_names.push(SanType::URI(
            Ia5String::try_from("spiffe://spiffe_fog/rpi".to_string()).unwrap(),
        ));
        let der = params.serialize_request(&key).unwrap().der().to_vec();

        assert!(matches!(
            extract_identity_uri(&der),
            Err(IdentityError::MultipleIdentityUris)
        ));
    }
}
