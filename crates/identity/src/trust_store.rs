//! The endorsement-key trust store.
//!
//! A static mapping from EK public-key fingerprint to the single identity
//! that hardware is authorized to claim. Built once from injected
//! configuration at startup and read-only afterwards, so concurrent
//! attestation sessions share it without locking.

use std::collections::HashMap;

use tracing::debug;

use fogid_core::config::TrustEntryConfig;

use crate::spiffe::SpiffeId;

pub struct TrustStore {
    trust_domain: String,
    entries: HashMap<String, String>,
}

impl TrustStore {
    pub fn new(trust_domain: impl Into<String>, entries: &[TrustEntryConfig]) -> Self {
        let entries = entries
            .iter()
            .map(|e| (e.fingerprint.to_ascii_lowercase(), e.identity.clone()))
            .collect();
        Self {
            trust_domain: trust_domain.into(),
            entries,
        }
    }

    pub fn trust_domain(&self) -> &str {
        &self.trust_domain
    }

    /// The identity registered for this fingerprint, if any.
    pub fn lookup(&self, ek_fingerprint: &str) -> Option<&str> {
        self.entries
            .get(&ek_fingerprint.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// The trust decision: the fingerprint must be registered AND the
    /// requested URI must exactly equal the canonical identity derived from
    /// the registration. Callers surface a single uniform failure for either
    /// miss so the error channel reveals nothing about the store's contents.
    pub fn is_authorized_for(&self, ek_fingerprint: &str, requested_uri: &str) -> bool {
        let Some(identity) = self.lookup(ek_fingerprint) else {
            return false;
        };
        let expected = SpiffeId::new(self.trust_domain.clone(), identity).uri();
        if expected != requested_uri {
            return false;
        }
        debug!(%ek_fingerprint, %requested_uri, "endorsement key authorized");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GCP_FP: &str = "ae76715da45c546d57473816bb7402b467ac7e11d76ae43205769b65e3821f9d";

    fn store() -> TrustStore {
        TrustStore::new(
            "spiffe_fog",
            &[TrustEntryConfig {
                fingerprint: GCP_FP.to_string(),
                identity: "gcp".to_string(),
            }],
        )
    }

    #[test]
    fn lookup_finds_registered_fingerprint() {
        assert_eq!(store().lookup(GCP_FP), Some("gcp"));
        assert_eq!(store().lookup(&GCP_FP.to_ascii_uppercase()), Some("gcp"));
        assert_eq!(store().lookup("00ff"), None);
    }

    #[test]
    fn authorization_requires_both_fingerprint_and_path() {
        let store = store();
        assert!(store.is_authorized_for(GCP_FP, "spiffe://spiffe_fog/gcp"));
        // Registered key asking for someone else's identity.
        assert!(!store.is_authorized_for(GCP_FP, "spiffe://spiffe_fog/rpi"));
        // Unknown key asking for a registered identity.
        assert!(!store.is_authorized_for("deadbeef", "spiffe://spiffe_fog/gcp"));
        // Wrong trust domain.
        assert!(!store.is_authorized_for(GCP_FP, "spiffe://other_domain/gcp"));
    }
}
