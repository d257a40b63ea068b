//! The `spiffe://<trust-domain>/<path>` identity URI.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{IdentityError, Result};

const SPIFFE_SCHEME: &str = "spiffe://";

/// A parsed SPIFFE identity.
///
/// The path is stored without its leading slash, so `spiffe://fleet/gcp`
/// has trust domain `fleet` and path `gcp`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpiffeId {
    pub trust_domain: String,
    pub path: String,
}

impl SpiffeId {
    pub fn new(trust_domain: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            trust_domain: trust_domain.into(),
            path: path.into(),
        }
    }

    /// Parse a `spiffe://` URI. The trust domain and path must both be
    /// non-empty; anything else is rejected.
    pub fn parse(uri: &str) -> Result<Self> {
        let rest = uri
            .strip_prefix(SPIFFE_SCHEME)
            .ok_or_else(|| IdentityError::InvalidIdentityUri(uri.to_string()))?;

        let (trust_domain, path) = rest
            .split_once('/')
            .ok_or_else(|| IdentityError::InvalidIdentityUri(uri.to_string()))?;

        if trust_domain.is_empty() || path.is_empty() {
            return Err(IdentityError::InvalidIdentityUri(uri.to_string()));
        }

        Ok(Self {
            trust_domain: trust_domain.to_string(),
            path: path.to_string(),
        })
    }

    pub fn uri(&self) -> String {
        format!("{SPIFFE_SCHEME}{}/{}", self.trust_domain, self.path)
    }
}

impl fmt::Display for SpiffeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.uri())
    }
}
