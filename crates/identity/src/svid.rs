//! The issued identity document.

use serde::{Deserialize, Serialize};

use crate::spiffe::SpiffeId;

/// A minimally populated X.509 SVID.
///
/// Issued exactly once per successful attestation session and owned by the
/// caller thereafter; the server keeps no record of it. The chain may be
/// empty while no signing authority is wired in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct X509Svid {
    pub id: SpiffeId,
    /// DER certificates, leaf first; may be empty
    pub cert_chain: Vec<Vec<u8>>,
    /// Unix timestamp (seconds); 0 means no expiry was stamped
    pub expires_at: i64,
}

impl X509Svid {
    pub fn new(id: SpiffeId, expires_at: i64) -> Self {
        Self {
            id,
            cert_chain: Vec::new(),
            expires_at,
        }
    }
}
