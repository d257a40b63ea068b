//! SPIFFE-style identities for fogid.
//!
//! This crate owns everything identity-shaped in the attestation flow: the
//! `spiffe://` URI type, the certificate signing request a node uses to name
//! the identity it wants, the trust store mapping endorsement-key
//! fingerprints to authorized identities, and the SVID the server issues once
//! attestation succeeds.

pub mod csr;
pub mod error;
pub mod spiffe;
pub mod svid;
pub mod trust_store;

pub use csr::{build_csr, build_csr_with_key, extract_identity_uri};
pub use error::{IdentityError, Result};
pub use spiffe::SpiffeId;
pub use svid::X509Svid;
pub use trust_store::TrustStore;
