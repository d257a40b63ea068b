//! Error types for identity operations.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IdentityError {
    /// Requested identity is not a valid `spiffe://<domain>/<path>` URI
    #[error("invalid identity URI: {0}")]
    InvalidIdentityUri(String),

    /// CSR bytes did not parse as a DER certificate request
    #[error("malformed CSR: {0}")]
    MalformedCsr(String),

    /// CSR parsed but carries no URI subject-alternative-name
    #[error("CSR carries no identity URI")]
    MissingIdentityUri,

    /// More than one URI SAN; the protocol permits exactly one
    #[error("CSR carries more than one identity URI")]
    MultipleIdentityUris,

    /// CSR construction or signing failed
    #[error("CSR generation failed: {0}")]
    Csr(#[from] rcgen::Error),
}

pub type Result<T> = std::result::Result<T, IdentityError>;
