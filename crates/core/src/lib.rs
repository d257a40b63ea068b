//! Shared infrastructure for the fogid node-attestation system.
//!
//! This crate carries the pieces every fogid process needs before it can do
//! anything interesting: structured logging initialization and the TOML
//! configuration model (listen address, trust domain, and the table of
//! endorsement-key fingerprints the server is willing to attest).

pub mod config;
pub mod error;
pub mod logging;

pub use config::{ServerConfig, TrustEntryConfig, DEFAULT_TRUST_DOMAIN};
pub use error::{ConfigError, Result};
