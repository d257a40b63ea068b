//! Configuration management for fogid processes.
//!
//! The server loads its listen address, trust domain, SVID lifetime, and the
//! endorsement-key trust table from a TOML file. The trust table is the
//! authoritative list of hardware identities permitted to attest; it is read
//! once at startup and never mutated afterwards.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{ConfigError, Result};

/// Trust domain used when a config file does not override it.
pub const DEFAULT_TRUST_DOMAIN: &str = "spiffe_fog";

fn default_listen_addr() -> String {
    "0.0.0.0:8443".to_string()
}

fn default_trust_domain() -> String {
    DEFAULT_TRUST_DOMAIN.to_string()
}

fn default_svid_ttl_secs() -> u64 {
    3600
}

/// One pre-registered TPM, keyed by the SHA-256 fingerprint of its
/// endorsement public key (DER-encoded SubjectPublicKeyInfo).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustEntryConfig {
    /// Lowercase hex SHA-256 of the EK public key DER
    pub fingerprint: String,
    /// Identity granted to this TPM, e.g. "gcp" -> spiffe://<domain>/gcp
    pub identity: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_trust_domain")]
    pub trust_domain: String,
    #[serde(default = "default_svid_ttl_secs")]
    pub svid_ttl_secs: u64,
    #[serde(default)]
    pub trust: Vec<TrustEntryConfig>,
}

impl ServerConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ServerConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.trust_domain.is_empty() {
            return Err(ConfigError::Invalid("trust_domain is empty".to_string()));
        }
        for entry in &self.trust {
            if entry.fingerprint.len() != 64
                || !entry.fingerprint.chars().all(|c| c.is_ascii_hexdigit())
            {
                return Err(ConfigError::Invalid(format!(
                    "fingerprint for {} is not a hex SHA-256 digest",
                    entry.identity
                )));
            }
            if entry.identity.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "empty identity for fingerprint {}",
                    entry.fingerprint
                )));
            }
        }
        Ok(())
    }

    /// Trust table matching the initially deployed fleet: one GCP vTPM and one
    /// Raspberry Pi with an Infineon TPM.
    pub fn default_config() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            trust_domain: default_trust_domain(),
            svid_ttl_secs: default_svid_ttl_secs(),
            trust: vec![
                TrustEntryConfig {
                    fingerprint: "ae76715da45c546d57473816bb7402b467ac7e11d76ae43205769b65e3821f9d"
                        .to_string(),
                    identity: "gcp".to_string(),
                },
                TrustEntryConfig {
                    fingerprint: "ae8dec3321f80ab68bdde38e3cf7d59612be0c0a608def2c3d55a63fd875e32c"
                        .to_string(),
                    identity: "rpi".to_string(),
                },
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_config() {
        let raw = r#"
            listen_addr = "127.0.0.1:9000"
            trust_domain = "example_fleet"
            svid_ttl_secs = 600

            [[trust]]
            fingerprint = "ae76715da45c546d57473816bb7402b467ac7e11d76ae43205769b65e3821f9d"
            identity = "gcp"
        "#;
        let config: ServerConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:9000");
        assert_eq!(config.trust_domain, "example_fleet");
        assert_eq!(config.svid_ttl_secs, 600);
        assert_eq!(config.trust.len(), 1);
        assert_eq!(config.trust[0].identity, "gcp");
    }

    #[test]
    fn defaults_apply_when_fields_missing() {
        let config: ServerConfig = toml::from_str("").unwrap();
        assert_eq!(config.trust_domain, DEFAULT_TRUST_DOMAIN);
        assert_eq!(config.svid_ttl_secs, 3600);
        assert!(config.trust.is_empty());
    }

    #[test]
    fn rejects_bad_fingerprint() {
        let config = ServerConfig {
            trust: vec![TrustEntryConfig {
                fingerprint: "not-hex".to_string(),
                identity: "gcp".to_string(),
            }],
            ..ServerConfig::default_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn default_config_is_valid() {
        let config = ServerConfig::default_config();
        assert!(config.validate().is_ok());
        assert_eq!(config.trust.len(), 2);
    }
}
