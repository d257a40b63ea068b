//! Attestation server: loads the trust store, mounts the node-attestation
//! service, and serves it over gRPC.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tonic::transport::Server;
use tracing::info;

use fogid_attestation::NodeAttestationService;
use fogid_core::config::ServerConfig;
use fogid_identity::TrustStore;
use fogid_tpm::SoftwareCredentialIssuer;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    fogid_core::logging::init();

    let config = match parse_config_path(&std::env::args().collect::<Vec<_>>())? {
        Some(path) => ServerConfig::from_file(&path)?,
        None => {
            info!("no --config given, using built-in defaults");
            ServerConfig::default_config()
        }
    };

    let addr = config.listen_addr.parse()?;
    let trust = Arc::new(TrustStore::new(&config.trust_domain, &config.trust));
    info!(
        trust_domain = %config.trust_domain,
        registered_keys = config.trust.len(),
        "trust store loaded"
    );

    let service = NodeAttestationService::new(
        trust,
        Arc::new(SoftwareCredentialIssuer),
        Duration::from_secs(config.svid_ttl_secs),
    );

    info!(%addr, "attestation server listening");
    Server::builder()
        .add_service(service.into_server())
        .serve(addr)
        .await?;

    Ok(())
}

fn parse_config_path(args: &[String]) -> Result<Option<PathBuf>, Box<dyn std::error::Error>> {
    let mut args_iter = args.iter();
    while let Some(arg) = args_iter.next() {
        if arg == "--config" {
            if let Some(path) = args_iter.next() {
                return Ok(Some(PathBuf::from(path)));
            }
            return Err("--config was provided without a path".into());
        }
    }
    Ok(None)
}
