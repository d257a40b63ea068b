//! Attestation agent: runs one attestation exchange against a fogid server
//! and prints the issued SVID.
//!
//! With the `hardware-tpm` feature the agent talks to the device named by the
//! TCTI environment; otherwise it runs an in-memory software TPM, which is
//! useful for bring-up against a server whose trust store knows the software
//! EK fingerprint.

use tracing::{error, info};

use fogid_attestation::proto::node_attestation_client::NodeAttestationClient;
use fogid_attestation::AttestationDriver;
use fogid_core::DEFAULT_TRUST_DOMAIN;
use fogid_identity::SpiffeId;

const DEFAULT_SERVER: &str = "http://127.0.0.1:8443";

struct AgentArgs {
    server: String,
    identity: String,
    trust_domain: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    fogid_core::logging::init();

    let args = parse_args(&std::env::args().collect::<Vec<_>>())?;
    // --identity accepts either a full spiffe:// URI or a bare name under
    // the trust domain.
    let identity = if args.identity.starts_with("spiffe://") {
        SpiffeId::parse(&args.identity)?
    } else {
        SpiffeId::new(args.trust_domain.clone(), args.identity.clone())
    };

    #[cfg(feature = "hardware-tpm")]
    let mut tpm = fogid_tpm::HardwareTpm::open()?;
    #[cfg(not(feature = "hardware-tpm"))]
    let mut tpm = fogid_tpm::SoftTpm::new();

    info!(server = %args.server, identity = %identity, "starting attestation");
    let mut client = NodeAttestationClient::connect(args.server.clone()).await?;

    match AttestationDriver::new(&mut tpm, identity).attest(&mut client).await {
        Ok(svid) => {
            println!("issued SVID: {}", svid.id.uri());
            println!("expires at (unix): {}", svid.expires_at);
            println!("certificates in chain: {}", svid.cert_chain.len());
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "attestation failed");
            Err(e.into())
        }
    }
}

fn parse_args(args: &[String]) -> Result<AgentArgs, Box<dyn std::error::Error>> {
    let mut server = DEFAULT_SERVER.to_string();
    let mut identity = None;
    let mut trust_domain = DEFAULT_TRUST_DOMAIN.to_string();

    let mut args_iter = args.iter().skip(1);
    while let Some(arg) = args_iter.next() {
        match arg.as_str() {
            "--server" => {
                server = args_iter
                    .next()
                    .ok_or("--server was provided without a URL")?
                    .clone();
            }
            "--identity" => {
                identity = Some(
                    args_iter
                        .next()
                        .ok_or("--identity was provided without a name or spiffe:// URI")?
                        .clone(),
                );
            }
            "--trust-domain" => {
                trust_domain = args_iter
                    .next()
                    .ok_or("--trust-domain was provided without a value")?
                    .clone();
            }
            other => return Err(format!("unrecognized argument: {other}").into()),
        }
    }

    let identity = identity.ok_or("missing required --identity argument")?;
    Ok(AgentArgs {
        server,
        identity,
        trust_domain,
    })
}
