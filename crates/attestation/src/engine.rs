//! Server-side attestation protocol engine.
//!
//! Each gRPC stream runs one session of the state machine
//! `AwaitingParams -> AwaitingChallengeResponse -> Done`; any malformed or
//! out-of-order message terminates the session with a status and no side
//! effects. Sessions are fully independent: the only shared state is the
//! read-only trust store, and the challenge secret is generated fresh per
//! session and dropped with it.

use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::rngs::OsRng;
use rand::RngCore;
use subtle::ConstantTimeEq;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;
use tonic::{Request, Response, Status, Streaming};
use tracing::{info, warn};
use zeroize::Zeroizing;

use fogid_identity::{csr, SpiffeId, TrustStore};
use fogid_tpm::{AttestationMaterial, CredentialIssuer, EkRecord};

use crate::error::AttestationError;
use crate::proto::node_attestation_server::NodeAttestation;
pub use crate::proto::node_attestation_server::NodeAttestationServer;
use crate::proto::{attest_request, attest_response, AttestRequest, AttestResponse};
use crate::TPM_ACTIVATION_TYPE;

const SECRET_LEN: usize = 32;

/// Protocol state of one server-side session.
enum SessionState {
    AwaitingParams,
    AwaitingChallengeResponse {
        secret: Zeroizing<Vec<u8>>,
        requested: SpiffeId,
    },
    Done,
}

/// The attestation gRPC service.
pub struct NodeAttestationService {
    trust: Arc<TrustStore>,
    issuer: Arc<dyn CredentialIssuer>,
    svid_ttl: Duration,
}

impl NodeAttestationService {
    pub fn new(
        trust: Arc<TrustStore>,
        issuer: Arc<dyn CredentialIssuer>,
        svid_ttl: Duration,
    ) -> Self {
        Self {
            trust,
            issuer,
            svid_ttl,
        }
    }

    /// Wrap this service for mounting on a tonic server.
    pub fn into_server(self) -> NodeAttestationServer<Self> {
        NodeAttestationServer::new(self)
    }
}

#[tonic::async_trait]
impl NodeAttestation for NodeAttestationService {
    type AttestStream =
        Pin<Box<dyn Stream<Item = std::result::Result<AttestResponse, Status>> + Send + 'static>>;

    async fn attest(
        &self,
        request: Request<Streaming<AttestRequest>>,
    ) -> std::result::Result<Response<Self::AttestStream>, Status> {
        let mut inbound = request.into_inner();
        let trust = Arc::clone(&self.trust);
        let issuer = Arc::clone(&self.issuer);
        let svid_ttl = self.svid_ttl;

        let (tx, rx) = mpsc::channel(2);
        tokio::spawn(async move {
            if let Err(e) = run_session(&mut inbound, &tx, &trust, issuer.as_ref(), svid_ttl).await
            {
                warn!("attestation session terminated: {e}");
                let _ = tx.send(Err(e.into_status())).await;
            }
        });

        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }
}

async fn run_session(
    inbound: &mut Streaming<AttestRequest>,
    tx: &mpsc::Sender<std::result::Result<AttestResponse, Status>>,
    trust: &TrustStore,
    issuer: &dyn CredentialIssuer,
    svid_ttl: Duration,
) -> std::result::Result<(), AttestationError> {
    let mut state = SessionState::AwaitingParams;

    loop {
        match state {
            SessionState::AwaitingParams => {
                let step = recv_step(inbound).await?;
                let params = match step {
                    attest_request::Step::Params(params) => params,
                    attest_request::Step::ChallengeResponse(_) => {
                        return Err(AttestationError::MalformedMessage(
                            "expected attestation parameters".to_string(),
                        ))
                    }
                };

                let (secret, challenge, requested) = handle_params(params, trust, issuer)?;

                info!("sending attestation challenge");
                send_response(
                    tx,
                    AttestResponse {
                        step: Some(attest_response::Step::Challenge(challenge)),
                    },
                )
                .await?;

                state = SessionState::AwaitingChallengeResponse { secret, requested };
            }
            SessionState::AwaitingChallengeResponse { secret, requested } => {
                let step = recv_step(inbound).await?;
                let response = match step {
                    attest_request::Step::ChallengeResponse(bytes) if !bytes.is_empty() => bytes,
                    attest_request::Step::ChallengeResponse(_) => {
                        return Err(AttestationError::MalformedMessage(
                            "missing challenge response".to_string(),
                        ))
                    }
                    attest_request::Step::Params(_) => {
                        return Err(AttestationError::MalformedMessage(
                            "expected challenge response".to_string(),
                        ))
                    }
                };

                // Constant-time comparison; ordinary equality would leak
                // partial-match information through timing.
                if secret.ct_eq(&response).unwrap_u8() == 0 {
                    return Err(AttestationError::ChallengeMismatch);
                }

                info!(identity = %requested, "successful attestation");
                let svid = issue_svid(&requested, svid_ttl);
                send_response(
                    tx,
                    AttestResponse {
                        step: Some(attest_response::Step::Result(crate::proto::AttestResult {
                            svid: Some(svid),
                        })),
                    },
                )
                .await?;

                state = SessionState::Done;
            }
            SessionState::Done => return Ok(()),
        }
    }
}

/// Step-1 validation and challenge generation. Everything structural is
/// checked before any cryptography runs, and the trust decision is made
/// before a challenge is ever produced.
fn handle_params(
    params: crate::proto::AttestParams,
    trust: &TrustStore,
    issuer: &dyn CredentialIssuer,
) -> std::result::Result<(Zeroizing<Vec<u8>>, Vec<u8>, SpiffeId), AttestationError> {
    info!("received attestation request");

    let data = params
        .data
        .ok_or_else(|| AttestationError::MalformedMessage("missing attestation data".into()))?;
    let svid_params = params
        .params
        .ok_or_else(|| AttestationError::MalformedMessage("missing X509-SVID parameters".into()))?;
    if svid_params.csr.is_empty() {
        return Err(AttestationError::MalformedMessage("missing CSR".into()));
    }
    if data.r#type.is_empty() {
        return Err(AttestationError::MalformedMessage(
            "missing attestation data type".into(),
        ));
    }
    if data.r#type != TPM_ACTIVATION_TYPE {
        return Err(AttestationError::MalformedMessage(format!(
            "unsupported attestation type: {}",
            data.r#type
        )));
    }
    if data.payload.is_empty() {
        return Err(AttestationError::MalformedMessage(
            "missing attestation data payload".into(),
        ));
    }

    let material: AttestationMaterial = serde_json::from_slice(&data.payload)
        .map_err(|e| AttestationError::MalformedMessage(format!("malformed payload: {e}")))?;
    let ek = EkRecord::decode(&material.ek)
        .map_err(|e| AttestationError::MalformedMessage(format!("malformed EK: {e}")))?;

    let requested_uri = csr::extract_identity_uri(&svid_params.csr)?;
    let requested = SpiffeId::parse(&requested_uri)
        .map_err(|e| AttestationError::MalformedMessage(e.to_string()))?;

    // Trust decision. One uniform failure for an unknown key and for a known
    // key requesting the wrong identity; distinguishing them would hand an
    // attacker an oracle over the trust store.
    let fingerprint = ek
        .fingerprint()
        .map_err(|e| AttestationError::MalformedMessage(format!("malformed EK: {e}")))?;
    if !trust.is_authorized_for(&fingerprint, &requested_uri) {
        warn!(%fingerprint, "rejecting untrusted endorsement key");
        return Err(AttestationError::UntrustedEndorsementKey);
    }
    info!(%fingerprint, "processing endorsement key");

    let mut secret = Zeroizing::new(vec![0u8; SECRET_LEN]);
    OsRng.fill_bytes(&mut secret);

    let ek_spki = ek
        .spki_der()
        .map_err(|e| AttestationError::MalformedMessage(format!("malformed EK: {e}")))?;
    let credential = issuer.make_credential(&ek_spki, &material.ak, &secret)?;
    let challenge = serde_json::to_vec(&credential).map_err(|e| {
        AttestationError::MalformedMessage(format!("challenge encoding failed: {e}"))
    })?;

    Ok((secret, challenge, requested))
}

fn issue_svid(requested: &SpiffeId, ttl: Duration) -> crate::proto::X509Svid {
    let expires_at = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .saturating_add(ttl)
        .as_secs() as i64;

    crate::proto::X509Svid {
        id: Some(crate::proto::SpiffeId {
            trust_domain: requested.trust_domain.clone(),
            path: requested.path.clone(),
        }),
        cert_chain: Vec::new(),
        expires_at,
    }
}

async fn recv_step(
    inbound: &mut Streaming<AttestRequest>,
) -> std::result::Result<attest_request::Step, AttestationError> {
    // A close before the session completes is a transport condition, not a
    // malformed message; the peer simply went away.
    let message = inbound.message().await?.ok_or_else(|| {
        AttestationError::Transport(Status::aborted("stream closed before session completed"))
    })?;
    message.step.ok_or_else(|| {
        AttestationError::MalformedMessage("missing protocol step".to_string())
    })
}

async fn send_response(
    tx: &mpsc::Sender<std::result::Result<AttestResponse, Status>>,
    response: AttestResponse,
) -> std::result::Result<(), AttestationError> {
    tx.send(Ok(response))
        .await
        .map_err(|_| AttestationError::Transport(Status::unavailable("response stream closed")))
}
