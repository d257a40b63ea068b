//! Client-side attestation driver.
//!
//! Mirrors the server engine with the state machine `PreparingMaterial ->
//! AwaitingChallenge -> SolvingChallenge -> AwaitingResult -> Done`. The TPM
//! provider is scoped to one attempt; every failure is terminal for the
//! session, and retrying means starting a whole new stream with fresh
//! material.

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::Channel;
use tonic::{Request, Status};
use tracing::{debug, info};

use fogid_identity::{csr, SpiffeId, X509Svid};
use fogid_tpm::{
    activation::{generate_activation_material, solve_challenge},
    EncryptedCredential, TpmProvider,
};

use crate::error::{AttestationError, Result};
use crate::proto::node_attestation_client::NodeAttestationClient;
use crate::proto::{attest_request, attest_response, AttestRequest, AttestResponse};
use crate::TPM_ACTIVATION_TYPE;

/// Drives one attestation attempt against a server.
pub struct AttestationDriver<'a, P: TpmProvider> {
    tpm: &'a mut P,
    identity: SpiffeId,
}

impl<'a, P: TpmProvider> AttestationDriver<'a, P> {
    pub fn new(tpm: &'a mut P, identity: SpiffeId) -> Self {
        Self { tpm, identity }
    }

    /// Run the full exchange and return the issued SVID.
    pub async fn attest(mut self, client: &mut NodeAttestationClient<Channel>) -> Result<X509Svid> {
        // PreparingMaterial: mint the session AK and name the identity we
        // want in a CSR, then send both as the single params step.
        let (material, ak_blob) = generate_activation_material(self.tpm)?;
        let payload = serde_json::to_vec(&material).map_err(|e| {
            AttestationError::MalformedMessage(format!("material encoding failed: {e}"))
        })?;
        let (csr_der, _key) = csr::build_csr(&self.identity)?;

        let (tx, rx) = mpsc::channel(2);
        let mut inbound = client
            .attest(Request::new(ReceiverStream::new(rx)))
            .await?
            .into_inner();

        send_step(
            &tx,
            attest_request::Step::Params(crate::proto::AttestParams {
                data: Some(crate::proto::AttestationData {
                    r#type: TPM_ACTIVATION_TYPE.to_string(),
                    payload,
                }),
                params: Some(crate::proto::SvidParams { csr: csr_der }),
            }),
        )
        .await?;
        debug!(identity = %self.identity, "sent attestation parameters");

        // AwaitingChallenge: the next server message must be the challenge.
        let challenge = match recv_step(&mut inbound).await? {
            attest_response::Step::Challenge(bytes) => bytes,
            attest_response::Step::Result(_) => {
                return Err(AttestationError::MalformedMessage(
                    "server sent a result before the challenge".to_string(),
                ))
            }
        };
        let credential: EncryptedCredential = serde_json::from_slice(&challenge)
            .map_err(|e| AttestationError::MalformedMessage(format!("malformed challenge: {e}")))?;

        // SolvingChallenge: decrypt inside the TPM. A failure here means this
        // device cannot prove possession; it is fatal for the session.
        let secret = solve_challenge(self.tpm, &ak_blob, &credential)?;
        send_step(
            &tx,
            attest_request::Step::ChallengeResponse(secret.to_vec()),
        )
        .await?;
        debug!("sent challenge response");

        // AwaitingResult: the final message carries the SVID.
        let svid = match recv_step(&mut inbound).await? {
            attest_response::Step::Result(result) => result.svid.ok_or_else(|| {
                AttestationError::MalformedMessage("result carries no SVID".to_string())
            })?,
            attest_response::Step::Challenge(_) => {
                return Err(AttestationError::MalformedMessage(
                    "server sent a second challenge".to_string(),
                ))
            }
        };

        let id = svid.id.ok_or_else(|| {
            AttestationError::MalformedMessage("SVID carries no identity".to_string())
        })?;
        info!(trust_domain = %id.trust_domain, path = %id.path, "attestation complete");

        Ok(X509Svid {
            id: SpiffeId::new(id.trust_domain, id.path),
            cert_chain: svid.cert_chain,
            expires_at: svid.expires_at,
        })
    }
}

async fn send_step(
    tx: &mpsc::Sender<AttestRequest>,
    step: attest_request::Step,
) -> Result<()> {
    tx.send(AttestRequest { step: Some(step) })
        .await
        .map_err(|_| AttestationError::Transport(Status::unavailable("request stream closed")))
}

async fn recv_step(
    inbound: &mut tonic::Streaming<AttestResponse>,
) -> Result<attest_response::Step> {
    // A close before the session completes is a transport condition, not a
    // malformed message; the peer simply went away.
    let message = inbound.message().await?.ok_or_else(|| {
        AttestationError::Transport(Status::aborted("stream closed before session completed"))
    })?;
    message.step.ok_or_else(|| {
        AttestationError::MalformedMessage("missing protocol step".to_string())
    })
}
