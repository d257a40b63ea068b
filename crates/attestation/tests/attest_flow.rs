//! End-to-end protocol tests over a real tonic channel.
//!
//! Tests cover:
//! - full happy-path attestation with a trusted software TPM
//! - uniform rejection of unknown EKs and of wrong identity requests
//! - tamper and ordering violations
//! - per-session challenge freshness

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_stream::wrappers::{ReceiverStream, TcpListenerStream};
use tonic::transport::Server;
use tonic::{Code, Request};

use fogid_attestation::proto::node_attestation_client::NodeAttestationClient;
use fogid_attestation::proto::{
    attest_request, attest_response, AttestParams, AttestRequest, AttestResponse,
    AttestationData, SvidParams,
};
use fogid_attestation::{AttestationDriver, AttestationError, NodeAttestationService};
use fogid_core::config::TrustEntryConfig;
use fogid_identity::{csr, SpiffeId, TrustStore};
use fogid_tpm::{
    generate_activation_material, solve_challenge, EkRecord, EncryptedCredential, SoftTpm,
    SoftwareCredentialIssuer,
};

fn ek_fingerprint(tpm: &SoftTpm) -> String {
    EkRecord::PublicKey(tpm.ek_spki_der().unwrap())
        .fingerprint()
        .unwrap()
}

async fn start_test_server(trust_domain: &str, entries: Vec<TrustEntryConfig>) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let server_url = format!("http://{}", listener.local_addr().unwrap());

    let trust = Arc::new(TrustStore::new(trust_domain, &entries));
    let service = NodeAttestationService::new(
        trust,
        Arc::new(SoftwareCredentialIssuer),
        Duration::from_secs(600),
    );

    tokio::spawn(async move {
        Server::builder()
            .add_service(service.into_server())
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await
            .unwrap();
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    server_url
}

async fn connect(url: &str) -> NodeAttestationClient<tonic::transport::Channel> {
    NodeAttestationClient::connect(url.to_string())
        .await
        .expect("failed to connect to test server")
}

fn trust_entry(tpm: &SoftTpm, identity: &str) -> TrustEntryConfig {
    TrustEntryConfig {
        fingerprint: ek_fingerprint(tpm),
        identity: identity.to_string(),
    }
}

/// Open a raw session for tests that need to violate the protocol.
async fn open_session(
    client: &mut NodeAttestationClient<tonic::transport::Channel>,
) -> (
    mpsc::Sender<AttestRequest>,
    tonic::Streaming<AttestResponse>,
) {
    let (tx, rx) = mpsc::channel(4);
    let inbound = client
        .attest(Request::new(ReceiverStream::new(rx)))
        .await
        .unwrap()
        .into_inner();
    (tx, inbound)
}

fn params_request(tpm: &mut SoftTpm, identity_uri: &str) -> (AttestRequest, Vec<u8>) {
    let (material, ak_blob) = generate_activation_material(tpm).unwrap();
    let payload = serde_json::to_vec(&material).unwrap();
    let id = SpiffeId::parse(identity_uri).unwrap();
    let (csr_der, _key) = csr::build_csr(&id).unwrap();

    let request = AttestRequest {
        step: Some(attest_request::Step::Params(AttestParams {
            data: Some(AttestationData {
                r#type: "tpm_activation".to_string(),
                payload,
            }),
            params: Some(SvidParams { csr: csr_der }),
        })),
    };
    (request, ak_blob)
}

fn challenge_bytes(response: AttestResponse) -> Vec<u8> {
    match response.step {
        Some(attest_response::Step::Challenge(bytes)) => bytes,
        other => panic!("expected challenge, got {other:?}"),
    }
}

#[tokio::test]
async fn trusted_ek_receives_svid_for_its_identity() {
    let mut tpm = SoftTpm::new();
    let url = start_test_server("spiffe_fog", vec![trust_entry(&tpm, "gcp")]).await;
    let mut client = connect(&url).await;

    let svid = AttestationDriver::new(&mut tpm, SpiffeId::new("spiffe_fog", "gcp"))
        .attest(&mut client)
        .await
        .expect("attestation should succeed");

    assert_eq!(svid.id.trust_domain, "spiffe_fog");
    assert_eq!(svid.id.path, "gcp");
    assert!(svid.cert_chain.is_empty());
    assert!(svid.expires_at > 0);
}

#[tokio::test]
async fn certificate_wrapped_ek_attests_like_a_bare_key() {
    use p256::pkcs8::EncodePrivateKey;

    let ek_secret = p256::SecretKey::random(&mut rand::thread_rng());
    let mut tpm = SoftTpm::with_endorsement_key(ek_secret.clone());
    let entry = trust_entry(&tpm, "gcp");

    // Wrap the same EK in a self-signed certificate; the fingerprint, and
    // therefore the trust decision, must not change.
    let pkcs8 = ek_secret.to_pkcs8_der().unwrap();
    let key_pair = rcgen::KeyPair::try_from(pkcs8.as_bytes()).unwrap();
    let cert = rcgen::CertificateParams::default()
        .self_signed(&key_pair)
        .unwrap();
    tpm.set_endorsement_certificate(cert.der().to_vec());

    let url = start_test_server("spiffe_fog", vec![entry]).await;
    let mut client = connect(&url).await;

    let svid = AttestationDriver::new(&mut tpm, SpiffeId::new("spiffe_fog", "gcp"))
        .attest(&mut client)
        .await
        .expect("certificate-wrapped EK should attest");
    assert_eq!(svid.id.path, "gcp");
}

#[tokio::test]
async fn unknown_ek_is_rejected_at_step_one() {
    let mut tpm = SoftTpm::new();
    // Empty trust store: nobody is registered.
    let url = start_test_server("spiffe_fog", vec![]).await;
    let mut client = connect(&url).await;

    let err = AttestationDriver::new(&mut tpm, SpiffeId::new("spiffe_fog", "gcp"))
        .attest(&mut client)
        .await
        .expect_err("unknown EK must be rejected");

    match err {
        AttestationError::Transport(status) => {
            assert_eq!(status.code(), Code::InvalidArgument);
            assert_eq!(status.message(), "invalid endorsement key");
        }
        other => panic!("expected terminal status, got {other}"),
    }
}

#[tokio::test]
async fn wrong_identity_request_fails_indistinguishably() {
    let mut tpm = SoftTpm::new();
    let url = start_test_server("spiffe_fog", vec![trust_entry(&tpm, "gcp")]).await;
    let mut client = connect(&url).await;

    // Registered EK, but asking for rpi's identity.
    let err = AttestationDriver::new(&mut tpm, SpiffeId::new("spiffe_fog", "rpi"))
        .attest(&mut client)
        .await
        .expect_err("identity mismatch must be rejected");

    match err {
        AttestationError::Transport(status) => {
            assert_eq!(status.code(), Code::InvalidArgument);
            // Same text as the unknown-EK rejection: no oracle.
            assert_eq!(status.message(), "invalid endorsement key");
        }
        other => panic!("expected terminal status, got {other}"),
    }
}

#[tokio::test]
async fn tampered_challenge_response_is_permission_denied() {
    let mut tpm = SoftTpm::new();
    let url = start_test_server("spiffe_fog", vec![trust_entry(&tpm, "gcp")]).await;
    let mut client = connect(&url).await;
    let (tx, mut inbound) = open_session(&mut client).await;

    let (request, ak_blob) = params_request(&mut tpm, "spiffe://spiffe_fog/gcp");
    tx.send(request).await.unwrap();

    let challenge = challenge_bytes(inbound.message().await.unwrap().unwrap());
    let credential: EncryptedCredential = serde_json::from_slice(&challenge).unwrap();
    let secret = solve_challenge(&mut tpm, &ak_blob, &credential).unwrap();

    let mut forged = secret.to_vec();
    forged[0] ^= 0x01;
    tx.send(AttestRequest {
        step: Some(attest_request::Step::ChallengeResponse(forged)),
    })
    .await
    .unwrap();

    let status = inbound.message().await.expect_err("must be rejected");
    assert_eq!(status.code(), Code::PermissionDenied);
    assert_eq!(status.message(), "challenge response does not match");
}

#[tokio::test]
async fn challenge_response_before_params_is_rejected() {
    let mut tpm = SoftTpm::new();
    let url = start_test_server("spiffe_fog", vec![trust_entry(&tpm, "gcp")]).await;
    let mut client = connect(&url).await;
    let (tx, mut inbound) = open_session(&mut client).await;

    tx.send(AttestRequest {
        step: Some(attest_request::Step::ChallengeResponse(vec![0xAA; 32])),
    })
    .await
    .unwrap();

    let status = inbound.message().await.expect_err("must be rejected");
    assert_eq!(status.code(), Code::InvalidArgument);
}

#[tokio::test]
async fn second_params_step_is_rejected() {
    let mut tpm = SoftTpm::new();
    let url = start_test_server("spiffe_fog", vec![trust_entry(&tpm, "gcp")]).await;
    let mut client = connect(&url).await;
    let (tx, mut inbound) = open_session(&mut client).await;

    let (request, _ak_blob) = params_request(&mut tpm, "spiffe://spiffe_fog/gcp");
    tx.send(request).await.unwrap();
    let _challenge = challenge_bytes(inbound.message().await.unwrap().unwrap());

    let (again, _) = params_request(&mut tpm, "spiffe://spiffe_fog/gcp");
    tx.send(again).await.unwrap();

    let status = inbound.message().await.expect_err("must be rejected");
    assert_eq!(status.code(), Code::InvalidArgument);
}

#[tokio::test]
async fn empty_challenge_response_is_rejected() {
    let mut tpm = SoftTpm::new();
    let url = start_test_server("spiffe_fog", vec![trust_entry(&tpm, "gcp")]).await;
    let mut client = connect(&url).await;
    let (tx, mut inbound) = open_session(&mut client).await;

    let (request, _ak_blob) = params_request(&mut tpm, "spiffe://spiffe_fog/gcp");
    tx.send(request).await.unwrap();
    let _challenge = challenge_bytes(inbound.message().await.unwrap().unwrap());

    tx.send(AttestRequest {
        step: Some(attest_request::Step::ChallengeResponse(Vec::new())),
    })
    .await
    .unwrap();

    let status = inbound.message().await.expect_err("must be rejected");
    assert_eq!(status.code(), Code::InvalidArgument);
}

#[tokio::test]
async fn params_without_csr_are_rejected_before_any_cryptography() {
    let mut tpm = SoftTpm::new();
    let url = start_test_server("spiffe_fog", vec![trust_entry(&tpm, "gcp")]).await;
    let mut client = connect(&url).await;
    let (tx, mut inbound) = open_session(&mut client).await;

    let (material, _ak_blob) = generate_activation_material(&mut tpm).unwrap();
    tx.send(AttestRequest {
        step: Some(attest_request::Step::Params(AttestParams {
            data: Some(AttestationData {
                r#type: "tpm_activation".to_string(),
                payload: serde_json::to_vec(&material).unwrap(),
            }),
            params: Some(SvidParams { csr: Vec::new() }),
        })),
    })
    .await
    .unwrap();

    let status = inbound.message().await.expect_err("must be rejected");
    assert_eq!(status.code(), Code::InvalidArgument);
}

#[tokio::test]
async fn half_close_mid_session_is_a_transport_condition() {
    let mut tpm = SoftTpm::new();
    let url = start_test_server("spiffe_fog", vec![trust_entry(&tpm, "gcp")]).await;
    let mut client = connect(&url).await;
    let (tx, mut inbound) = open_session(&mut client).await;

    let (request, _ak_blob) = params_request(&mut tpm, "spiffe://spiffe_fog/gcp");
    tx.send(request).await.unwrap();
    let _challenge = challenge_bytes(inbound.message().await.unwrap().unwrap());

    // Walk away without answering the challenge.
    drop(tx);

    let status = inbound.message().await.expect_err("session must terminate");
    assert_eq!(status.code(), Code::Aborted);
}

#[tokio::test]
async fn challenges_are_fresh_across_sessions() {
    let mut tpm = SoftTpm::new();
    let url = start_test_server("spiffe_fog", vec![trust_entry(&tpm, "gcp")]).await;
    let mut client = connect(&url).await;

    let mut seen = Vec::new();
    for _ in 0..2 {
        let (tx, mut inbound) = open_session(&mut client).await;
        let (request, _ak_blob) = params_request(&mut tpm, "spiffe://spiffe_fog/gcp");
        tx.send(request).await.unwrap();
        seen.push(challenge_bytes(inbound.message().await.unwrap().unwrap()));
        // Abandon the session; the server retains nothing reusable.
    }

    assert_ne!(seen[0], seen[1], "challenge material must be per-session");
}
