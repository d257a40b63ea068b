//! Hardware TPM provider backed by tss-esapi.
//!
//! Talks to the TPM named by the `TCTI` environment variable (for Linux,
//! `device:/dev/tpmrm0`). The endorsement key is loaded from the default EK
//! template in the endorsement hierarchy; attestation keys are created and
//! reloaded through the tss-esapi AK abstractions, and challenges are
//! decrypted with `TPM2_ActivateCredential` under a policy-secret session.
//!
//! EK and AK handles are flushed when the provider drops, so a failed
//! attestation attempt does not leak TPM object slots.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;
use tss_esapi::{
    abstraction::{
        ak::{create_ak, load_ak},
        ek::{create_ek_public_from_default_template, retrieve_ek_pubcert},
        AsymmetricAlgorithmSelection,
    },
    attributes::SessionAttributesBuilder,
    constants::SessionType,
    handles::{AuthHandle, KeyHandle, SessionHandle},
    interface_types::{
        algorithm::{HashingAlgorithm, SignatureSchemeAlgorithm},
        ecc::EccCurve,
        resource_handles::Hierarchy,
        session_handles::PolicySession,
    },
    structures::{
        EncryptedSecret, IdObject, Private, Public, SymmetricDefinition,
    },
    traits::{Marshall, UnMarshall},
    Context, TctiNameConf,
};
use zeroize::Zeroizing;

use crate::credential::EncryptedCredential;
use crate::ek::EkRecord;
use crate::error::{Result, TpmError};
use crate::provider::{AkHandle, AkParameters, TpmProvider};

const EK_ALG: AsymmetricAlgorithmSelection = AsymmetricAlgorithmSelection::Ecc(EccCurve::NistP256);

/// Reloadable AK representation, serialized into the opaque marshal blob.
#[derive(Serialize, Deserialize)]
struct AkBlob {
    private: Vec<u8>,
    public: Vec<u8>,
}

struct LoadedAk {
    handle: KeyHandle,
    name: Vec<u8>,
    public: Public,
    private: Private,
}

/// TPM provider bound to real hardware.
pub struct HardwareTpm {
    context: Context,
    ek_handle: KeyHandle,
    ek_public: Public,
    ek_cert_der: Option<Vec<u8>>,
    aks: HashMap<u32, LoadedAk>,
    next_handle: u32,
}

impl HardwareTpm {
    /// Open the TPM named by the `TCTI` environment variable and load the
    /// endorsement key from the default template.
    pub fn open() -> Result<Self> {
        let tcti = TctiNameConf::from_environment_variable()
            .map_err(|e| TpmError::HardwareUnavailable(format!("no TCTI configured: {e}")))?;
        let mut context = Context::new(tcti)
            .map_err(|e| TpmError::HardwareUnavailable(format!("failed to open TPM: {e}")))?;

        let ek_cert_der = match retrieve_ek_pubcert(&mut context, EK_ALG) {
            Ok(der) => Some(der),
            Err(e) => {
                warn!("no EK certificate provisioned in NV: {e}");
                None
            }
        };

        let ek_template = create_ek_public_from_default_template(EK_ALG, None)
            .map_err(|e| TpmError::HardwareUnavailable(format!("bad EK template: {e}")))?;
        let ek_handle = context
            .execute_with_nullauth_session(|ctx| {
                ctx.create_primary(Hierarchy::Endorsement, ek_template, None, None, None, None)
            })
            .map_err(|e| TpmError::HardwareUnavailable(format!("failed to load EK: {e}")))?
            .key_handle;

        let (ek_public, _, _) = context
            .read_public(ek_handle)
            .map_err(|e| TpmError::HardwareUnavailable(format!("failed to read EK: {e}")))?;

        Ok(Self {
            context,
            ek_handle,
            ek_public,
            ek_cert_der,
            aks: HashMap::new(),
            next_handle: 1,
        })
    }

    fn ek_spki_der(&self) -> Result<Vec<u8>> {
        use p256::elliptic_curve::sec1::FromEncodedPoint;
        use p256::pkcs8::EncodePublicKey;

        // The default EK template is ECC NIST P-256; rebuild the point as a
        // SubjectPublicKeyInfo so software and hardware fingerprints agree.
        let Public::Ecc { unique, .. } = &self.ek_public else {
            return Err(TpmError::Codec("EK is not an ECC key".to_string()));
        };
        let point = p256::EncodedPoint::from_affine_coordinates(
            unique.x().as_slice().into(),
            unique.y().as_slice().into(),
            false,
        );
        let public = p256::PublicKey::from_encoded_point(&point);
        let public = Option::<p256::PublicKey>::from(public)
            .ok_or_else(|| TpmError::Codec("EK point is not on the curve".to_string()))?;
        public
            .to_public_key_der()
            .map(|der| der.into_vec())
            .map_err(|e| TpmError::Codec(format!("EK SPKI encoding failed: {e}")))
    }

    fn insert_ak(&mut self, ak: LoadedAk) -> AkHandle {
        let handle = self.next_handle;
        self.next_handle += 1;
        self.aks.insert(handle, ak);
        AkHandle(handle)
    }

    fn ak(&self, handle: AkHandle) -> Result<&LoadedAk> {
        self.aks.get(&handle.0).ok_or(TpmError::UnknownAk)
    }
}

impl TpmProvider for HardwareTpm {
    fn endorsement_key(&mut self) -> Result<EkRecord> {
        if let Some(der) = &self.ek_cert_der {
            return Ok(EkRecord::Certificate(der.clone()));
        }
        self.ek_spki_der().map(EkRecord::PublicKey)
    }

    fn create_ak(&mut self) -> Result<AkHandle> {
        let created = create_ak(
            &mut self.context,
            self.ek_handle,
            HashingAlgorithm::Sha256,
            EK_ALG,
            SignatureSchemeAlgorithm::EcDsa,
            None,
            None,
        )
        .map_err(|e| TpmError::KeyGeneration(e.to_string()))?;

        let handle = load_ak(
            &mut self.context,
            self.ek_handle,
            None,
            created.out_private.clone(),
            created.out_public.clone(),
        )
        .map_err(|e| TpmError::KeyGeneration(e.to_string()))?;

        let (_, name, _) = self
            .context
            .read_public(handle)
            .map_err(|e| TpmError::KeyGeneration(e.to_string()))?;

        Ok(self.insert_ak(LoadedAk {
            handle,
            name: name.value().to_vec(),
            public: created.out_public,
            private: created.out_private,
        }))
    }

    fn load_ak(&mut self, blob: &[u8]) -> Result<AkHandle> {
        let blob: AkBlob = serde_json::from_slice(blob).map_err(|_| TpmError::UnknownAk)?;
        let private = Private::try_from(blob.private).map_err(|_| TpmError::UnknownAk)?;
        let public = Public::unmarshall(&blob.public).map_err(|_| TpmError::UnknownAk)?;

        let handle = load_ak(
            &mut self.context,
            self.ek_handle,
            None,
            private.clone(),
            public.clone(),
        )
        .map_err(|e| TpmError::KeyGeneration(e.to_string()))?;

        let (_, name, _) = self
            .context
            .read_public(handle)
            .map_err(|e| TpmError::KeyGeneration(e.to_string()))?;

        Ok(self.insert_ak(LoadedAk {
            handle,
            name: name.value().to_vec(),
            public,
            private,
        }))
    }

    fn ak_parameters(&self, ak: AkHandle) -> Result<AkParameters> {
        let ak = self.ak(ak)?;
        Ok(AkParameters {
            public: ak
                .public
                .marshall()
                .map_err(|e| TpmError::Codec(e.to_string()))?,
            name: ak.name.clone(),
        })
    }

    fn marshal_ak(&self, ak: AkHandle) -> Result<Vec<u8>> {
        let ak = self.ak(ak)?;
        let blob = AkBlob {
            private: ak.private.to_vec(),
            public: ak
                .public
                .marshall()
                .map_err(|e| TpmError::Codec(e.to_string()))?,
        };
        serde_json::to_vec(&blob).map_err(|e| TpmError::Codec(e.to_string()))
    }

    fn activate_credential(
        &mut self,
        ak: AkHandle,
        credential: &EncryptedCredential,
    ) -> Result<Zeroizing<Vec<u8>>> {
        let ak_handle = self.ak(ak)?.handle;
        let id_object = IdObject::try_from(credential.id_object.clone())
            .map_err(|_| TpmError::ActivationFailed)?;
        let secret = EncryptedSecret::try_from(credential.encrypted_secret.clone())
            .map_err(|_| TpmError::ActivationFailed)?;

        // One HMAC session to authorize the AK and one policy session
        // satisfying the endorsement-hierarchy policy on the EK.
        let session = self
            .context
            .start_auth_session(
                None,
                None,
                None,
                SessionType::Hmac,
                SymmetricDefinition::AES_128_CFB,
                HashingAlgorithm::Sha256,
            )
            .map_err(|_| TpmError::ActivationFailed)?
            .ok_or(TpmError::ActivationFailed)?;
        let (attrs, mask) = SessionAttributesBuilder::new()
            .with_decrypt(true)
            .with_encrypt(true)
            .build();
        self.context
            .tr_sess_set_attributes(session, attrs, mask)
            .map_err(|_| TpmError::ActivationFailed)?;

        let policy_session = self
            .context
            .start_auth_session(
                None,
                None,
                None,
                SessionType::Policy,
                SymmetricDefinition::AES_128_CFB,
                HashingAlgorithm::Sha256,
            )
            .map_err(|_| TpmError::ActivationFailed)?
            .ok_or(TpmError::ActivationFailed)?;

        let ek_handle = self.ek_handle;
        let policy = PolicySession::try_from(policy_session)
            .map_err(|_| TpmError::ActivationFailed)?;
        let result = self
            .context
            .execute_with_nullauth_session(|ctx| {
                ctx.policy_secret(
                    policy,
                    AuthHandle::Endorsement,
                    Default::default(),
                    Default::default(),
                    Default::default(),
                    None,
                )
            })
            .map(|_| ());
        let result = result.and_then(|_| {
            self.context.execute_with_sessions(
                (Some(session), Some(policy_session), None),
                |ctx| ctx.activate_credential(ak_handle, ek_handle, id_object, secret),
            )
        });

        self.context
            .flush_context(SessionHandle::from(session).into())
            .ok();
        self.context
            .flush_context(SessionHandle::from(policy_session).into())
            .ok();

        result
            .map(|digest| Zeroizing::new(digest.to_vec()))
            .map_err(|_| TpmError::ActivationFailed)
    }
}

impl Drop for HardwareTpm {
    fn drop(&mut self) {
        for ak in self.aks.values() {
            self.context.flush_context(ak.handle.into()).ok();
        }
        self.context.flush_context(self.ek_handle.into()).ok();
    }
}
