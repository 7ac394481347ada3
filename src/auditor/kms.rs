//! GCP KMS-backed tree-head signing, used in `kms-gcp` builds: the signing
//! key never leaves KMS, so every signature requires a round trip.

use std::time::{SystemTime, UNIX_EPOCH};

use gcloud_kms::{
    client::{Client, ClientConfig},
    grpc::kms::v1::{
        AsymmetricSignRequest, GetPublicKeyRequest, crypto_key_version::CryptoKeyVersionAlgorithm,
        public_key::PublicKeyFormat,
    },
};

use crate::Hash;
use crate::auditor::PublicConfig;
use crate::proto::transparency::AuditorTreeHead;
use crate::state::{AuditorState, AuditorStateAndSignature};

/// Holds the public configuration and the resource name of the KMS key
/// version backing the auditor's signature.
pub struct Auditor {
    pub config: PublicConfig,
    pub key_name: String,
}

impl Auditor {
    /// Fetches the auditor's own public key from KMS, PEM-encoded.
    pub async fn get_public_key(kms_name: &str) -> Result<String, anyhow::Error> {
        let client_config = ClientConfig::default().with_auth().await?;
        let client = Client::new(client_config).await?;

        let key_version = client
            .get_public_key(
                GetPublicKeyRequest {
                    name: kms_name.to_string(),
                    public_key_format: PublicKeyFormat::Pem.into(),
                },
                None,
            )
            .await?;

        if key_version.algorithm() != CryptoKeyVersionAlgorithm::EcSignEd25519 {
            return Err(anyhow::anyhow!("KMS key version is not Ed25519"));
        }

        Ok(key_version.pem)
    }

    /// Signs a tree head at the current wall-clock time via a KMS
    /// `AsymmetricSign` call.
    pub async fn sign_head(&self, head: Hash, size: u64) -> Result<AuditorTreeHead, anyhow::Error> {
        let client_config = ClientConfig::default().with_auth().await?;
        let client = Client::new(client_config).await?;

        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis();
        let timestamp_ms = ts as i64;
        let msg = self.config.encode_at_time(head, size, timestamp_ms);
        let sig = client
            .asymmetric_sign(
                AsymmetricSignRequest {
                    name: self.key_name.clone(),
                    data: msg,
                    ..Default::default()
                },
                None,
            )
            .await?;

        Ok(AuditorTreeHead {
            tree_size: size,
            timestamp_ms,
            signature: sig.signature,
        })
    }

    /// Self-signs a persisted auditor state via a KMS `AsymmetricSign` call
    /// over the serialized state bytes.
    pub async fn sign_state(&self, state: &AuditorState) -> Result<AuditorStateAndSignature, anyhow::Error> {
        let serialized_auditor_state = state.serialize()?;

        let client_config = ClientConfig::default().with_auth().await?;
        let client = Client::new(client_config).await?;
        let sig = client
            .asymmetric_sign(
                AsymmetricSignRequest {
                    name: self.key_name.clone(),
                    data: serialized_auditor_state.clone(),
                    ..Default::default()
                },
                None,
            )
            .await?;

        Ok(AuditorStateAndSignature {
            serialized_auditor_state,
            signature: sig.signature,
        })
    }
}
