use google_cloud_storage::client::{Client, ClientConfig as GcpClientConfig};
use google_cloud_storage::http::objects::download::Range;
use google_cloud_storage::http::objects::get::GetObjectRequest;
use google_cloud_storage::http::objects::upload::{Media, UploadObjectRequest, UploadType};
use sha2::{Digest, Sha256};

use crate::config::AuditorConfig;
use crate::state::AuditorStateAndSignature;
use crate::storage::Storage;

pub struct GcpBackend {
    bucket: String,
    client: Client,
}

/// Names a state object deterministically from its own signed bytes, so
/// re-uploading the same state is idempotent and objects sort by tree size.
fn state_object_path(state: &AuditorStateAndSignature) -> String {
    let digest = Sha256::digest(&state.signature);
    format!("head_{:016x}_{}", state.serialized_auditor_state.len(), hex::encode(digest))
}

impl GcpBackend {
    pub async fn new(bucket: &str) -> Result<Self, anyhow::Error> {
        let config = GcpClientConfig::default().with_auth().await?;
        let client = Client::new(config);

        Ok(Self {
            bucket: bucket.to_string(),
            client,
        })
    }
}

impl Storage for GcpBackend {
    async fn init_from_config(config: &AuditorConfig) -> Result<Self, anyhow::Error> {
        let bucket = config
            .repository
            .gcp_bucket
            .as_ref()
            .ok_or(anyhow::anyhow!("repository.gcp_bucket not set"))?;
        tracing::info!(bucket, "using GCP storage bucket");
        Self::new(bucket)
            .await
            .map_err(|e| anyhow::anyhow!("failed to initialize GCP storage: {e}"))
    }

    /// Commits the state to an object named by its own digest, then
    /// repoints the `head` pointer object at it.
    async fn commit_head(&self, state: &AuditorStateAndSignature) -> Result<(), anyhow::Error> {
        let serialized = serde_cbor::ser::to_vec_packed(state)?;

        let path = state_object_path(state);
        let upload_type = UploadType::Simple(Media::new(path.clone()));
        self.client
            .upload_object(
                &UploadObjectRequest {
                    bucket: self.bucket.clone(),
                    if_generation_match: Some(0), // never overwrite
                    ..Default::default()
                },
                serialized,
                &upload_type,
            )
            .await?;

        let upload_type = UploadType::Simple(Media::new("head"));
        self.client
            .upload_object(
                &UploadObjectRequest {
                    bucket: self.bucket.clone(),
                    ..Default::default()
                },
                path,
                &upload_type,
            )
            .await?;

        Ok(())
    }

    /// Loads the object named by the `head` pointer. The pointer is trusted
    /// only to locate the object; the state's embedded signature, not the
    /// object name, is what's actually verified by the caller.
    async fn get_head(&self) -> Result<Option<AuditorStateAndSignature>, anyhow::Error> {
        let head_path = self
            .client
            .download_object(
                &GetObjectRequest {
                    bucket: self.bucket.clone(),
                    object: "head".to_string(),
                    ..Default::default()
                },
                &Range::default(),
            )
            .await;
        let head_path = match head_path {
            Ok(bytes) => String::from_utf8(bytes)?,
            Err(_) => return Ok(None),
        };

        let data = self
            .client
            .download_object(
                &GetObjectRequest {
                    bucket: self.bucket.clone(),
                    object: head_path,
                    ..Default::default()
                },
                &Range::default(),
            )
            .await?;

        let state: AuditorStateAndSignature = serde_cbor::from_slice(&data)?;
        Ok(Some(state))
    }
}
