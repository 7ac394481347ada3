use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::config::AuditorConfig;
use crate::state::AuditorStateAndSignature;
use crate::storage::Storage;

pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: &Path) -> Result<Self, anyhow::Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        tracing::info!(path = %path.display(), "using file storage");
        Ok(Self {
            path: path.to_path_buf(),
        })
    }
}

impl Storage for FileBackend {
    async fn init_from_config(config: &AuditorConfig) -> Result<Self, anyhow::Error> {
        Self::new(
            config
                .repository
                .storage_path
                .as_ref()
                .ok_or(anyhow::anyhow!("repository.storage_path not set"))?,
        )
    }

    async fn commit_head(&self, state: &AuditorStateAndSignature) -> Result<(), anyhow::Error> {
        let serialized = serde_cbor::ser::to_vec_packed(state)?;

        let tmp_path = self.path.with_extension("tmp");
        let mut file = File::create(&tmp_path)?;
        file.write_all(&serialized)?;
        file.flush()?;
        file.sync_all()?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    async fn get_head(&self) -> Result<Option<AuditorStateAndSignature>, anyhow::Error> {
        if !self.path.exists() {
            return Ok(None);
        }

        let file = File::open(&self.path)?;
        let state: AuditorStateAndSignature = serde_cbor::from_reader(file)?;
        Ok(Some(state))
    }
}
