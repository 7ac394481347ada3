//! Layered configuration: a YAML file overridden by `KT_AUDITOR_*`
//! environment variables, assembled via the `config` crate.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// The server endpoint to connect to (e.g. `https://example.com:443`).
    pub server_endpoint: String,
    /// Path to the client certificate file (PEM).
    pub client_cert_path: PathBuf,
    /// Path to the client private key file (PEM).
    pub client_key_path: PathBuf,
    /// Path to a CA certificate file (PEM) for server verification. Falls
    /// back to the platform's trust roots if unset.
    pub ca_cert_path: Option<PathBuf>,
    /// Default batch size for audit requests.
    pub default_batch_size: u64,
    /// Maximum retries for a failed request before giving up.
    pub max_retries: u32,
    /// Per-request timeout, in seconds.
    pub request_timeout_seconds: u64,
    /// Maximum number of requests to keep in flight while catching up.
    pub max_concurrent_requests: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Path to the local state file. Used unless the `storage-gcp` feature
    /// is enabled.
    pub storage_path: Option<PathBuf>,
    /// GCP bucket name. Used only when the `storage-gcp` feature is
    /// enabled.
    pub gcp_bucket: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignerConfig {
    /// Path to the service's signing public key (PEM).
    pub service_public_key: PathBuf,
    /// Path to the service's VRF public key (PEM).
    pub vrf_public_key: PathBuf,
    /// Path to this auditor's own signing key (PEM, PKCS#8). Used unless
    /// the `kms-gcp` feature is enabled.
    pub auditor_signing_key: Option<PathBuf>,
    /// Resource name of the KMS key version backing the auditor's
    /// signature. Used only when the `kms-gcp` feature is enabled.
    pub kms_key_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditorConfig {
    pub transport: TransportConfig,
    pub repository: RepositoryConfig,
    pub signer: SignerConfig,
    /// How often to poll for new entries once caught up, in seconds.
    pub poll_interval_seconds: u64,
    /// Maximum time between signed tree heads, even with no new activity.
    pub max_signing_interval_seconds: u64,
    /// Maximum number of updates to fold into one signed tree head.
    pub max_updates_per_signature: u64,
}

impl AuditorConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.transport.request_timeout_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    /// Loads configuration from a YAML file, then applies any
    /// `KT_AUDITOR_*` environment variable overrides (e.g.
    /// `KT_AUDITOR_POLL_INTERVAL_SECONDS=30`, or
    /// `KT_AUDITOR_TRANSPORT__SERVER_ENDPOINT` for nested fields).
    pub fn load(path: &std::path::Path) -> Result<Self, anyhow::Error> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(config::Environment::with_prefix("KT_AUDITOR").separator("__"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Saves configuration to a YAML file, e.g. for a `config init`
    /// bootstrap command.
    pub fn save(&self, path: &std::path::Path) -> Result<(), anyhow::Error> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_yaml() -> &'static str {
        r#"
transport:
  server_endpoint: "https://example.com:443"
  client_cert_path: "/etc/kt-auditor/client.pem"
  client_key_path: "/etc/kt-auditor/client.key"
  ca_cert_path: null
  default_batch_size: 1000
  max_retries: 5
  request_timeout_seconds: 30
  max_concurrent_requests: 8
repository:
  storage_path: "/var/lib/kt-auditor/state.cbor"
  gcp_bucket: null
signer:
  service_public_key: "/etc/kt-auditor/service.pem"
  vrf_public_key: "/etc/kt-auditor/vrf.pem"
  auditor_signing_key: "/etc/kt-auditor/auditor.key"
  kms_key_name: null
poll_interval_seconds: 60
max_signing_interval_seconds: 3600
max_updates_per_signature: 100000
"#
    }

    #[test]
    fn loads_and_round_trips_through_yaml() {
        let dir = std::env::temp_dir().join(format!("kt-auditor-config-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.yaml");
        std::fs::write(&path, sample_yaml()).unwrap();

        let loaded = AuditorConfig::load(&path).unwrap();
        assert_eq!(loaded.transport.server_endpoint, "https://example.com:443");
        assert_eq!(loaded.poll_interval_seconds, 60);

        let save_path = dir.join("roundtrip.yaml");
        loaded.save(&save_path).unwrap();
        let reloaded = AuditorConfig::load(&save_path).unwrap();
        assert_eq!(reloaded.transport.default_batch_size, loaded.transport.default_batch_size);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn environment_override_takes_precedence() {
        let dir = std::env::temp_dir().join(format!("kt-auditor-config-env-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.yaml");
        std::fs::write(&path, sample_yaml()).unwrap();

        // SAFETY: test-only, single-threaded within this test function.
        unsafe {
            std::env::set_var("KT_AUDITOR_POLL_INTERVAL_SECONDS", "5");
        }
        let loaded = AuditorConfig::load(&path).unwrap();
        assert_eq!(loaded.poll_interval_seconds, 5);
        unsafe {
            std::env::remove_var("KT_AUDITOR_POLL_INTERVAL_SECONDS");
        }

        std::fs::remove_dir_all(&dir).ok();
    }
}
