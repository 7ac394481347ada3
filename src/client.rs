//! The audit loop: fetches batches of updates from the service, replays
//! them into the condensed trees, and periodically countersigns the
//! resulting tree head.
//!
//! Catch-up and steady-state polling share one code path. While behind,
//! several batches are kept in flight to saturate the transport; once
//! caught up, the loop falls back to polling at `poll_interval_seconds`.
//! State is only ever persisted for a tree head the remote service has
//! already witnessed — persisting first could carry forward a head across
//! a crash that the service never actually attested to. A crash between
//! submission and persistence can at worst resend the same signature on
//! restart, never lose one the service accepted.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use ed25519_dalek::pkcs8::DecodePublicKey;
#[cfg(not(feature = "kms-gcp"))]
use ed25519_dalek::pkcs8::DecodePrivateKey;
#[cfg(not(feature = "kms-gcp"))]
use ed25519_dalek::SigningKey;
use ed25519_dalek::VerifyingKey;
use tokio::sync::Mutex as AsyncMutex;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint, Identity};
use tonic::{Request, Response};

use crate::auditor::{Auditor, PublicConfig};
use crate::config::AuditorConfig;
use crate::health::HealthState;
use crate::proto::kt::AuditResponse;
use crate::proto::kt::key_transparency_service_client::KeyTransparencyServiceClient;
use crate::state::AuditorState;
use crate::storage::{Backend, Storage};
use crate::transparency::AuditTrees;

pub struct AuditorClient {
    endpoint: Endpoint,
    config: AuditorConfig,
    trees: AuditTrees,
    storage: Backend,
    auditor: Auditor,
    // Serializes ticks: only one replay-and-maybe-sign cycle runs at a
    // time. A tick that finds this held (e.g. a manual "tick now" admin
    // hook racing the steady-state poll loop) is skipped rather than
    // queued, since the running tick already covers the same work.
    tick_lock: AsyncMutex<()>,
    health: HealthState,
}

impl AuditorClient {
    pub async fn new(config: AuditorConfig) -> Result<Self, anyhow::Error> {
        let identity = Identity::from_pem(
            std::fs::read(&config.transport.client_cert_path)
                .map_err(|e| anyhow::anyhow!("failed to read client cert: {e}"))?,
            std::fs::read(&config.transport.client_key_path)
                .map_err(|e| anyhow::anyhow!("failed to read client key: {e}"))?,
        );

        let mut tls_config = ClientTlsConfig::new().identity(identity);
        tls_config = match &config.transport.ca_cert_path {
            Some(path) => tls_config.ca_certificate(Certificate::from_pem(std::fs::read(path)?)),
            None => tls_config.with_enabled_roots(),
        };

        let storage = Backend::init_from_config(&config).await?;
        let auditor_key = auditor_verifying_key(&config).await?;

        let trees = match storage.get_head().await? {
            Some(signed_state) => signed_state.verify(&auditor_key)?.into_trees()?,
            None => {
                tracing::info!("no persisted state found, starting from an empty log");
                AuditTrees::new_empty()
            }
        };

        let auditor_config = PublicConfig {
            sig_key: read_verifying_key(&config.signer.service_public_key)?,
            vrf_key: read_verifying_key(&config.signer.vrf_public_key)?,
            auditor_key,
        };
        let auditor = build_auditor(&config, auditor_config).await?;

        let endpoint = Endpoint::from_shared(config.transport.server_endpoint.clone())?
            .tls_config(tls_config)?
            .timeout(config.request_timeout());

        let health = HealthState::new();

        Ok(Self {
            endpoint,
            config,
            trees,
            storage,
            auditor,
            tick_lock: AsyncMutex::new(()),
            health,
        })
    }

    pub fn health(&self) -> &HealthState {
        &self.health
    }

    /// Estimates how far ahead the service's log is, by doubling then
    /// binary-searching for the first unanswerable request.
    pub async fn estimate_log_end(&self) -> Result<u64, anyhow::Error> {
        let transport = self.endpoint.connect().await?;
        let mut client = KeyTransparencyServiceClient::new(transport);

        let mut low = self.trees.total_updates_processed();
        let mut high = 1u64;
        while fetch_audit_entries(&self.config, &mut client, high, Some(1), false)
            .await
            .is_ok()
        {
            high *= 2;
        }

        while high - low > 500 {
            let mid = (low + high) / 2;
            if fetch_audit_entries(&self.config, &mut client, mid, Some(1), false)
                .await
                .is_err()
            {
                high = mid;
            } else {
                low = mid + 1;
            }
        }

        let response = fetch_audit_entries(&self.config, &mut client, low, Some(1000), false).await?;
        if response.updates.is_empty() {
            Err(anyhow::anyhow!("could not locate the log end"))
        } else {
            Ok(low + response.updates.len() as u64)
        }
    }

    /// Signs and submits the current tree head to the remote service.
    /// Persistence of the same state must only happen after this succeeds.
    async fn submit_auditor_head(
        &self,
        client: &mut KeyTransparencyServiceClient<Channel>,
    ) -> Result<Response<crate::proto::kt::Empty>, anyhow::Error> {
        let log_root = self
            .trees
            .log_root()
            .ok_or(anyhow::anyhow!("log is uninitialized"))?;
        let tree_head = self
            .auditor
            .sign_head(log_root, self.trees.total_updates_processed())
            .await?;

        let mut request = Request::new(tree_head);
        request.set_timeout(self.config.request_timeout());
        Ok(client.set_auditor_head(request).await?)
    }

    /// Runs one full catch-up-then-steady-state audit session. Returns only
    /// on an unrecoverable error; the binary entry point restarts it with
    /// backoff.
    pub async fn run_audit(&mut self) -> Result<(), anyhow::Error> {
        let _permit = match self.tick_lock.try_lock() {
            Ok(permit) => permit,
            Err(_) => {
                tracing::warn!("previous tick still running, skipping this one");
                return Ok(());
            }
        };

        let initial_log_end = self.estimate_log_end().await?;

        let transport = self.endpoint.connect().await?;
        let mut client = KeyTransparencyServiceClient::new(transport);

        let batch_size = self.config.transport.default_batch_size;
        let mut progress = self.trees.total_updates_processed();
        let mut last_reported = Instant::now();
        let mut last_signed_at = Instant::now();
        let mut updates_since_signature = 0u64;
        let mut syncing = true;

        let fetch_client = client.clone();
        let fetch_config = self.config.clone();
        let fetch_job = move |start_index: u64| {
            let mut client = fetch_client.clone();
            let config = fetch_config.clone();
            async move { fetch_audit_entries(&config, &mut client, start_index, Some(batch_size), true).await }
        };

        let mut queue = VecDeque::new();
        for i in 0..self.config.transport.max_concurrent_requests as u64 {
            let start_index = progress + batch_size * i;
            queue.push_back(tokio::spawn(fetch_job(start_index)));
        }

        loop {
            let response: AuditResponse = queue.pop_front().unwrap().await??;
            updates_since_signature += response.updates.len() as u64;
            for update in response.updates {
                if let Err(err) = self.trees.apply_update(update) {
                    self.health.record_fatal_error();
                    return Err(err.into());
                }
            }
            self.health.record_successful_tick(self.trees.is_initialized());

            if last_reported.elapsed().as_secs() > 2 {
                progress = self.trees.total_updates_processed();
                last_reported = Instant::now();
                tracing::info!(progress, target_size = initial_log_end, "replaying updates");
            }

            if syncing && !response.more {
                tracing::info!("caught up with the service's log");
                for handle in queue.drain(..) {
                    handle.abort();
                }
                syncing = false;
            }

            let due_by_time = last_signed_at.elapsed().as_secs() >= self.config.max_signing_interval_seconds;
            let due_by_count = updates_since_signature >= self.config.max_updates_per_signature;

            if (due_by_time || due_by_count) && self.trees.is_initialized() {
                // The remote service must witness this tree head before it's
                // persisted: persisting first could carry forward a state
                // the service never attested to, across a crash.
                self.submit_auditor_head(&mut client).await?;
                let signed_state = self.auditor.sign_state(&AuditorState::from_trees(&self.trees)?).await?;
                self.storage.commit_head(&signed_state).await?;

                last_signed_at = Instant::now();
                updates_since_signature = 0;
            }

            if !syncing {
                tokio::time::sleep(self.config.poll_interval()).await;
            }

            let fetch_start = self.trees.total_updates_processed() + batch_size * (queue.len() as u64);
            queue.push_back(tokio::spawn(fetch_job(fetch_start)));
        }
    }
}

fn read_verifying_key(path: &std::path::Path) -> Result<VerifyingKey, anyhow::Error> {
    let pem = std::fs::read_to_string(path)?;
    Ok(VerifyingKey::from_public_key_pem(&pem)?)
}

#[cfg(not(feature = "kms-gcp"))]
async fn auditor_verifying_key(config: &AuditorConfig) -> Result<VerifyingKey, anyhow::Error> {
    let path = config
        .signer
        .auditor_signing_key
        .as_ref()
        .ok_or(anyhow::anyhow!("signer.auditor_signing_key not set"))?;
    let pem = std::fs::read_to_string(path)?;
    Ok(SigningKey::from_pkcs8_pem(&pem)?.verifying_key())
}

#[cfg(feature = "kms-gcp")]
async fn auditor_verifying_key(config: &AuditorConfig) -> Result<VerifyingKey, anyhow::Error> {
    let kms_name = config
        .signer
        .kms_key_name
        .as_ref()
        .ok_or(anyhow::anyhow!("signer.kms_key_name not set"))?;
    let pem = Auditor::get_public_key(kms_name).await?;
    Ok(VerifyingKey::from_public_key_pem(&pem)?)
}

#[cfg(not(feature = "kms-gcp"))]
async fn build_auditor(config: &AuditorConfig, public_config: PublicConfig) -> Result<Auditor, anyhow::Error> {
    let path = config
        .signer
        .auditor_signing_key
        .as_ref()
        .ok_or(anyhow::anyhow!("signer.auditor_signing_key not set"))?;
    let pem = std::fs::read_to_string(path)?;
    Ok(Auditor {
        config: public_config,
        key: SigningKey::from_pkcs8_pem(&pem)?,
    })
}

#[cfg(feature = "kms-gcp")]
async fn build_auditor(config: &AuditorConfig, public_config: PublicConfig) -> Result<Auditor, anyhow::Error> {
    let kms_name = config
        .signer
        .kms_key_name
        .as_ref()
        .ok_or(anyhow::anyhow!("signer.kms_key_name not set"))?;
    Ok(Auditor {
        config: public_config,
        key_name: kms_name.clone(),
    })
}

async fn fetch_audit_entries(
    config: &AuditorConfig,
    client: &mut KeyTransparencyServiceClient<Channel>,
    start: u64,
    limit: Option<u64>,
    retry: bool,
) -> Result<AuditResponse, anyhow::Error> {
    let limit = limit.unwrap_or(config.transport.default_batch_size);
    let mut retries = if retry { config.transport.max_retries } else { 0 };

    loop {
        let mut request = Request::new(crate::proto::kt::AuditRequest { start, limit });
        request.set_timeout(config.request_timeout());
        match client.audit(request).await {
            Ok(response) => return Ok(response.into_inner()),
            Err(err) => {
                if retries == 0 {
                    return Err(anyhow::anyhow!(
                        "failed to fetch audit entries after {} retries: {err}",
                        config.transport.max_retries
                    ));
                }
                let backoff = 2u64.pow(config.transport.max_retries - retries);
                tokio::time::sleep(Duration::from_secs(backoff)).await;
                retries -= 1;
            }
        }
    }
}
