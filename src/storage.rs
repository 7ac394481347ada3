//! Persistence for the auditor's signed state between ticks.
//!
//! The backend is chosen at compile time via Cargo features (`storage-gcp`
//! selects [`gcp::GcpBackend`], otherwise [`filestore::FileBackend`] is
//! used), matching how the signer backend is selected in [`crate::auditor`].

use crate::config::AuditorConfig;
use crate::state::AuditorStateAndSignature;

#[cfg(feature = "storage-gcp")]
mod gcp;
#[cfg(feature = "storage-gcp")]
pub use gcp::GcpBackend as Backend;

#[cfg(not(feature = "storage-gcp"))]
mod filestore;
#[cfg(not(feature = "storage-gcp"))]
pub use filestore::FileBackend as Backend;

#[allow(async_fn_in_trait)]
pub trait Storage: Sized {
    /// Initializes the storage backend from configuration.
    async fn init_from_config(config: &AuditorConfig) -> Result<Self, anyhow::Error>;

    /// Persists the signed state as the new head.
    async fn commit_head(&self, state: &AuditorStateAndSignature) -> Result<(), anyhow::Error>;

    /// Loads the most recently committed signed state, if any exists yet.
    ///
    /// # Errors
    ///
    /// Returns an error if an OS or transport error occurs, or if the
    /// stored data is not a well-formed [`AuditorStateAndSignature`].
    async fn get_head(&self) -> Result<Option<AuditorStateAndSignature>, anyhow::Error>;
}
