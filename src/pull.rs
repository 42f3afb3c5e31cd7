//! # Pull Pipeline
//!
//! Drives one image from a registry into the [`ImageStore`].
//!
//! ## State Machine
//!
//! ```text
//!  Start ──token──▶ TokenAcquired ──manifest──▶ ManifestFetched
//!                                                     │ lock, write manifest,
//!                                                     ▼ create layer dirs
//!                                              LayoutPrepared
//!                                                     │ ≤ N concurrent fetches
//!                                                     ▼
//!                                              (BlobFetched)* ──▶ Done
//! ```
//!
//! Nothing touches the disk until the manifest has been fetched and
//! validated, so an auth or manifest failure leaves the store unchanged.
//! Once layout preparation starts the image's [`ImageLock`] is held until
//! the pull returns.
//!
//! ## Layer Fetching
//!
//! Distinct digests are fetched with at most `concurrency` requests in
//! flight. All fetches share the token by reference. The first failure
//! returns immediately, which drops the remaining in-flight futures. A
//! dropped fetch deletes its partial temp file (the store ties each temp
//! file to a guard); layers that already completed stay on disk.
//!
//! [`ImageLock`]: crate::storage::ImageLock

use crate::config::Config;
use crate::error::{Error, RegistryFailure, Result};
use crate::reference::ImageReference;
use crate::registry::{AuthToken, RegistryClient};
use crate::storage::ImageStore;
use futures::stream::{self, StreamExt};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Progress of a pull, logged at every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullState {
    /// Reference parsed, nothing requested yet.
    Start,
    /// Token issued by the auth endpoint.
    TokenAcquired,
    /// Manifest fetched and validated.
    ManifestFetched,
    /// Manifest written and layer directories created.
    LayoutPrepared,
    /// One more layer stored.
    BlobFetched,
    /// Every layer stored.
    Done,
}

impl fmt::Display for PullState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Start => "start",
            Self::TokenAcquired => "token-acquired",
            Self::ManifestFetched => "manifest-fetched",
            Self::LayoutPrepared => "layout-prepared",
            Self::BlobFetched => "blob-fetched",
            Self::Done => "done",
        };
        f.write_str(s)
    }
}

/// Result of a successful pull.
#[derive(Debug, Clone)]
pub struct PullReport {
    /// The pulled reference.
    pub reference: ImageReference,
    /// Where the manifest was written.
    pub manifest_path: PathBuf,
    /// Distinct layer digests, in manifest order.
    pub digests: Vec<String>,
    /// Total layer bytes written.
    pub bytes_written: u64,
}

/// Fetches images into an [`ImageStore`].
#[derive(Debug, Clone)]
pub struct PullPipeline {
    client: RegistryClient,
    store: Arc<ImageStore>,
    concurrency: usize,
}

impl PullPipeline {
    /// Creates a pipeline from explicit parts.
    pub fn new(client: RegistryClient, store: Arc<ImageStore>) -> Self {
        Self {
            client,
            store,
            concurrency: crate::constants::DEFAULT_PULL_CONCURRENCY,
        }
    }

    /// Creates a pipeline, its client and its store from a [`Config`].
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = RegistryClient::new(&config.registry)?;
        let store = Arc::new(ImageStore::new(&config.base_dir)?);
        Ok(Self::new(client, store).with_concurrency(config.pull_concurrency))
    }

    /// Sets the maximum number of concurrent layer fetches (at least 1).
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Returns the store images are written to.
    pub fn store(&self) -> &Arc<ImageStore> {
        &self.store
    }

    /// Parses `image` and pulls it.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidImageReference`] for a bad reference; every later
    /// failure is wrapped in [`Error::Pull`].
    pub async fn pull(&self, image: &str) -> Result<PullReport> {
        let reference = ImageReference::parse(image)?;
        self.pull_reference(&reference).await
    }

    /// Pulls an already parsed reference.
    pub async fn pull_reference(&self, reference: &ImageReference) -> Result<PullReport> {
        info!("Pulling image: {}", reference);
        transition(reference, PullState::Start);

        let token = self
            .client
            .fetch_token(reference)
            .await
            .map_err(|e| Error::pull(reference.to_string(), None, e))?;
        transition(reference, PullState::TokenAcquired);

        let manifest = self
            .client
            .fetch_manifest(&token, reference)
            .await
            .map_err(|e| Error::pull(reference.to_string(), None, e))?;
        manifest.validate().map_err(|reason| {
            Error::pull(
                reference.to_string(),
                None,
                Error::Manifest {
                    reference: reference.to_string(),
                    cause: RegistryFailure::InvalidResponse(reason),
                },
            )
        })?;
        transition(reference, PullState::ManifestFetched);

        let _lock = self
            .store
            .lock(reference)
            .map_err(|e| Error::pull(reference.to_string(), None, e))?;
        let manifest_path = self
            .store
            .write_manifest(reference, &manifest)
            .and_then(|path| self.store.ensure_layer_dirs(reference).map(|_| path))
            .map_err(|e| Error::pull(reference.to_string(), None, e))?;
        transition(reference, PullState::LayoutPrepared);

        let digests = manifest.distinct_digests();
        let bytes_written = self.fetch_layers(&token, reference, &digests).await?;

        transition(reference, PullState::Done);
        info!(
            "Pulled {} ({} layers, {} bytes)",
            reference,
            digests.len(),
            bytes_written
        );

        Ok(PullReport {
            reference: reference.clone(),
            manifest_path,
            digests,
            bytes_written,
        })
    }

    async fn fetch_layers(
        &self,
        token: &AuthToken,
        reference: &ImageReference,
        digests: &[String],
    ) -> Result<u64> {
        let mut fetches = stream::iter(digests)
            .map(|digest| self.fetch_layer(token, reference, digest))
            .buffer_unordered(self.concurrency);

        let mut total = 0u64;
        while let Some(result) = fetches.next().await {
            total += result?;
            transition(reference, PullState::BlobFetched);
        }
        Ok(total)
    }

    async fn fetch_layer(
        &self,
        token: &AuthToken,
        reference: &ImageReference,
        digest: &str,
    ) -> Result<u64> {
        let wrap = |e| Error::pull(reference.to_string(), Some(digest.to_string()), e);

        let blob = self
            .client
            .fetch_blob(token, reference, digest)
            .await
            .map_err(wrap)?;
        debug!(digest = %digest, size = ?blob.content_length(), "downloading layer");

        self.store
            .stream_blob_to_file(reference, digest, blob)
            .await
            .map_err(wrap)
    }
}

fn transition(reference: &ImageReference, state: PullState) {
    debug!(reference = %reference, state = %state, "pull state");
}
