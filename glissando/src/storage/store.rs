//! Artifact persistence on top of the storage backends.
//!
//! [`ArtifactStore`] decides once whether artifacts go to local disk or to
//! object storage, and handles retries, compensation and reclamation.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use super::{ArtifactKind, LocalStorage, StorageBackend};
use crate::{Error, Result};

const DEFAULT_MAX_CONCURRENT_UPLOADS: usize = 4;
const DEFAULT_DELETE_TIMEOUT: Duration = Duration::from_secs(30);

/// How often one artifact upload is attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadRetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for UploadRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            delay: Duration::from_secs(1),
        }
    }
}

/// Key prefixes for remote artifacts, one per kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyPrefixes {
    pub lossy: String,
    pub lossless: String,
}

impl KeyPrefixes {
    pub fn new(lossy: impl Into<String>, lossless: impl Into<String>) -> Self {
        Self {
            lossy: lossy.into(),
            lossless: lossless.into(),
        }
    }

    fn for_kind(&self, kind: ArtifactKind) -> &str {
        match kind {
            ArtifactKind::Lossy => &self.lossy,
            ArtifactKind::Lossless => &self.lossless,
        }
    }
}

/// Where a converted pair ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredPair {
    pub local: bool,
    pub location: String,
    pub hq_location: String,
}

/// Per-stem result of a reclaim attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReclaimOutcome {
    /// Artifacts deleted, or already gone from the backend.
    pub removed: usize,
    pub failed: usize,
}

impl ReclaimOutcome {
    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }
}

/// Decides where artifacts live and moves them there.
///
/// The remote backend, when configured, is chosen once at construction. The
/// local backend is always kept: it is the transcoder's staging directory and
/// still holds artifacts of stems persisted while remote storage was off.
pub struct ArtifactStore {
    local: LocalStorage,
    remote: Option<Arc<dyn StorageBackend>>,
    prefixes: KeyPrefixes,
    retry: UploadRetryPolicy,
    upload_permits: Arc<Semaphore>,
    delete_timeout: Duration,
}

impl std::fmt::Debug for ArtifactStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactStore")
            .field("local", &self.local)
            .field("remote", &self.remote.as_ref().map(|r| r.name()))
            .field("prefixes", &self.prefixes)
            .field("retry", &self.retry)
            .field("delete_timeout", &self.delete_timeout)
            .finish()
    }
}

impl ArtifactStore {
    pub fn new(local: LocalStorage, remote: Option<Arc<dyn StorageBackend>>) -> Self {
        Self {
            local,
            remote,
            prefixes: KeyPrefixes::default(),
            retry: UploadRetryPolicy::default(),
            upload_permits: Arc::new(Semaphore::new(DEFAULT_MAX_CONCURRENT_UPLOADS)),
            delete_timeout: DEFAULT_DELETE_TIMEOUT,
        }
    }

    pub fn with_prefixes(mut self, prefixes: KeyPrefixes) -> Self {
        self.prefixes = prefixes;
        self
    }

    pub fn with_retry_policy(mut self, retry: UploadRetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_concurrent_uploads(mut self, permits: usize) -> Self {
        self.upload_permits = Arc::new(Semaphore::new(permits.max(1)));
        self
    }

    pub fn with_delete_timeout(mut self, timeout: Duration) -> Self {
        self.delete_timeout = timeout;
        self
    }

    pub fn is_remote(&self) -> bool {
        self.remote.is_some()
    }

    pub fn local(&self) -> &LocalStorage {
        &self.local
    }

    /// Output prefix handed to the transcoder for `base_name`.
    pub fn staging_prefix(&self, base_name: &str) -> PathBuf {
        self.local.path_for(base_name)
    }

    pub fn staged_path(&self, base_name: &str, kind: ArtifactKind) -> PathBuf {
        self.local.path_for(&kind.file_name(base_name))
    }

    /// Storage key of an artifact. Prefixes only apply to remote keys.
    pub fn key_for(&self, base_name: &str, kind: ArtifactKind, remote: bool) -> String {
        let file_name = kind.file_name(base_name);
        let prefix = self.prefixes.for_kind(kind);
        if !remote || prefix.is_empty() {
            return file_name;
        }
        if prefix.ends_with('/') {
            format!("{prefix}{file_name}")
        } else {
            format!("{prefix}/{file_name}")
        }
    }

    /// Persist both staged outputs of `base_name` to the active backend.
    ///
    /// With remote storage, each upload is retried per the retry policy. If
    /// the lossless upload fails after the lossy one succeeded, the lossy
    /// object is deleted before the error is returned. Staged local copies
    /// are removed after any remote attempt.
    pub async fn persist_pair(&self, base_name: &str) -> Result<StoredPair> {
        let Some(remote) = &self.remote else {
            let location = self.key_for(base_name, ArtifactKind::Lossy, false);
            let hq_location = self.key_for(base_name, ArtifactKind::Lossless, false);
            for (kind, key) in [
                (ArtifactKind::Lossy, &location),
                (ArtifactKind::Lossless, &hq_location),
            ] {
                self.local
                    .put(&self.staged_path(base_name, kind), key, kind.content_type())
                    .await?;
            }
            return Ok(StoredPair {
                local: true,
                location,
                hq_location,
            });
        };

        let result = self.upload_pair(remote.as_ref(), base_name).await;
        self.discard_staged(base_name).await;
        result
    }

    async fn upload_pair(
        &self,
        remote: &dyn StorageBackend,
        base_name: &str,
    ) -> Result<StoredPair> {
        let _permit = self
            .upload_permits
            .acquire()
            .await
            .map_err(|_| Error::storage("upload limiter closed"))?;

        let location = self.key_for(base_name, ArtifactKind::Lossy, true);
        self.upload_with_retry(remote, base_name, ArtifactKind::Lossy, &location)
            .await?;

        let hq_location = self.key_for(base_name, ArtifactKind::Lossless, true);
        if let Err(e) = self
            .upload_with_retry(remote, base_name, ArtifactKind::Lossless, &hq_location)
            .await
        {
            warn!(key = %location, "Removing unpaired lossy artifact");
            if let Err(del) = remote.delete(&location).await {
                error!(key = %location, error = %del, "Compensating delete failed");
            }
            return Err(e);
        }

        Ok(StoredPair {
            local: false,
            location,
            hq_location,
        })
    }

    async fn upload_with_retry(
        &self,
        remote: &dyn StorageBackend,
        base_name: &str,
        kind: ArtifactKind,
        key: &str,
    ) -> Result<()> {
        let source = self.staged_path(base_name, kind);
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match remote.put(&source, key, kind.content_type()).await {
                Ok(()) => {
                    debug!(key, attempt, "Uploaded {} artifact", kind);
                    return Ok(());
                }
                Err(e) if attempt < max_attempts => {
                    warn!(
                        key,
                        attempt,
                        max_attempts,
                        error = %e,
                        "Upload failed, retrying in {:?}",
                        self.retry.delay
                    );
                    tokio::time::sleep(self.retry.delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(key, attempt, error = %e, "Upload failed, giving up");
                    return Err(e);
                }
            }
        }
    }

    /// Remove whatever the transcoder left in the staging directory.
    pub async fn discard_staged(&self, base_name: &str) {
        for kind in ArtifactKind::ALL {
            let path = self.staged_path(base_name, kind);
            if let Err(e) = remove_if_exists(&path).await {
                warn!(path = %path.display(), error = %e, "Failed to remove staged artifact");
            }
        }
    }

    /// Delete both artifacts of a stem from wherever they were stored.
    ///
    /// `local` is the flag recorded on the stem; keys that were never set
    /// are skipped. Each delete is bounded by the delete timeout.
    pub async fn reclaim(&self, local: Option<bool>, keys: [Option<&str>; 2]) -> ReclaimOutcome {
        let mut outcome = ReclaimOutcome::default();

        let backend: Option<&dyn StorageBackend> = match local {
            Some(false) => self.remote.as_deref(),
            _ => Some(&self.local as &dyn StorageBackend),
        };

        for key in keys {
            let Some(key) = key else {
                continue;
            };

            let Some(backend) = backend else {
                warn!(key, "Artifact is remote but object storage is disabled");
                outcome.failed += 1;
                continue;
            };

            match tokio::time::timeout(self.delete_timeout, backend.delete(key)).await {
                Ok(Ok(())) => outcome.removed += 1,
                Ok(Err(e)) => {
                    warn!(key, backend = backend.name(), error = %e, "Failed to delete artifact");
                    outcome.failed += 1;
                }
                Err(_) => {
                    warn!(
                        key,
                        backend = backend.name(),
                        "Delete timed out after {:?}",
                        self.delete_timeout
                    );
                    outcome.failed += 1;
                }
            }
        }

        outcome
    }

    /// Log which backend is active.
    pub fn log_summary(&self) {
        match &self.remote {
            Some(remote) => info!(
                backend = remote.name(),
                lossy_prefix = %self.prefixes.lossy,
                lossless_prefix = %self.prefixes.lossless,
                "Artifacts are stored remotely"
            ),
            None => info!(dir = %self.local.base_dir().display(), "Artifacts are stored locally"),
        }
    }
}

async fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
