//! Artifact storage.
//!
//! A [`StorageBackend`] knows how to put and delete one object. The
//! [`ArtifactStore`] owns the choice between local disk and object storage,
//! key naming, upload retries and compensation.

pub mod local;
pub mod memory;
pub mod s3;
mod store;

use std::path::Path;

use async_trait::async_trait;

use crate::Result;

pub use local::LocalStorage;
pub use memory::{MemoryStorage, StorageOp};
pub use s3::{S3Config, S3Storage};
pub use store::{ArtifactStore, KeyPrefixes, ReclaimOutcome, StoredPair, UploadRetryPolicy};

/// One place artifacts can be written to.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Whether objects live on the local filesystem.
    fn is_local(&self) -> bool;

    /// Store the file at `source` under `key`.
    async fn put(&self, source: &Path, key: &str, content_type: &str) -> Result<()>;

    /// Remove the object stored under `key`. A missing object is not an error.
    async fn delete(&self, key: &str) -> Result<()>;
}

/// The two files produced for every stem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    /// Streaming copy.
    Lossy,
    /// Archival copy.
    Lossless,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 2] = [ArtifactKind::Lossy, ArtifactKind::Lossless];

    pub fn extension(self) -> &'static str {
        match self {
            Self::Lossy => "oga",
            Self::Lossless => "flac",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            Self::Lossy => "audio/ogg",
            Self::Lossless => "audio/flac",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lossy => "lossy",
            Self::Lossless => "lossless",
        }
    }

    /// File name of this artifact for a stem's base name.
    pub fn file_name(self, base_name: &str) -> String {
        format!("{}.{}", base_name, self.extension())
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
