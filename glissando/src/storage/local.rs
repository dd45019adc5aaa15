//! Local filesystem backend.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::StorageBackend;
use crate::{Error, Result};

/// Stores artifacts as bare files under a base directory.
///
/// The transcoder already writes its outputs into this directory, so a put
/// whose source is the destination only checks that the file is there.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    base_dir: PathBuf,
}

impl LocalStorage {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Create the base directory if needed.
    pub async fn ensure_dir(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.base_dir).await?;
        Ok(())
    }

    /// Absolute path of `key`.
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.base_dir.join(key)
    }
}

#[async_trait]
impl StorageBackend for LocalStorage {
    fn name(&self) -> &'static str {
        "local"
    }

    fn is_local(&self) -> bool {
        true
    }

    async fn put(&self, source: &Path, key: &str, _content_type: &str) -> Result<()> {
        let dest = self.path_for(key);
        if source == dest {
            return match tokio::fs::metadata(&dest).await {
                Ok(meta) if meta.is_file() => Ok(()),
                Ok(_) => Err(Error::storage(format!("{} is not a file", dest.display()))),
                Err(e) if e.kind() == ErrorKind::NotFound => Err(Error::storage(format!(
                    "artifact {} was not produced",
                    dest.display()
                ))),
                Err(e) => Err(e.into()),
            };
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(source, &dest).await?;
        debug!("Copied {} to {}", source.display(), dest.display());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
