//! Lifecycle manager.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::conversion::{ConversionHandle, ConversionJob, ConversionWorker};
use crate::database::repositories::StemRepository;
use crate::domain::{Stem, StemMetadata, StemPatch};
use crate::{Error, Result};

/// Entry point for creating, updating and deleting stems.
///
/// Every mutation is a conditional write; a stem that is not in the expected
/// state (or does not belong to the song) is reported as not found, never as
/// an error.
pub struct StemLifecycleManager {
    stems: Arc<dyn StemRepository>,
    worker: ConversionWorker,
    clock: Arc<dyn Clock>,
}

impl StemLifecycleManager {
    pub fn new(
        stems: Arc<dyn StemRepository>,
        worker: ConversionWorker,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            stems,
            worker,
            clock,
        }
    }

    /// Register an uploaded file and start converting it.
    ///
    /// Returns once the stem is PROCESSING; conversion continues in the
    /// background.
    pub async fn create(
        &self,
        song_id: i64,
        metadata: StemMetadata,
        upload_path: impl Into<PathBuf>,
    ) -> Result<Stem> {
        let (stem, _handle) = self.create_tracked(song_id, metadata, upload_path).await?;
        Ok(stem)
    }

    /// Like [`create`](Self::create), also returning a handle to the
    /// conversion outcome.
    pub async fn create_tracked(
        &self,
        song_id: i64,
        metadata: StemMetadata,
        upload_path: impl Into<PathBuf>,
    ) -> Result<(Stem, ConversionHandle)> {
        let mut stem = self
            .stems
            .insert_reserved(song_id, &metadata, self.clock.now())
            .await?;

        let job = ConversionJob {
            stem_id: stem.id,
            upload_path: upload_path.into(),
            base_name: artifact_base_name(),
        };
        debug!(stem_id = stem.id, base_name = %job.base_name, "Submitting conversion");

        let pending = self.worker.submit(job);
        let marked = match self
            .stems
            .mark_processing(stem.id, pending.hostname(), pending.pid())
            .await
        {
            Ok(marked) => marked,
            Err(e) => {
                pending.abandon();
                return Err(e);
            }
        };
        if !marked {
            warn!(stem_id = stem.id, "Reserved stem changed before conversion started");
            pending.abandon();
            return Err(Error::not_found("stem", stem.id));
        }

        stem.begin_processing(pending.hostname(), pending.pid())?;
        let handle = pending.start();

        info!(
            stem_id = stem.id,
            song_id,
            pid = ?stem.processing_pid,
            "Stem accepted for processing"
        );
        Ok((stem, handle))
    }

    /// Patch the metadata of a READY stem. `None` means no such ready stem.
    pub async fn update(&self, song_id: i64, id: i64, patch: &StemPatch) -> Result<Option<Stem>> {
        if patch.is_empty() {
            return Ok(self
                .stems
                .get_stem(id)
                .await?
                .filter(|stem| stem.song_id == Some(song_id) && stem.status.is_mutable()));
        }

        let updated = self.stems.update_metadata(song_id, id, patch).await?;
        if updated.is_none() {
            debug!(stem_id = id, song_id, "No ready stem to update");
        }
        Ok(updated)
    }

    /// Mark a READY stem deleted. Returns the number of rows changed (0 or 1).
    ///
    /// Artifacts are removed later by the cleanup sweep.
    pub async fn delete(&self, song_id: i64, id: i64) -> Result<u64> {
        let affected = self.stems.mark_deleted(song_id, id).await?;
        if affected > 0 {
            info!(stem_id = id, song_id, "Stem deleted");
        }
        Ok(affected)
    }

    pub async fn get(&self, id: i64) -> Result<Option<Stem>> {
        self.stems.get_stem(id).await
    }

    pub async fn list_for_song(&self, song_id: i64) -> Result<Vec<Stem>> {
        self.stems.list_for_song(song_id).await
    }
}

/// Random, collision-resistant base name for a stem's artifacts.
fn artifact_base_name() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_base_names_are_unique_and_path_safe() {
        let a = artifact_base_name();
        let b = artifact_base_name();
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
