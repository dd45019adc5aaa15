#![cfg(unix)]

mod common;

use common::{Harness, SAMPLES};
use glissando::conversion::ConversionOutcome;
use glissando::domain::{StemMetadata, StemPatch, StemStatus, StemView};
use glissando::storage::StorageOp;

fn guitar() -> StemMetadata {
    StemMetadata::new("Guitar", "guitar-main")
}

#[tokio::test]
async fn local_stem_becomes_ready() {
    let h = Harness::local().await;
    let song = h.song("Dark Star").await;
    let upload = h.upload("guitar.wav", "RIFF guitar");

    let (stem, handle) = h
        .container
        .lifecycle
        .create_tracked(song.id, guitar(), &upload)
        .await
        .unwrap();
    assert_eq!(stem.status, StemStatus::Processing);
    assert_eq!(stem.song_id, Some(song.id));
    assert!(stem.processing_hostname.is_some());
    assert!(stem.processing_pid.is_some());

    let outcome = handle.outcome().await;
    assert_eq!(
        outcome,
        ConversionOutcome::Ready {
            samples: SAMPLES,
            local: true
        }
    );

    let stem = h.container.lifecycle.get(stem.id).await.unwrap().unwrap();
    assert_eq!(stem.status, StemStatus::Ready);
    assert_eq!(stem.samples, Some(SAMPLES));
    assert_eq!(stem.sample_rate, Some(44_100));
    assert_eq!(stem.local, Some(true));
    assert_eq!(stem.processing_hostname, None);
    assert_eq!(stem.processing_pid, None);
    assert_eq!(stem.duration_secs(), Some(3.0));

    let location = stem.location.clone().unwrap();
    let hq_location = stem.hq_location.clone().unwrap();
    assert!(location.ends_with(".oga"));
    assert!(hq_location.ends_with(".flac"));
    assert!(!location.contains('/'));
    assert!(h.stem_file(&location).exists());
    assert!(h.stem_file(&hq_location).exists());

    match h.container.view(&stem) {
        Some(StemView::Ready {
            path,
            lossless_path,
            samples,
            ..
        }) => {
            assert_eq!(path, format!("/static/stems/{location}"));
            assert_eq!(lossless_path, format!("/static/stems/{hq_location}"));
            assert_eq!(samples, SAMPLES);
        }
        other => panic!("unexpected view {other:?}"),
    }
}

#[tokio::test]
async fn remote_stem_uses_prefixed_keys() {
    let h = Harness::builder().remote().build().await;
    let song = h.song("Dark Star").await;
    let upload = h.upload("guitar.wav", "RIFF guitar");

    let (stem, handle) = h
        .container
        .lifecycle
        .create_tracked(song.id, guitar(), &upload)
        .await
        .unwrap();
    assert!(handle.outcome().await.is_ready());

    let stem = h.container.lifecycle.get(stem.id).await.unwrap().unwrap();
    assert_eq!(stem.status, StemStatus::Ready);
    assert_eq!(stem.local, Some(false));

    let location = stem.location.clone().unwrap();
    let hq_location = stem.hq_location.clone().unwrap();
    assert!(location.starts_with("lossy/") && location.ends_with(".oga"));
    assert!(hq_location.starts_with("lossless/") && hq_location.ends_with(".flac"));
    assert_eq!(h.remote().object(&location).unwrap(), b"RIFF guitar");
    assert!(h.remote().contains(&hq_location));

    assert!(h.remote().ops().contains(&StorageOp::Put {
        key: location.clone(),
        content_type: "audio/ogg".to_string(),
    }));
    assert!(h.stem_files().is_empty(), "staged copies should be removed");

    match h.container.view(&stem) {
        Some(StemView::Ready { path, .. }) => {
            assert_eq!(path, format!("https://cdn.example.com/band-stems/{location}"));
        }
        other => panic!("unexpected view {other:?}"),
    }
}

#[tokio::test]
async fn upload_retry_recovers() {
    let h = Harness::builder().remote().build().await;
    h.remote().fail_puts(".oga", 1);
    let song = h.song("Dark Star").await;

    let (stem, handle) = h
        .container
        .lifecycle
        .create_tracked(song.id, guitar(), h.upload("g.wav", "audio"))
        .await
        .unwrap();
    assert!(handle.outcome().await.is_ready());

    let stem = h.container.lifecycle.get(stem.id).await.unwrap().unwrap();
    assert_eq!(stem.status, StemStatus::Ready);
    assert_eq!(h.remote().put_attempts(stem.location.as_deref().unwrap()), 2);
}

#[tokio::test]
async fn lossless_upload_failure_compensates() {
    let h = Harness::builder().remote().build().await;
    h.remote().fail_puts(".flac", usize::MAX);
    let song = h.song("Dark Star").await;

    let (stem, handle) = h
        .container
        .lifecycle
        .create_tracked(song.id, guitar(), h.upload("g.wav", "audio"))
        .await
        .unwrap();
    assert!(matches!(handle.outcome().await, ConversionOutcome::Failed { .. }));

    let stem = h.container.lifecycle.get(stem.id).await.unwrap().unwrap();
    assert_eq!(stem.status, StemStatus::Failed);
    assert_eq!(stem.location, None);
    assert!(h.remote().keys().is_empty());

    let deleted_lossy = h
        .remote()
        .ops()
        .iter()
        .any(|op| matches!(op, StorageOp::Delete { key } if key.starts_with("lossy/")));
    assert!(deleted_lossy);
    assert!(h.stem_files().is_empty());
}

#[tokio::test]
async fn transcoder_failure_marks_failed_and_removes_upload() {
    let h = Harness::local().await;
    let song = h.song("Dark Star").await;
    let upload = h.upload("broken.wav", "FAIL");

    let (stem, handle) = h
        .container
        .lifecycle
        .create_tracked(song.id, guitar(), &upload)
        .await
        .unwrap();

    match handle.outcome().await {
        ConversionOutcome::Failed { reason } => assert!(reason.contains("exit code 2"), "{reason}"),
        other => panic!("unexpected outcome {other:?}"),
    }

    let stem = h.container.lifecycle.get(stem.id).await.unwrap().unwrap();
    assert_eq!(stem.status, StemStatus::Failed);
    assert_eq!(stem.processing_hostname, None);
    assert!(!upload.exists());
    assert!(h.stem_files().is_empty());
    assert!(matches!(h.container.view(&stem), Some(StemView::Failed { .. })));
}

#[tokio::test]
async fn missing_transcoder_fails_the_stem() {
    let h = Harness::builder()
        .program("/nonexistent/glissando-transcoder")
        .build()
        .await;
    let song = h.song("Dark Star").await;

    let (stem, handle) = h
        .container
        .lifecycle
        .create_tracked(song.id, guitar(), h.upload("g.wav", "audio"))
        .await
        .unwrap();
    assert_eq!(stem.status, StemStatus::Processing);
    assert_eq!(stem.processing_pid, None);

    assert!(matches!(handle.outcome().await, ConversionOutcome::Failed { .. }));
    let stem = h.container.lifecycle.get(stem.id).await.unwrap().unwrap();
    assert_eq!(stem.status, StemStatus::Failed);
}

#[tokio::test]
async fn create_without_tracking_still_converts() {
    let h = Harness::local().await;
    let song = h.song("Dark Star").await;

    let stem = h
        .container
        .lifecycle
        .create(song.id, guitar(), h.upload("g.wav", "audio"))
        .await
        .unwrap();
    assert_eq!(stem.status, StemStatus::Processing);

    let mut status = stem.status;
    for _ in 0..100 {
        status = h.container.lifecycle.get(stem.id).await.unwrap().unwrap().status;
        if status != StemStatus::Processing {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    assert_eq!(status, StemStatus::Ready);
}

#[tokio::test]
async fn update_and_delete_are_conditional() {
    let h = Harness::local().await;
    let song = h.song("Dark Star").await;
    let other = h.song("Ripple").await;
    let lifecycle = &h.container.lifecycle;

    let (stem, handle) = lifecycle
        .create_tracked(song.id, guitar(), h.upload("g.wav", "SLOW"))
        .await
        .unwrap();

    let rename = StemPatch {
        name: Some("Lead Guitar".to_string()),
        pan: Some(-0.5),
        ..Default::default()
    };

    // Still processing.
    assert!(lifecycle.update(song.id, stem.id, &rename).await.unwrap().is_none());
    assert_eq!(lifecycle.delete(song.id, stem.id).await.unwrap(), 0);

    assert!(handle.outcome().await.is_ready());

    assert!(lifecycle.update(other.id, stem.id, &rename).await.unwrap().is_none());
    let updated = lifecycle
        .update(song.id, stem.id, &rename)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.name, "Lead Guitar");
    assert_eq!(updated.pan, -0.5);
    assert_eq!(updated.instrument, "guitar-main");
    assert_eq!(updated.status, StemStatus::Ready);

    let unchanged = lifecycle
        .update(song.id, stem.id, &StemPatch::default())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(unchanged.name, "Lead Guitar");

    assert_eq!(lifecycle.delete(other.id, stem.id).await.unwrap(), 0);
    assert_eq!(lifecycle.delete(song.id, stem.id).await.unwrap(), 1);
    assert_eq!(lifecycle.delete(song.id, stem.id).await.unwrap(), 0);
    assert!(lifecycle.update(song.id, stem.id, &rename).await.unwrap().is_none());

    let stem = lifecycle.get(stem.id).await.unwrap().unwrap();
    assert_eq!(stem.status, StemStatus::Deleted);
    assert!(h.container.view(&stem).is_none());

    let listed = lifecycle.list_for_song(song.id).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert!(lifecycle.list_for_song(other.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn abandoned_conversion_discards_files() {
    use glissando::conversion::{ConversionJob, ConversionWorker, Transcoder};
    use std::sync::Arc;

    let h = Harness::local().await;
    let song = h.song("Dark Star").await;
    let stem = h
        .container
        .stems
        .insert_reserved(song.id, &guitar(), chrono::Utc::now())
        .await
        .unwrap();
    let upload = h.upload("slow.wav", "SLOW");

    let script = h.dir.path().join("process-file.sh");
    let transcoder = Transcoder::new("/bin/sh").with_leading_args([script.display().to_string()]);
    let worker = ConversionWorker::new(
        Arc::new(transcoder),
        h.container.store.clone(),
        h.container.stems.clone(),
        44_100,
    )
    .with_hostname("test-host");

    let pending = worker.submit(ConversionJob {
        stem_id: stem.id,
        upload_path: upload.clone(),
        base_name: "abandoned".to_string(),
    });
    assert_eq!(pending.hostname(), "test-host");
    assert!(pending.pid().is_some());

    let outcome = pending.abandon().outcome().await;
    assert!(matches!(outcome, ConversionOutcome::Abandoned { .. }));
    assert!(!upload.exists());
    assert!(h.stem_files().is_empty());

    let stem = h.container.lifecycle.get(stem.id).await.unwrap().unwrap();
    assert_eq!(stem.status, StemStatus::Reserved);
}

/// Stem store whose READY write always errors.
struct ReadyWriteFails(std::sync::Arc<dyn glissando::database::repositories::StemRepository>);

#[async_trait::async_trait]
impl glissando::database::repositories::StemRepository for ReadyWriteFails {
    async fn insert_reserved(
        &self,
        song_id: i64,
        metadata: &StemMetadata,
        created_at: chrono::DateTime<chrono::Utc>,
    ) -> glissando::Result<glissando::domain::Stem> {
        self.0.insert_reserved(song_id, metadata, created_at).await
    }

    async fn mark_processing(
        &self,
        id: i64,
        hostname: &str,
        pid: Option<i64>,
    ) -> glissando::Result<bool> {
        self.0.mark_processing(id, hostname, pid).await
    }

    async fn mark_ready(
        &self,
        _id: i64,
        _artifacts: &glissando::database::models::ReadyArtifacts,
    ) -> glissando::Result<bool> {
        Err(glissando::Error::Other("disk I/O error".to_string()))
    }

    async fn mark_failed(&self, id: i64) -> glissando::Result<bool> {
        self.0.mark_failed(id).await
    }

    async fn update_metadata(
        &self,
        song_id: i64,
        id: i64,
        patch: &StemPatch,
    ) -> glissando::Result<Option<glissando::domain::Stem>> {
        self.0.update_metadata(song_id, id, patch).await
    }

    async fn mark_deleted(&self, song_id: i64, id: i64) -> glissando::Result<u64> {
        self.0.mark_deleted(song_id, id).await
    }

    async fn get_stem(&self, id: i64) -> glissando::Result<Option<glissando::domain::Stem>> {
        self.0.get_stem(id).await
    }

    async fn list_for_song(&self, song_id: i64) -> glissando::Result<Vec<glissando::domain::Stem>> {
        self.0.list_for_song(song_id).await
    }

    async fn delete_failed_before(
        &self,
        cutoff: chrono::DateTime<chrono::Utc>,
    ) -> glissando::Result<u64> {
        self.0.delete_failed_before(cutoff).await
    }

    async fn list_reclaimable(&self) -> glissando::Result<Vec<glissando::domain::Stem>> {
        self.0.list_reclaimable().await
    }

    async fn delete_reclaimed(&self, id: i64) -> glissando::Result<bool> {
        self.0.delete_reclaimed(id).await
    }

    async fn fail_stale_processing(
        &self,
        cutoff: chrono::DateTime<chrono::Utc>,
    ) -> glissando::Result<Vec<glissando::domain::Stem>> {
        self.0.fail_stale_processing(cutoff).await
    }

    async fn delete_stale_reserved(
        &self,
        cutoff: chrono::DateTime<chrono::Utc>,
    ) -> glissando::Result<u64> {
        self.0.delete_stale_reserved(cutoff).await
    }
}

#[tokio::test]
async fn ready_write_error_marks_failed() {
    use glissando::conversion::{ConversionJob, ConversionWorker, Transcoder};
    use std::sync::Arc;

    let h = Harness::local().await;
    let song = h.song("Dark Star").await;
    let stems = h.container.stems.clone();
    let stem = stems
        .insert_reserved(song.id, &guitar(), chrono::Utc::now())
        .await
        .unwrap();
    let upload = h.upload("guitar.wav", "RIFF guitar");

    let script = h.dir.path().join("process-file.sh");
    let transcoder = Transcoder::new("/bin/sh").with_leading_args([script.display().to_string()]);
    let worker = ConversionWorker::new(
        Arc::new(transcoder),
        h.container.store.clone(),
        Arc::new(ReadyWriteFails(stems.clone())),
        44_100,
    )
    .with_hostname("test-host");

    let pending = worker.submit(ConversionJob {
        stem_id: stem.id,
        upload_path: upload.clone(),
        base_name: "unwritable".to_string(),
    });
    assert!(stems.mark_processing(stem.id, pending.hostname(), pending.pid()).await.unwrap());

    match pending.start().outcome().await {
        ConversionOutcome::Failed { reason } => assert!(reason.contains("disk I/O error")),
        other => panic!("unexpected outcome {other:?}"),
    }

    let stem = stems.get_stem(stem.id).await.unwrap().unwrap();
    assert_eq!(stem.status, StemStatus::Failed);
    assert_eq!(stem.processing_hostname, None);
    assert_eq!(stem.processing_pid, None);
    assert_eq!(stem.location, None);
    assert!(!upload.exists());
    assert!(h.stem_files().is_empty());
}
