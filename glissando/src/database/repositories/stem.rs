//! Stem repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::database::models::{ReadyArtifacts, StemDbModel};
use crate::database::time::datetime_to_ms;
use crate::domain::{Stem, StemMetadata, StemPatch, StemStatus};
use crate::Result;

/// Stem repository trait.
#[async_trait]
pub trait StemRepository: Send + Sync {
    /// Insert a RESERVED row owned by `song_id`.
    async fn insert_reserved(
        &self,
        song_id: i64,
        metadata: &StemMetadata,
        created_at: DateTime<Utc>,
    ) -> Result<Stem>;
    /// RESERVED -> PROCESSING. Returns false if the row was not RESERVED.
    async fn mark_processing(&self, id: i64, hostname: &str, pid: Option<i64>) -> Result<bool>;
    /// PROCESSING -> READY with the conversion outputs.
    async fn mark_ready(&self, id: i64, artifacts: &ReadyArtifacts) -> Result<bool>;
    /// PROCESSING -> FAILED.
    async fn mark_failed(&self, id: i64) -> Result<bool>;
    /// Patch metadata of a READY stem owned by `song_id`.
    async fn update_metadata(&self, song_id: i64, id: i64, patch: &StemPatch)
    -> Result<Option<Stem>>;
    /// READY -> DELETED for a stem owned by `song_id`. Returns rows affected.
    async fn mark_deleted(&self, song_id: i64, id: i64) -> Result<u64>;
    async fn get_stem(&self, id: i64) -> Result<Option<Stem>>;
    async fn list_for_song(&self, song_id: i64) -> Result<Vec<Stem>>;
    /// Remove FAILED rows created before `cutoff`.
    async fn delete_failed_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;
    /// Rows that are DELETED or orphaned.
    async fn list_reclaimable(&self) -> Result<Vec<Stem>>;
    /// Remove a reclaimed row, provided it is still reclaimable.
    async fn delete_reclaimed(&self, id: i64) -> Result<bool>;
    /// Move PROCESSING rows created before `cutoff` to FAILED.
    async fn fail_stale_processing(&self, cutoff: DateTime<Utc>) -> Result<Vec<Stem>>;
    /// Remove RESERVED rows created before `cutoff`. They never got artifacts.
    async fn delete_stale_reserved(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

/// SQLx implementation of StemRepository.
pub struct SqlxStemRepository {
    pool: SqlitePool,
}

impl SqlxStemRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn into_stems(rows: Vec<StemDbModel>) -> Result<Vec<Stem>> {
    rows.into_iter().map(Stem::try_from).collect()
}

#[async_trait]
impl StemRepository for SqlxStemRepository {
    async fn insert_reserved(
        &self,
        song_id: i64,
        metadata: &StemMetadata,
        created_at: DateTime<Utc>,
    ) -> Result<Stem> {
        let row = sqlx::query_as::<_, StemDbModel>(
            r#"
            INSERT INTO stem
                (song_id, status, name, instrument, gain_decibels, pan, "offset", created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(song_id)
        .bind(StemStatus::Reserved.as_str())
        .bind(&metadata.name)
        .bind(&metadata.instrument)
        .bind(metadata.gain_decibels)
        .bind(metadata.pan)
        .bind(metadata.offset)
        .bind(datetime_to_ms(created_at))
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    async fn mark_processing(&self, id: i64, hostname: &str, pid: Option<i64>) -> Result<bool> {
        let from = StemStatus::Reserved;
        let to = from.transition_to(StemStatus::Processing)?;
        let result = sqlx::query(
            r#"
            UPDATE stem SET status = ?, processing_hostname = ?, processing_pid = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(to.as_str())
        .bind(hostname)
        .bind(pid)
        .bind(id)
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_ready(&self, id: i64, artifacts: &ReadyArtifacts) -> Result<bool> {
        let from = StemStatus::Processing;
        let to = from.transition_to(StemStatus::Ready)?;
        let result = sqlx::query(
            r#"
            UPDATE stem SET
                status = ?,
                processing_hostname = NULL,
                processing_pid = NULL,
                samples = ?,
                sample_rate = ?,
                local = ?,
                location = ?,
                hq_location = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(to.as_str())
        .bind(artifacts.samples)
        .bind(artifacts.sample_rate)
        .bind(artifacts.local)
        .bind(&artifacts.location)
        .bind(&artifacts.hq_location)
        .bind(id)
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_failed(&self, id: i64) -> Result<bool> {
        let from = StemStatus::Processing;
        let to = from.transition_to(StemStatus::Failed)?;
        let result = sqlx::query(
            r#"
            UPDATE stem SET status = ?, processing_hostname = NULL, processing_pid = NULL
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(to.as_str())
        .bind(id)
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn update_metadata(
        &self,
        song_id: i64,
        id: i64,
        patch: &StemPatch,
    ) -> Result<Option<Stem>> {
        let row = sqlx::query_as::<_, StemDbModel>(
            r#"
            UPDATE stem SET
                name = COALESCE(?, name),
                instrument = COALESCE(?, instrument),
                "offset" = COALESCE(?, "offset"),
                gain_decibels = COALESCE(?, gain_decibels),
                pan = COALESCE(?, pan)
            WHERE id = ? AND song_id = ? AND status = ?
            RETURNING *
            "#,
        )
        .bind(patch.name.as_deref())
        .bind(patch.instrument.as_deref())
        .bind(patch.offset)
        .bind(patch.gain_decibels)
        .bind(patch.pan)
        .bind(id)
        .bind(song_id)
        .bind(StemStatus::Ready.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(Stem::try_from).transpose()
    }

    async fn mark_deleted(&self, song_id: i64, id: i64) -> Result<u64> {
        let from = StemStatus::Ready;
        let to = from.transition_to(StemStatus::Deleted)?;
        let result =
            sqlx::query("UPDATE stem SET status = ? WHERE id = ? AND song_id = ? AND status = ?")
                .bind(to.as_str())
                .bind(id)
                .bind(song_id)
                .bind(from.as_str())
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    async fn get_stem(&self, id: i64) -> Result<Option<Stem>> {
        let row = sqlx::query_as::<_, StemDbModel>("SELECT * FROM stem WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Stem::try_from).transpose()
    }

    async fn list_for_song(&self, song_id: i64) -> Result<Vec<Stem>> {
        let rows =
            sqlx::query_as::<_, StemDbModel>("SELECT * FROM stem WHERE song_id = ? ORDER BY id")
                .bind(song_id)
                .fetch_all(&self.pool)
                .await?;
        into_stems(rows)
    }

    async fn delete_failed_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM stem WHERE status = ? AND created_at < ?")
            .bind(StemStatus::Failed.as_str())
            .bind(datetime_to_ms(cutoff))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn list_reclaimable(&self) -> Result<Vec<Stem>> {
        let rows = sqlx::query_as::<_, StemDbModel>(
            "SELECT * FROM stem WHERE status = ? OR song_id IS NULL ORDER BY id",
        )
        .bind(StemStatus::Deleted.as_str())
        .fetch_all(&self.pool)
        .await?;
        into_stems(rows)
    }

    async fn delete_reclaimed(&self, id: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM stem
            WHERE id = ?
              AND (status = ? OR song_id IS NULL)
              AND status NOT IN (?, ?)
            "#,
        )
        .bind(id)
        .bind(StemStatus::Deleted.as_str())
        .bind(StemStatus::Reserved.as_str())
        .bind(StemStatus::Processing.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn fail_stale_processing(&self, cutoff: DateTime<Utc>) -> Result<Vec<Stem>> {
        let from = StemStatus::Processing;
        let to = from.transition_to(StemStatus::Failed)?;
        let rows = sqlx::query_as::<_, StemDbModel>(
            r#"
            UPDATE stem SET status = ?, processing_hostname = NULL, processing_pid = NULL
            WHERE status = ? AND created_at < ?
            RETURNING *
            "#,
        )
        .bind(to.as_str())
        .bind(from.as_str())
        .bind(datetime_to_ms(cutoff))
        .fetch_all(&self.pool)
        .await?;
        into_stems(rows)
    }

    async fn delete_stale_reserved(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM stem WHERE status = ? AND created_at < ?")
            .bind(StemStatus::Reserved.as_str())
            .bind(datetime_to_ms(cutoff))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::repositories::{SongRepository, SqlxSongRepository};
    use crate::database::{init_pool_with_size, run_migrations};

    async fn setup() -> (tempfile::TempDir, SqlxStemRepository, i64) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}?mode=rwc", dir.path().join("stems.db").display());
        let pool = init_pool_with_size(&url, 2).await.unwrap();
        run_migrations(&pool).await.unwrap();

        let song = SqlxSongRepository::new(pool.clone())
            .create_song("Eyes of the World")
            .await
            .unwrap();
        (dir, SqlxStemRepository::new(pool), song.id)
    }

    fn artifacts() -> ReadyArtifacts {
        ReadyArtifacts {
            samples: 44_100,
            sample_rate: 44_100,
            local: true,
            location: "a.oga".to_string(),
            hq_location: "a.flac".to_string(),
        }
    }

    #[tokio::test]
    async fn test_status_updates_require_prior_status() {
        let (_dir, repo, song_id) = setup().await;
        let metadata = StemMetadata::new("Organ", "organ").with_offset(-12);
        let stem = repo.insert_reserved(song_id, &metadata, Utc::now()).await.unwrap();
        assert_eq!(stem.status, StemStatus::Reserved);
        assert_eq!(stem.offset, -12);

        assert!(!repo.mark_ready(stem.id, &artifacts()).await.unwrap());
        assert!(!repo.mark_failed(stem.id).await.unwrap());

        assert!(repo.mark_processing(stem.id, "host", Some(7)).await.unwrap());
        assert!(!repo.mark_processing(stem.id, "host", Some(8)).await.unwrap());

        assert!(repo.mark_ready(stem.id, &artifacts()).await.unwrap());
        assert!(!repo.mark_failed(stem.id).await.unwrap());

        let ready = repo.get_stem(stem.id).await.unwrap().unwrap();
        assert_eq!(ready.status, StemStatus::Ready);
        assert_eq!(ready.processing_pid, None);
        assert_eq!(ready.local, Some(true));
        assert_eq!(ready.location.as_deref(), Some("a.oga"));
    }

    #[tokio::test]
    async fn test_update_metadata_patches_only_given_fields() {
        let (_dir, repo, song_id) = setup().await;
        let stem = repo
            .insert_reserved(song_id, &StemMetadata::new("Organ", "organ"), Utc::now())
            .await
            .unwrap();
        repo.mark_processing(stem.id, "host", None).await.unwrap();
        repo.mark_ready(stem.id, &artifacts()).await.unwrap();

        let patch = StemPatch {
            offset: Some(512),
            gain_decibels: Some(-6.0),
            ..Default::default()
        };
        let updated = repo
            .update_metadata(song_id, stem.id, &patch)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.name, "Organ");
        assert_eq!(updated.offset, 512);
        assert_eq!(updated.gain_decibels, -6.0);

        assert_eq!(repo.mark_deleted(song_id, stem.id).await.unwrap(), 1);
        assert!(
            repo.update_metadata(song_id, stem.id, &patch)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_reclaimable_selection() {
        let (_dir, repo, song_id) = setup().await;
        let metadata = StemMetadata::new("Organ", "organ");

        let reserved = repo.insert_reserved(song_id, &metadata, Utc::now()).await.unwrap();
        let deleted = repo.insert_reserved(song_id, &metadata, Utc::now()).await.unwrap();
        repo.mark_processing(deleted.id, "host", None).await.unwrap();
        repo.mark_ready(deleted.id, &artifacts()).await.unwrap();
        repo.mark_deleted(song_id, deleted.id).await.unwrap();

        let ids: Vec<i64> = repo
            .list_reclaimable()
            .await
            .unwrap()
            .iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec![deleted.id]);

        assert!(!repo.delete_reclaimed(reserved.id).await.unwrap());
        assert!(repo.delete_reclaimed(deleted.id).await.unwrap());
        assert!(repo.get_stem(deleted.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_stale_reserved_spares_newer_and_processing_rows() {
        let (_dir, repo, song_id) = setup().await;
        let metadata = StemMetadata::new("Organ", "organ");
        let then = Utc::now() - chrono::Duration::hours(8);

        let stale = repo.insert_reserved(song_id, &metadata, then).await.unwrap();
        let converting = repo.insert_reserved(song_id, &metadata, then).await.unwrap();
        repo.mark_processing(converting.id, "host", None).await.unwrap();
        let fresh = repo.insert_reserved(song_id, &metadata, Utc::now()).await.unwrap();

        let cutoff = Utc::now() - chrono::Duration::hours(6);
        assert_eq!(repo.delete_stale_reserved(cutoff).await.unwrap(), 1);
        assert!(repo.get_stem(stale.id).await.unwrap().is_none());
        assert!(repo.get_stem(converting.id).await.unwrap().is_some());
        assert!(repo.get_stem(fresh.id).await.unwrap().is_some());
    }
}
