//! Song repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::Result;
use crate::database::models::{SongDbModel, slugify};
use crate::database::time::datetime_to_ms;

/// Song repository trait.
#[async_trait]
pub trait SongRepository: Send + Sync {
    async fn create_song(&self, title: &str) -> Result<SongDbModel>;
    async fn get_song(&self, id: i64) -> Result<Option<SongDbModel>>;
    /// Delete a song. Its stems are detached, not deleted.
    async fn delete_song(&self, id: i64) -> Result<u64>;
}

/// SQLx implementation of SongRepository.
pub struct SqlxSongRepository {
    pool: SqlitePool,
}

impl SqlxSongRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SongRepository for SqlxSongRepository {
    async fn create_song(&self, title: &str) -> Result<SongDbModel> {
        let song = sqlx::query_as::<_, SongDbModel>(
            "INSERT INTO song (slug, title, created_at) VALUES (?, ?, ?) RETURNING *",
        )
        .bind(slugify(title))
        .bind(title)
        .bind(datetime_to_ms(chrono::Utc::now()))
        .fetch_one(&self.pool)
        .await?;
        Ok(song)
    }

    async fn get_song(&self, id: i64) -> Result<Option<SongDbModel>> {
        let song = sqlx::query_as::<_, SongDbModel>("SELECT * FROM song WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(song)
    }

    async fn delete_song(&self, id: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM song WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
