//! Service container for dependency injection.
//!
//! Builds every component from an [`AppConfig`] and owns the background
//! cleanup tasks.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::Result;
use crate::cleanup::{CleanupScheduler, CleanupSweeper};
use crate::clock::{Clock, SystemClock};
use crate::config::AppConfig;
use crate::conversion::{ConversionWorker, Transcoder};
use crate::database::repositories::{
    SongRepository, SqlxSongRepository, SqlxStemRepository, StemRepository,
};
use crate::database::{self, DbPool};
use crate::domain::{ArtifactUrls, Stem, StemView};
use crate::lifecycle::StemLifecycleManager;
use crate::storage::{ArtifactStore, LocalStorage, S3Storage, StorageBackend};

/// Default shutdown timeout.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Service container holding all application services.
pub struct ServiceContainer {
    pub config: AppConfig,
    /// Database connection pool.
    pub pool: DbPool,
    pub songs: Arc<dyn SongRepository>,
    pub stems: Arc<dyn StemRepository>,
    pub store: Arc<ArtifactStore>,
    pub lifecycle: Arc<StemLifecycleManager>,
    pub sweeper: Arc<CleanupSweeper>,
    pub scheduler: Arc<CleanupScheduler>,
    pub urls: ArtifactUrls,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl ServiceContainer {
    /// Connect to the database and object storage described by `config`.
    pub async fn new(config: AppConfig) -> Result<Self> {
        let remote: Option<Arc<dyn StorageBackend>> = match &config.s3 {
            Some(s3) => match S3Storage::connect(s3).await {
                Ok(storage) => Some(Arc::new(storage) as Arc<dyn StorageBackend>),
                Err(e) => {
                    warn!(error = %e, "Object storage initialization failed");
                    return Err(e);
                }
            },
            None => None,
        };
        Self::with_backend(config, remote, Arc::new(SystemClock)).await
    }

    /// Build with an explicit remote backend and clock.
    pub async fn with_backend(
        config: AppConfig,
        remote: Option<Arc<dyn StorageBackend>>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let pool = database::init_pool(&config.database_url).await?;
        database::run_migrations(&pool).await?;

        let songs: Arc<dyn SongRepository> = Arc::new(SqlxSongRepository::new(pool.clone()));
        let stems: Arc<dyn StemRepository> = Arc::new(SqlxStemRepository::new(pool.clone()));

        let local = LocalStorage::new(&config.stem_save_folder);
        local.ensure_dir().await?;

        let remote_base = config.s3.as_ref().and_then(|s3| s3.public_base_url());
        let store = Arc::new(
            ArtifactStore::new(local, remote)
                .with_prefixes(config.key_prefixes())
                .with_retry_policy(config.storage.retry)
                .with_max_concurrent_uploads(config.storage.max_concurrent_uploads)
                .with_delete_timeout(config.storage.delete_timeout),
        );
        store.log_summary();

        let transcoder = Arc::new(
            Transcoder::new(&config.transcoder.program)
                .with_leading_args(config.transcoder_leading_args())
                .with_timeout(config.transcoder.timeout),
        );
        let worker = ConversionWorker::new(
            transcoder,
            store.clone(),
            stems.clone(),
            config.sample_rate,
        );
        let lifecycle = Arc::new(StemLifecycleManager::new(
            stems.clone(),
            worker,
            clock.clone(),
        ));

        let sweeper = Arc::new(CleanupSweeper::new(
            stems.clone(),
            store.clone(),
            clock.clone(),
            config.cleanup,
        ));
        let scheduler = Arc::new(CleanupScheduler::new(
            sweeper.clone(),
            clock,
            &config.schedules,
        )?);

        let urls = ArtifactUrls::new(config.stem_url_prefix.clone(), remote_base);

        Ok(Self {
            config,
            pool,
            songs,
            stems,
            store,
            lifecycle,
            sweeper,
            scheduler,
            urls,
            task_handles: Mutex::new(Vec::new()),
        })
    }

    /// Start the cleanup tasks.
    pub fn start(&self) {
        let handles = self.scheduler.start();
        info!("Started {} cleanup tasks", handles.len());
        self.task_handles.lock().extend(handles);
    }

    /// What a client sees for `stem`.
    pub fn view(&self, stem: &Stem) -> Option<StemView> {
        StemView::from_stem(stem, &self.urls)
    }

    /// Shutdown all services gracefully.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_with_timeout(DEFAULT_SHUTDOWN_TIMEOUT).await
    }

    /// Shutdown all services gracefully with a custom timeout.
    pub async fn shutdown_with_timeout(&self, timeout: Duration) -> Result<()> {
        info!("Shutting down services (timeout: {:?})", timeout);
        self.scheduler.shutdown();

        let handles: Vec<_> = self.task_handles.lock().drain(..).collect();
        let joined = tokio::time::timeout(timeout, async {
            for handle in handles {
                let _ = handle.await;
            }
        })
        .await;
        if joined.is_err() {
            warn!("Shutdown timeout reached, forcing shutdown");
        }

        info!("Closing database pool...");
        self.pool.close().await;

        info!("Services shut down");
        Ok(())
    }

    pub fn is_shutting_down(&self) -> bool {
        self.scheduler.is_shutdown()
    }
}
