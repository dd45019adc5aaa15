//! The individual cleanup sweeps.

use std::sync::Arc;

use chrono::Duration;
use tracing::{debug, error, info, warn};

use crate::Result;
use crate::clock::Clock;
use crate::database::repositories::StemRepository;
use crate::storage::ArtifactStore;

/// Retention settings for the sweeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanupConfig {
    /// FAILED stems older than this are removed.
    pub failed_retention: Duration,
    /// PROCESSING stems older than this are considered abandoned.
    pub stale_processing_after: Duration,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            failed_retention: Duration::hours(24),
            stale_processing_after: Duration::hours(6),
        }
    }
}

impl CleanupConfig {
    pub fn with_failed_retention(mut self, retention: Duration) -> Self {
        self.failed_retention = retention;
        self
    }

    pub fn with_stale_processing_after(mut self, after: Duration) -> Self {
        self.stale_processing_after = after;
        self
    }
}

/// Totals of one reclaim sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReclaimReport {
    pub rows_removed: u64,
    /// Rows kept because an artifact could not be removed.
    pub rows_retained: u64,
    /// Orphans still being converted, left for a later run.
    pub rows_skipped: u64,
    pub files_removed: u64,
}

/// Totals of one stale-record sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StaleReport {
    /// PROCESSING rows moved to FAILED.
    pub failed: u64,
    /// RESERVED rows that never reached PROCESSING, removed.
    pub reserved_removed: u64,
}

/// Runs the cleanup sweeps against the stem store and artifact storage.
pub struct CleanupSweeper {
    stems: Arc<dyn StemRepository>,
    store: Arc<ArtifactStore>,
    clock: Arc<dyn Clock>,
    config: CleanupConfig,
}

impl CleanupSweeper {
    pub fn new(
        stems: Arc<dyn StemRepository>,
        store: Arc<ArtifactStore>,
        clock: Arc<dyn Clock>,
        config: CleanupConfig,
    ) -> Self {
        Self {
            stems,
            store,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &CleanupConfig {
        &self.config
    }

    /// Remove FAILED stems created before the retention cutoff.
    pub async fn sweep_failed(&self) -> Result<u64> {
        let cutoff = self.clock.now() - self.config.failed_retention;
        let removed = self.stems.delete_failed_before(cutoff).await?;
        if removed > 0 {
            info!(removed, %cutoff, "Removed failed stems");
        } else {
            debug!(%cutoff, "No failed stems to remove");
        }
        Ok(removed)
    }

    /// Remove artifacts and rows of DELETED and orphaned stems.
    ///
    /// A row is only removed once both of its artifacts are gone. Failures
    /// are logged and the row is left for the next run.
    pub async fn sweep_reclaimable(&self) -> Result<ReclaimReport> {
        let candidates = self.stems.list_reclaimable().await?;
        let mut report = ReclaimReport::default();

        for stem in candidates {
            if !stem.is_reclaimable() {
                debug!(
                    stem_id = stem.id,
                    status = %stem.status,
                    "Skipping orphan still in conversion"
                );
                report.rows_skipped += 1;
                continue;
            }

            let outcome = self.store.reclaim(stem.local, stem.artifact_keys()).await;
            report.files_removed += outcome.removed as u64;

            if !outcome.is_complete() {
                warn!(
                    stem_id = stem.id,
                    failed = outcome.failed,
                    "Keeping stem until its artifacts are removed"
                );
                report.rows_retained += 1;
                continue;
            }

            match self.stems.delete_reclaimed(stem.id).await {
                Ok(true) => report.rows_removed += 1,
                Ok(false) => {
                    debug!(stem_id = stem.id, "Stem changed during sweep");
                    report.rows_skipped += 1;
                }
                Err(e) => {
                    error!(stem_id = stem.id, error = %e, "Failed to remove reclaimed stem");
                    report.rows_retained += 1;
                }
            }
        }

        info!(
            rows_removed = report.rows_removed,
            rows_retained = report.rows_retained,
            rows_skipped = report.rows_skipped,
            files_removed = report.files_removed,
            "Reclaim sweep finished"
        );
        Ok(report)
    }

    /// Fail PROCESSING stems whose conversion has outlived the threshold,
    /// and remove RESERVED rows that never made it to PROCESSING.
    pub async fn sweep_stale_processing(&self) -> Result<StaleReport> {
        let cutoff = self.clock.now() - self.config.stale_processing_after;
        let stale = self.stems.fail_stale_processing(cutoff).await?;

        for stem in &stale {
            warn!(
                stem_id = stem.id,
                created_at = %stem.created_at,
                "Stem was stuck in PROCESSING, marked failed"
            );
        }

        let reserved_removed = self.stems.delete_stale_reserved(cutoff).await?;
        if reserved_removed > 0 {
            warn!(reserved_removed, %cutoff, "Removed stems that never started processing");
        }

        let report = StaleReport {
            failed: stale.len() as u64,
            reserved_removed,
        };
        if report != StaleReport::default() {
            info!(
                failed = report.failed,
                reserved_removed = report.reserved_removed,
                "Reconciled stale stems"
            );
        }
        Ok(report)
    }
}
