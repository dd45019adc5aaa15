//! Background conversion of one uploaded stem.
//!
//! [`ConversionWorker::submit`] starts the transcoder right away so its pid
//! can be recorded, but no terminal status is written until the caller has
//! persisted PROCESSING and called [`PendingConversion::start`].

use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::{error, info, warn};

use super::{RunningTranscode, TranscodeError, TranscodeOutput, Transcoder};
use crate::database::models::ReadyArtifacts;
use crate::database::repositories::StemRepository;
use crate::database::retry::retry_on_sqlite_busy;
use crate::storage::{ArtifactStore, StoredPair};

/// Input of one conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionJob {
    pub stem_id: i64,
    /// Temporary file holding the upload.
    pub upload_path: PathBuf,
    /// Base name of the artifacts, without extension.
    pub base_name: String,
}

/// How a conversion ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ConversionOutcome {
    /// Stem is READY.
    Ready { samples: i64, local: bool },
    /// Stem is FAILED.
    Failed { reason: String },
    /// Nothing was written to the stem; any produced files were removed.
    Abandoned { reason: String },
}

impl ConversionOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }
}

/// Receives the outcome of a conversion. May be dropped.
#[derive(Debug)]
pub struct ConversionHandle {
    stem_id: i64,
    rx: oneshot::Receiver<ConversionOutcome>,
}

impl ConversionHandle {
    pub fn stem_id(&self) -> i64 {
        self.stem_id
    }

    pub async fn outcome(self) -> ConversionOutcome {
        self.rx.await.unwrap_or_else(|_| ConversionOutcome::Abandoned {
            reason: "conversion task ended without reporting".to_string(),
        })
    }
}

/// A submitted conversion waiting for the go-ahead to record its result.
///
/// Dropping it without calling [`start`](Self::start) abandons the
/// conversion.
#[derive(Debug)]
pub struct PendingConversion {
    hostname: String,
    pid: Option<i64>,
    release: oneshot::Sender<()>,
    handle: ConversionHandle,
}

impl PendingConversion {
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Pid of the transcoder, if it could be started.
    pub fn pid(&self) -> Option<i64> {
        self.pid
    }

    pub fn start(self) -> ConversionHandle {
        let _ = self.release.send(());
        self.handle
    }

    /// Give up on the conversion. The transcoder is stopped and its input
    /// and outputs removed.
    pub fn abandon(self) -> ConversionHandle {
        drop(self.release);
        self.handle
    }
}

/// Runs the transcoder and persists its outputs.
#[derive(Clone)]
pub struct ConversionWorker {
    transcoder: Arc<Transcoder>,
    store: Arc<ArtifactStore>,
    stems: Arc<dyn StemRepository>,
    sample_rate: u32,
    hostname: String,
}

impl ConversionWorker {
    pub fn new(
        transcoder: Arc<Transcoder>,
        store: Arc<ArtifactStore>,
        stems: Arc<dyn StemRepository>,
        sample_rate: u32,
    ) -> Self {
        Self {
            transcoder,
            store,
            stems,
            sample_rate,
            hostname: process_utils::hostname().to_string(),
        }
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn store(&self) -> &Arc<ArtifactStore> {
        &self.store
    }

    /// Start converting `job` in the background.
    ///
    /// Never fails: a transcoder that cannot be started is reported through
    /// the outcome like any other conversion failure.
    pub fn submit(&self, job: ConversionJob) -> PendingConversion {
        let (release_tx, release_rx) = oneshot::channel();
        let (outcome_tx, outcome_rx) = oneshot::channel();

        let output_prefix = self.store.staging_prefix(&job.base_name);
        let spawned = self
            .transcoder
            .spawn(&job.upload_path, &output_prefix, self.sample_rate);
        let pid = spawned
            .as_ref()
            .ok()
            .and_then(RunningTranscode::pid)
            .map(i64::from);

        let stem_id = job.stem_id;
        let worker = self.clone();
        tokio::spawn(async move {
            let outcome = worker.run(job, spawned, release_rx).await;
            let _ = outcome_tx.send(outcome);
        });

        PendingConversion {
            hostname: self.hostname.clone(),
            pid,
            release: release_tx,
            handle: ConversionHandle {
                stem_id,
                rx: outcome_rx,
            },
        }
    }

    async fn run(
        self,
        job: ConversionJob,
        spawned: Result<RunningTranscode, TranscodeError>,
        mut release: oneshot::Receiver<()>,
    ) -> ConversionOutcome {
        let wait = async move {
            match spawned {
                Ok(running) => running.wait().await,
                Err(e) => Err(e),
            }
        };
        tokio::pin!(wait);

        // Dropping `wait` kills the transcoder.
        let result = tokio::select! {
            released = &mut release => {
                if released.is_err() {
                    return self.abandon(&job, "stem never entered PROCESSING").await;
                }
                wait.await
            }
            result = &mut wait => {
                if release.await.is_err() {
                    return self.abandon(&job, "stem never entered PROCESSING").await;
                }
                result
            }
        };

        match result {
            Ok(output) => self.on_transcoded(&job, output).await,
            Err(e) => {
                error!(stem_id = job.stem_id, error = %e, "Transcoding failed");
                self.on_failure(&job, e.to_string()).await
            }
        }
    }

    async fn on_transcoded(
        &self,
        job: &ConversionJob,
        output: TranscodeOutput,
    ) -> ConversionOutcome {
        info!(
            stem_id = job.stem_id,
            samples = output.samples,
            "Transcoded in {:.1}s",
            output.elapsed.as_secs_f64()
        );

        let pair = match self.store.persist_pair(&job.base_name).await {
            Ok(pair) => pair,
            Err(e) => {
                error!(stem_id = job.stem_id, error = %e, "Failed to persist artifacts");
                return self.on_failure(job, e.to_string()).await;
            }
        };

        let artifacts = ReadyArtifacts {
            samples: output.samples,
            sample_rate: i64::from(self.sample_rate),
            local: pair.local,
            location: pair.location.clone(),
            hq_location: pair.hq_location.clone(),
        };

        let updated = retry_on_sqlite_busy("mark_ready", || {
            self.stems.mark_ready(job.stem_id, &artifacts)
        })
        .await;

        match updated {
            Ok(true) => {
                info!(stem_id = job.stem_id, local = pair.local, "Stem is ready");
                ConversionOutcome::Ready {
                    samples: output.samples,
                    local: pair.local,
                }
            }
            Ok(false) => {
                warn!(
                    stem_id = job.stem_id,
                    "Stem left PROCESSING during conversion, reclaiming its artifacts"
                );
                self.reclaim_pair(&pair).await;
                ConversionOutcome::Abandoned {
                    reason: "stem no longer processing".to_string(),
                }
            }
            Err(e) => {
                error!(stem_id = job.stem_id, error = %e, "Failed to mark stem ready");
                self.reclaim_pair(&pair).await;
                self.on_failure(job, e.to_string()).await
            }
        }
    }

    async fn on_failure(&self, job: &ConversionJob, reason: String) -> ConversionOutcome {
        self.discard_inputs(job).await;

        match retry_on_sqlite_busy("mark_failed", || self.stems.mark_failed(job.stem_id)).await {
            Ok(true) => {}
            Ok(false) => warn!(
                stem_id = job.stem_id,
                "Stem was not PROCESSING when marking it failed"
            ),
            Err(e) => error!(stem_id = job.stem_id, error = %e, "Failed to mark stem failed"),
        }

        ConversionOutcome::Failed { reason }
    }

    async fn abandon(&self, job: &ConversionJob, reason: &str) -> ConversionOutcome {
        warn!(stem_id = job.stem_id, "Abandoning conversion: {}", reason);
        self.discard_inputs(job).await;
        ConversionOutcome::Abandoned {
            reason: reason.to_string(),
        }
    }

    /// Remove the upload and any partial transcoder output.
    async fn discard_inputs(&self, job: &ConversionJob) {
        match tokio::fs::remove_file(&job.upload_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(
                path = %job.upload_path.display(),
                error = %e,
                "Failed to remove uploaded file"
            ),
        }
        self.store.discard_staged(&job.base_name).await;
    }

    async fn reclaim_pair(&self, pair: &StoredPair) {
        let outcome = self
            .store
            .reclaim(
                Some(pair.local),
                [Some(pair.location.as_str()), Some(pair.hq_location.as_str())],
            )
            .await;
        if !outcome.is_complete() {
            warn!(
                location = %pair.location,
                hq_location = %pair.hq_location,
                "Could not reclaim {} of 2 artifacts",
                outcome.failed
            );
        }
    }
}
