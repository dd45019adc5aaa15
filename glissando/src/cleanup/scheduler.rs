//! Cron-driven scheduling of the cleanup sweeps.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{CleanupSweeper, ReclaimReport, StaleReport};
use crate::clock::Clock;
use crate::{Error, Result};

/// Which sweep a task runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SweepKind {
    FailedStems,
    Reclaim,
    StaleProcessing,
}

impl SweepKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FailedStems => "failed-stems",
            Self::Reclaim => "reclaim",
            Self::StaleProcessing => "stale-processing",
        }
    }
}

/// Result of one sweep run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepReport {
    FailedStems { removed: u64 },
    Reclaim(ReclaimReport),
    StaleProcessing(StaleReport),
}

/// Cron expressions (with seconds) for each sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepSchedules {
    pub failed_stems: String,
    pub reclaim: String,
    pub stale_processing: String,
}

impl Default for SweepSchedules {
    fn default() -> Self {
        Self {
            failed_stems: "0 0 0 * * *".to_string(),
            reclaim: "0 0 12 * * *".to_string(),
            stale_processing: "0 */15 * * * *".to_string(),
        }
    }
}

/// One sweep on a cron schedule. Runs of the same task never overlap.
#[derive(Debug, Clone)]
pub struct PeriodicTask {
    kind: SweepKind,
    schedule: Schedule,
    running: Arc<Mutex<()>>,
}

impl PeriodicTask {
    pub fn new(kind: SweepKind, expression: &str) -> Result<Self> {
        let schedule = Schedule::from_str(expression).map_err(|e| {
            Error::config(format!(
                "invalid cron expression '{}' for {} sweep: {}",
                expression,
                kind.as_str(),
                e
            ))
        })?;
        Ok(Self {
            kind,
            schedule,
            running: Arc::new(Mutex::new(())),
        })
    }

    pub fn kind(&self) -> SweepKind {
        self.kind
    }

    pub fn next_run_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&now).next()
    }

    /// Time to wait from `now` until the next scheduled run.
    pub fn delay_until_next(&self, now: DateTime<Utc>) -> Option<Duration> {
        let next = self.next_run_after(now)?;
        Some((next - now).to_std().unwrap_or(Duration::ZERO))
    }
}

/// Runs every sweep on its own schedule until shut down.
pub struct CleanupScheduler {
    sweeper: Arc<CleanupSweeper>,
    tasks: Vec<PeriodicTask>,
    clock: Arc<dyn Clock>,
    cancellation_token: CancellationToken,
}

impl CleanupScheduler {
    pub fn new(
        sweeper: Arc<CleanupSweeper>,
        clock: Arc<dyn Clock>,
        schedules: &SweepSchedules,
    ) -> Result<Self> {
        let tasks = vec![
            PeriodicTask::new(SweepKind::FailedStems, &schedules.failed_stems)?,
            PeriodicTask::new(SweepKind::Reclaim, &schedules.reclaim)?,
            PeriodicTask::new(SweepKind::StaleProcessing, &schedules.stale_processing)?,
        ];
        Ok(Self {
            sweeper,
            tasks,
            clock,
            cancellation_token: CancellationToken::new(),
        })
    }

    pub fn tasks(&self) -> &[PeriodicTask] {
        &self.tasks
    }

    /// Run one sweep now. Returns `None` if that sweep is already running.
    pub async fn run_now(&self, kind: SweepKind) -> Option<Result<SweepReport>> {
        let task = self.tasks.iter().find(|t| t.kind == kind)?;
        run_guarded(task, &self.sweeper).await
    }

    /// Spawn one background loop per sweep. Each sweep runs immediately,
    /// then at every scheduled time.
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        self.tasks
            .iter()
            .cloned()
            .map(|task| {
                let sweeper = self.sweeper.clone();
                let clock = self.clock.clone();
                let token = self.cancellation_token.child_token();
                tokio::spawn(run_task(task, sweeper, clock, token))
            })
            .collect()
    }

    /// Stop all sweep loops. Runs in progress finish first.
    pub fn shutdown(&self) {
        self.cancellation_token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }
}

async fn run_task(
    task: PeriodicTask,
    sweeper: Arc<CleanupSweeper>,
    clock: Arc<dyn Clock>,
    cancellation_token: CancellationToken,
) {
    let name = task.kind.as_str();
    info!(task = name, "Cleanup task started");

    loop {
        if cancellation_token.is_cancelled() {
            break;
        }

        match run_guarded(&task, &sweeper).await {
            Some(Ok(report)) => debug!(task = name, ?report, "Sweep completed"),
            Some(Err(e)) => error!(task = name, error = %e, "Sweep failed"),
            None => {}
        }

        let Some(delay) = task.delay_until_next(clock.now()) else {
            warn!(task = name, "Schedule has no upcoming runs");
            break;
        };
        debug!(task = name, "Next sweep in {:?}", delay);

        tokio::select! {
            _ = cancellation_token.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    info!(task = name, "Cleanup task shutting down");
}

async fn run_guarded(task: &PeriodicTask, sweeper: &CleanupSweeper) -> Option<Result<SweepReport>> {
    let Ok(_running) = task.running.try_lock() else {
        warn!(task = task.kind.as_str(), "Previous sweep still running, skipping");
        return None;
    };

    let report = match task.kind {
        SweepKind::FailedStems => sweeper
            .sweep_failed()
            .await
            .map(|removed| SweepReport::FailedStems { removed }),
        SweepKind::Reclaim => sweeper.sweep_reclaimable().await.map(SweepReport::Reclaim),
        SweepKind::StaleProcessing => sweeper
            .sweep_stale_processing()
            .await
            .map(SweepReport::StaleProcessing),
    };
    Some(report)
}
