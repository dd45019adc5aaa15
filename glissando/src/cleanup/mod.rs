//! Periodic reclamation of failed, deleted and orphaned stems.

mod scheduler;
mod sweeper;

pub use scheduler::{CleanupScheduler, PeriodicTask, SweepKind, SweepReport, SweepSchedules};
pub use sweeper::{CleanupConfig, CleanupSweeper, ReclaimReport, StaleReport};
