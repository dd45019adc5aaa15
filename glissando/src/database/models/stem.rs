//! Stem database model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::time::ms_to_datetime;
use crate::domain::{Stem, StemStatus};
use crate::Error;

/// Stem database model.
/// One row per uploaded track.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct StemDbModel {
    pub id: i64,
    /// Owning song; NULL once the song has been deleted.
    pub song_id: Option<i64>,
    /// Status: RESERVED, PROCESSING, FAILED, READY, DELETED
    pub status: String,
    pub name: String,
    pub instrument: String,
    pub gain_decibels: f64,
    pub pan: f64,
    pub offset: i64,
    pub processing_hostname: Option<String>,
    pub processing_pid: Option<i64>,
    pub samples: Option<i64>,
    pub sample_rate: Option<i64>,
    pub local: Option<bool>,
    pub location: Option<String>,
    pub hq_location: Option<String>,
    /// Unix epoch milliseconds (UTC) when created.
    pub created_at: i64,
}

impl TryFrom<StemDbModel> for Stem {
    type Error = Error;

    fn try_from(row: StemDbModel) -> Result<Self, Self::Error> {
        let status = StemStatus::parse(&row.status).ok_or_else(|| {
            Error::Validation(format!("stem {} has unknown status '{}'", row.id, row.status))
        })?;

        Ok(Stem {
            id: row.id,
            song_id: row.song_id,
            status,
            name: row.name,
            instrument: row.instrument,
            gain_decibels: row.gain_decibels,
            pan: row.pan,
            offset: row.offset,
            processing_hostname: row.processing_hostname,
            processing_pid: row.processing_pid,
            samples: row.samples,
            sample_rate: row.sample_rate,
            local: row.local,
            location: row.location,
            hq_location: row.hq_location,
            created_at: ms_to_datetime(row.created_at),
        })
    }
}

/// Output fields written when a conversion succeeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyArtifacts {
    pub samples: i64,
    pub sample_rate: i64,
    pub local: bool,
    pub location: String,
    pub hq_location: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(status: &str) -> StemDbModel {
        StemDbModel {
            id: 3,
            song_id: None,
            status: status.to_string(),
            name: "Bass".to_string(),
            instrument: "bass".to_string(),
            gain_decibels: 1.5,
            pan: -0.5,
            offset: -10,
            processing_hostname: None,
            processing_pid: None,
            samples: None,
            sample_rate: None,
            local: None,
            location: None,
            hq_location: None,
            created_at: 1_694_865_600_000,
        }
    }

    #[test]
    fn test_row_to_entity() {
        let stem = Stem::try_from(row("FAILED")).unwrap();
        assert_eq!(stem.status, StemStatus::Failed);
        assert!(stem.is_orphaned());
        assert_eq!(stem.created_at.timestamp_millis(), 1_694_865_600_000);
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        assert!(Stem::try_from(row("reserved")).is_err());
    }
}
