//! Stem state machine.

use serde::{Deserialize, Serialize};

use crate::Error;

/// Lifecycle states of an uploaded stem.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::EnumIter,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StemStatus {
    /// Row inserted, conversion not yet handed off.
    Reserved,
    /// The transcoder is running for this stem.
    Processing,
    /// Conversion or artifact persistence failed. Reclaimed after the retention window.
    Failed,
    /// Both artifacts are persisted and the stem can be mixed.
    Ready,
    /// Removed by the user. Reclaimed once its artifacts are gone.
    Deleted,
}

impl StemStatus {
    /// Convert to database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reserved => "RESERVED",
            Self::Processing => "PROCESSING",
            Self::Failed => "FAILED",
            Self::Ready => "READY",
            Self::Deleted => "DELETED",
        }
    }

    /// Parse from database string representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "RESERVED" => Some(Self::Reserved),
            "PROCESSING" => Some(Self::Processing),
            "FAILED" => Some(Self::Failed),
            "READY" => Some(Self::Ready),
            "DELETED" => Some(Self::Deleted),
            _ => None,
        }
    }

    /// Terminal states are only ever left by removing the row.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed | Self::Deleted)
    }

    /// Metadata edits and deletion are only accepted in this state.
    pub fn is_mutable(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Validate a state transition.
    pub fn can_transition_to(&self, target: StemStatus) -> bool {
        use StemStatus::*;

        matches!(
            (self, target),
            (Reserved, Processing) | (Processing, Ready | Failed) | (Ready, Deleted)
        )
    }

    /// Attempt to transition to a new state.
    pub fn transition_to(&self, target: StemStatus) -> Result<StemStatus, Error> {
        if self.can_transition_to(target) {
            Ok(target)
        } else {
            Err(Error::InvalidStateTransition {
                from: self.as_str().to_string(),
                to: target.as_str().to_string(),
            })
        }
    }
}

impl std::fmt::Display for StemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
