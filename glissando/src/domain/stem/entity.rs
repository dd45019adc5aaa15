//! Stem entity and the metadata value objects around it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::StemStatus;
use crate::Error;

/// Maximum length of a stem name.
pub const MAX_NAME_LEN: usize = 255;
/// Maximum length of an instrument code.
pub const MAX_INSTRUMENT_LEN: usize = 16;
/// Inclusive bound of the timing offset, in samples.
pub const MAX_OFFSET_SAMPLES: i64 = 999_999;
/// Inclusive bound of the gain, in decibels.
pub const MAX_GAIN_DECIBELS: f64 = 100.0;

/// One independently mixed track of a song.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stem {
    pub id: i64,
    /// Owning song. `None` once the song has been deleted.
    pub song_id: Option<i64>,
    pub status: StemStatus,
    pub name: String,
    pub instrument: String,
    pub gain_decibels: f64,
    pub pan: f64,
    pub offset: i64,
    /// Host of the worker converting this stem, only while processing.
    pub processing_hostname: Option<String>,
    /// Pid of the transcoder process, only while processing.
    pub processing_pid: Option<i64>,
    pub samples: Option<i64>,
    pub sample_rate: Option<i64>,
    /// Whether the artifacts live on local disk rather than in object storage.
    pub local: Option<bool>,
    /// Key of the lossy artifact.
    pub location: Option<String>,
    /// Key of the lossless artifact.
    pub hq_location: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Stem {
    /// Record the hand-off to the conversion worker.
    pub fn begin_processing(
        &mut self,
        hostname: impl Into<String>,
        pid: Option<i64>,
    ) -> Result<(), Error> {
        self.status = self.status.transition_to(StemStatus::Processing)?;
        self.processing_hostname = Some(hostname.into());
        self.processing_pid = pid;
        Ok(())
    }

    /// A stem without a parent song is reclaimable whatever its status.
    pub fn is_orphaned(&self) -> bool {
        self.song_id.is_none()
    }

    /// Whether the cleanup sweep may reclaim this stem now.
    pub fn is_reclaimable(&self) -> bool {
        match self.status {
            StemStatus::Deleted => true,
            StemStatus::Reserved | StemStatus::Processing => false,
            StemStatus::Ready | StemStatus::Failed => self.is_orphaned(),
        }
    }

    /// Recorded artifact keys, lossy first.
    pub fn artifact_keys(&self) -> [Option<&str>; 2] {
        [self.location.as_deref(), self.hq_location.as_deref()]
    }

    /// Duration of the converted audio, when known.
    pub fn duration_secs(&self) -> Option<f64> {
        match (self.samples, self.sample_rate) {
            (Some(samples), Some(rate)) => Some(samples_to_seconds(samples, rate)),
            _ => None,
        }
    }
}

/// Convert a frame count to seconds at the given sample rate.
pub fn samples_to_seconds(samples: i64, sample_rate: i64) -> f64 {
    if sample_rate <= 0 {
        return 0.0;
    }
    samples as f64 / sample_rate as f64
}

/// Descriptive and mix fields supplied when a stem is uploaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StemMetadata {
    pub name: String,
    pub instrument: String,
    pub offset: i64,
    pub gain_decibels: f64,
    pub pan: f64,
}

impl StemMetadata {
    pub fn new(name: impl Into<String>, instrument: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instrument: instrument.into(),
            offset: 0,
            gain_decibels: 0.0,
            pan: 0.0,
        }
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_gain(mut self, gain_decibels: f64) -> Self {
        self.gain_decibels = gain_decibels;
        self
    }

    pub fn with_pan(mut self, pan: f64) -> Self {
        self.pan = pan;
        self
    }

    /// Check the limits enforced by the upload endpoint.
    ///
    /// The lifecycle manager trusts its input; this is for the request layer.
    pub fn validate(&self) -> Result<(), Error> {
        validate_name(&self.name)?;
        validate_instrument(&self.instrument)?;
        validate_offset(self.offset)?;
        validate_gain(self.gain_decibels)?;
        validate_pan(self.pan)
    }
}

/// Partial metadata update for a ready stem.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StemPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instrument: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gain_decibels: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pan: Option<f64>,
}

impl StemPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.instrument.is_none()
            && self.offset.is_none()
            && self.gain_decibels.is_none()
            && self.pan.is_none()
    }

    pub fn validate(&self) -> Result<(), Error> {
        if let Some(name) = &self.name {
            validate_name(name)?;
        }
        if let Some(instrument) = &self.instrument {
            validate_instrument(instrument)?;
        }
        if let Some(offset) = self.offset {
            validate_offset(offset)?;
        }
        if let Some(gain) = self.gain_decibels {
            validate_gain(gain)?;
        }
        if let Some(pan) = self.pan {
            validate_pan(pan)?;
        }
        Ok(())
    }
}

fn validate_name(name: &str) -> Result<(), Error> {
    if name.trim().is_empty() || name.chars().count() > MAX_NAME_LEN {
        return Err(Error::validation(format!(
            "name must be 1..={MAX_NAME_LEN} characters"
        )));
    }
    Ok(())
}

fn validate_instrument(instrument: &str) -> Result<(), Error> {
    if instrument.trim().is_empty() || instrument.chars().count() > MAX_INSTRUMENT_LEN {
        return Err(Error::validation(format!(
            "instrument must be 1..={MAX_INSTRUMENT_LEN} characters"
        )));
    }
    Ok(())
}

fn validate_offset(offset: i64) -> Result<(), Error> {
    if !(-MAX_OFFSET_SAMPLES..=MAX_OFFSET_SAMPLES).contains(&offset) {
        return Err(Error::validation(format!(
            "offset {offset} outside ±{MAX_OFFSET_SAMPLES}"
        )));
    }
    Ok(())
}

fn validate_gain(gain: f64) -> Result<(), Error> {
    if !gain.is_finite() || !(-MAX_GAIN_DECIBELS..=MAX_GAIN_DECIBELS).contains(&gain) {
        return Err(Error::validation(format!(
            "gainDecibels {gain} outside ±{MAX_GAIN_DECIBELS}"
        )));
    }
    Ok(())
}

fn validate_pan(pan: f64) -> Result<(), Error> {
    if !pan.is_finite() || !(-1.0..=1.0).contains(&pan) {
        return Err(Error::validation(format!("pan {pan} outside -1..=1")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready_stem(song_id: Option<i64>) -> Stem {
        Stem {
            id: 1,
            song_id,
            status: StemStatus::Ready,
            name: "Guitar".to_string(),
            instrument: "guitar-main".to_string(),
            gain_decibels: 0.0,
            pan: 0.0,
            offset: 0,
            processing_hostname: None,
            processing_pid: None,
            samples: Some(132_300),
            sample_rate: Some(44_100),
            local: Some(true),
            location: Some("abc.oga".to_string()),
            hq_location: Some("abc.flac".to_string()),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_begin_processing_only_from_reserved() {
        let mut stem = ready_stem(Some(1));
        stem.status = StemStatus::Reserved;
        stem.begin_processing("host-a", Some(42)).unwrap();
        assert_eq!(stem.status, StemStatus::Processing);
        assert_eq!(stem.processing_hostname.as_deref(), Some("host-a"));
        assert_eq!(stem.processing_pid, Some(42));

        let mut ready = ready_stem(Some(1));
        assert!(ready.begin_processing("host-a", None).is_err());
        assert_eq!(ready.status, StemStatus::Ready);
    }

    #[test]
    fn test_reclaimable_predicate() {
        assert!(!ready_stem(Some(1)).is_reclaimable());
        assert!(ready_stem(None).is_reclaimable());

        let mut deleted = ready_stem(Some(1));
        deleted.status = StemStatus::Deleted;
        assert!(deleted.is_reclaimable());

        let mut processing = ready_stem(None);
        processing.status = StemStatus::Processing;
        assert!(!processing.is_reclaimable());
    }

    #[test]
    fn test_duration() {
        let stem = ready_stem(Some(1));
        assert_eq!(stem.duration_secs(), Some(3.0));
        assert_eq!(samples_to_seconds(10, 0), 0.0);
    }

    #[test]
    fn test_metadata_validation() {
        let ok = StemMetadata::new("Guitar", "guitar-main");
        assert!(ok.validate().is_ok());

        assert!(StemMetadata::new("", "bass").validate().is_err());
        assert!(StemMetadata::new("x".repeat(256), "bass").validate().is_err());
        assert!(StemMetadata::new("Bass", "a-very-long-instrument").validate().is_err());
        assert!(ok.clone().with_offset(1_000_000).validate().is_err());
        assert!(ok.clone().with_gain(f64::NAN).validate().is_err());
        assert!(ok.clone().with_gain(-100.0).validate().is_ok());
        assert!(ok.clone().with_pan(1.5).validate().is_err());
    }

    #[test]
    fn test_patch_validation_skips_absent_fields() {
        assert!(StemPatch::default().is_empty());
        assert!(StemPatch::default().validate().is_ok());

        let patch = StemPatch {
            pan: Some(-2.0),
            ..Default::default()
        };
        assert!(!patch.is_empty());
        assert!(patch.validate().is_err());
    }
}
