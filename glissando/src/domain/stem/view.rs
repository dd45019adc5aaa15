//! Response shapes handed to the HTTP layer.

use serde::Serialize;

use super::{Stem, StemStatus};

/// Base URLs used to turn artifact keys into links.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactUrls {
    /// Prefix under which the local save folder is served, e.g. `/static/stems`.
    pub local_prefix: String,
    /// Public base URL of the object store bucket, if remote storage is used.
    pub remote_base: Option<String>,
}

impl ArtifactUrls {
    pub fn new(local_prefix: impl Into<String>, remote_base: Option<String>) -> Self {
        Self {
            local_prefix: local_prefix.into(),
            remote_base,
        }
    }

    /// Resolve an artifact key to a URL.
    ///
    /// Remote keys without a configured public base are returned as-is.
    pub fn resolve(&self, local: bool, key: &str) -> String {
        let base = if local {
            Some(self.local_prefix.as_str())
        } else {
            self.remote_base.as_deref()
        };

        match base {
            Some(base) if !base.is_empty() => {
                format!("{}/{}", base.trim_end_matches('/'), key.trim_start_matches('/'))
            }
            _ => key.to_string(),
        }
    }
}

/// What a client sees for one stem, depending on its status.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum StemView {
    #[serde(rename_all = "camelCase")]
    Processing {
        id: i64,
        name: String,
        instrument: String,
        gain_decibels: f64,
        pan: f64,
        offset: i64,
    },
    #[serde(rename_all = "camelCase")]
    Failed {
        id: i64,
        name: String,
        instrument: String,
        gain_decibels: f64,
        pan: f64,
        offset: i64,
    },
    #[serde(rename_all = "camelCase")]
    Ready {
        id: i64,
        name: String,
        instrument: String,
        path: String,
        lossless_path: String,
        samples: i64,
        gain_decibels: f64,
        pan: f64,
        offset: i64,
    },
}

impl StemView {
    /// Build the view for a stem. Reserved and deleted stems are not shown.
    pub fn from_stem(stem: &Stem, urls: &ArtifactUrls) -> Option<Self> {
        let stem = stem.clone();
        match stem.status {
            StemStatus::Processing => Some(Self::Processing {
                id: stem.id,
                name: stem.name,
                instrument: stem.instrument,
                gain_decibels: stem.gain_decibels,
                pan: stem.pan,
                offset: stem.offset,
            }),
            StemStatus::Failed => Some(Self::Failed {
                id: stem.id,
                name: stem.name,
                instrument: stem.instrument,
                gain_decibels: stem.gain_decibels,
                pan: stem.pan,
                offset: stem.offset,
            }),
            StemStatus::Ready => {
                let local = stem.local.unwrap_or(true);
                Some(Self::Ready {
                    id: stem.id,
                    path: urls.resolve(local, stem.location.as_deref()?),
                    lossless_path: urls.resolve(local, stem.hq_location.as_deref()?),
                    samples: stem.samples?,
                    name: stem.name,
                    instrument: stem.instrument,
                    gain_decibels: stem.gain_decibels,
                    pan: stem.pan,
                    offset: stem.offset,
                })
            }
            StemStatus::Reserved | StemStatus::Deleted => None,
        }
    }
}
