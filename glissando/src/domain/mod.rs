//! Domain layer for glissando.
//!
//! This module contains the stem entity, its state machine and the value
//! objects exchanged with the API collaborator.

pub mod stem;

pub use stem::{
    ArtifactUrls, Stem, StemMetadata, StemPatch, StemStatus, StemView, samples_to_seconds,
};
