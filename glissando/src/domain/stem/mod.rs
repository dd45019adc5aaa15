//! Stem aggregate.

mod entity;
mod state;
mod view;

pub use entity::{Stem, StemMetadata, StemPatch, samples_to_seconds};
pub use state::StemStatus;
pub use view::{ArtifactUrls, StemView};
