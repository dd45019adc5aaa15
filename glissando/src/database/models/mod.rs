//! Database models for glissando.
//!
//! These models map directly to the database schema.

pub mod song;
pub mod stem;

pub use song::*;
pub use stem::*;
