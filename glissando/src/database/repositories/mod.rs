//! Repository layer for database access.
//!
//! Every stem status change is a single conditional statement keyed on the
//! expected prior status, so concurrent callers cannot both win.

pub mod song;
pub mod stem;

pub use song::*;
pub use stem::*;
