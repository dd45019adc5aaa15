//! Stem lifecycle: creation, metadata updates and user deletion.

mod manager;

pub use manager::StemLifecycleManager;
