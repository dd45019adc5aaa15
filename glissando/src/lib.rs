//! Stem ingestion, conversion and storage lifecycle.
//!
//! Uploaded audio becomes a [`domain::Stem`] that moves through
//! RESERVED, PROCESSING and READY or FAILED, is converted by an external
//! transcoder into a lossy and a lossless artifact, stored on local disk or
//! in S3-compatible object storage, and eventually reclaimed by scheduled
//! cleanup sweeps.

pub mod cleanup;
pub mod clock;
pub mod config;
pub mod conversion;
pub mod database;
pub mod domain;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod services;
pub mod storage;

pub use error::{Error, Result};
