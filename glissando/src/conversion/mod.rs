//! Conversion of uploaded audio into stored artifacts.

mod transcoder;
mod worker;

pub use transcoder::{RunningTranscode, TranscodeError, TranscodeOutput, Transcoder};
pub use worker::{
    ConversionHandle, ConversionJob, ConversionOutcome, ConversionWorker, PendingConversion,
};
