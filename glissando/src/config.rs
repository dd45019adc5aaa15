//! Application configuration loaded from the environment.
//!
//! Every setting has a default; malformed values are rejected at startup.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::cleanup::{CleanupConfig, PeriodicTask, SweepKind, SweepSchedules};
use crate::storage::{KeyPrefixes, S3Config, UploadRetryPolicy};
use crate::{Error, Result};

pub const DEFAULT_DATABASE_URL: &str = "sqlite:glissando.db?mode=rwc";

/// External transcoder invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscoderConfig {
    pub program: PathBuf,
    /// Passed before the input path. Empty for a standalone binary.
    pub script: Option<String>,
    pub timeout: Duration,
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("/bin/sh"),
            script: Some("scripts/process-file.sh".to_string()),
            timeout: Duration::from_secs(3600),
        }
    }
}

/// Upload and delete behavior of artifact storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageSettings {
    pub retry: UploadRetryPolicy,
    pub max_concurrent_uploads: usize,
    pub delete_timeout: Duration,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            retry: UploadRetryPolicy::default(),
            max_concurrent_uploads: 4,
            delete_timeout: Duration::from_secs(30),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub stem_save_folder: PathBuf,
    pub sample_rate: u32,
    pub stem_url_prefix: String,
    pub transcoder: TranscoderConfig,
    /// Remote storage; `None` keeps artifacts on local disk.
    pub s3: Option<S3Config>,
    pub storage: StorageSettings,
    pub cleanup: CleanupConfig,
    pub schedules: SweepSchedules,
    pub log_dir: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            stem_save_folder: PathBuf::from("./stems"),
            sample_rate: 44_100,
            stem_url_prefix: "/static/stems".to_string(),
            transcoder: TranscoderConfig::default(),
            s3: None,
            storage: StorageSettings::default(),
            cleanup: CleanupConfig::default(),
            schedules: SweepSchedules::default(),
            log_dir: None,
        }
    }
}

impl AppConfig {
    /// Load from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` to read variables. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);
        let mut config = Self::default();

        if let Some(url) = env.string("DATABASE_URL") {
            config.database_url = url;
        }
        if let Some(folder) = env.string("STEM_SAVE_FOLDER") {
            config.stem_save_folder = PathBuf::from(folder);
        }
        if let Some(rate) = env.parse::<u32>("PROJECT_SAMPLE_RATE")? {
            if rate == 0 {
                return Err(Error::config("PROJECT_SAMPLE_RATE must be positive"));
            }
            config.sample_rate = rate;
        }
        if let Some(prefix) = env.string("STEM_URL_PREFIX") {
            config.stem_url_prefix = prefix;
        }

        if let Some(program) = env.string("TRANSCODER_PROGRAM") {
            config.transcoder.program = PathBuf::from(program);
        }
        if let Some(script) = env.raw("TRANSCODER_SCRIPT") {
            let script = script.trim();
            config.transcoder.script = (!script.is_empty()).then(|| script.to_string());
        }
        if let Some(secs) = env.parse::<u64>("TRANSCODER_TIMEOUT_SECS")? {
            config.transcoder.timeout = Duration::from_secs(secs);
        }

        if env.flag("S3_ENABLED")?.unwrap_or(false) {
            config.s3 = Some(s3_from_env(&env)?);
        }

        if let Some(attempts) = env.parse::<u32>("UPLOAD_MAX_ATTEMPTS")? {
            if attempts == 0 {
                return Err(Error::config("UPLOAD_MAX_ATTEMPTS must be at least 1"));
            }
            config.storage.retry.max_attempts = attempts;
        }
        if let Some(ms) = env.parse::<u64>("UPLOAD_RETRY_DELAY_MS")? {
            config.storage.retry.delay = Duration::from_millis(ms);
        }
        if let Some(permits) = env.parse::<usize>("MAX_CONCURRENT_UPLOADS")? {
            config.storage.max_concurrent_uploads = permits.max(1);
        }
        if let Some(secs) = env.parse::<u64>("ARTIFACT_DELETE_TIMEOUT_SECS")? {
            config.storage.delete_timeout = Duration::from_secs(secs);
        }

        if let Some(hours) = env.parse::<i64>("FAILED_STEM_RETENTION_HOURS")? {
            config.cleanup.failed_retention = chrono::Duration::hours(hours.max(0));
        }
        if let Some(hours) = env.parse::<i64>("STALE_PROCESSING_HOURS")? {
            config.cleanup.stale_processing_after = chrono::Duration::hours(hours.max(0));
        }
        if let Some(expr) = env.string("FAILED_SWEEP_CRON") {
            config.schedules.failed_stems = expr;
        }
        if let Some(expr) = env.string("RECLAIM_SWEEP_CRON") {
            config.schedules.reclaim = expr;
        }
        if let Some(expr) = env.string("STALE_SWEEP_CRON") {
            config.schedules.stale_processing = expr;
        }

        config.log_dir = env.string("LOG_DIR").map(PathBuf::from);

        config.validate()?;
        Ok(config)
    }

    /// Check values that cannot be validated while parsing.
    pub fn validate(&self) -> Result<()> {
        PeriodicTask::new(SweepKind::FailedStems, &self.schedules.failed_stems)?;
        PeriodicTask::new(SweepKind::Reclaim, &self.schedules.reclaim)?;
        PeriodicTask::new(SweepKind::StaleProcessing, &self.schedules.stale_processing)?;

        if let Some(s3) = &self.s3
            && s3.bucket.trim().is_empty()
        {
            return Err(Error::config("S3_BUCKET_NAME must not be empty"));
        }
        Ok(())
    }

    /// Remote key prefixes, empty when remote storage is disabled.
    pub fn key_prefixes(&self) -> KeyPrefixes {
        self.s3
            .as_ref()
            .map(|s3| KeyPrefixes::new(s3.lossy_prefix.clone(), s3.lossless_prefix.clone()))
            .unwrap_or_default()
    }

    /// Transcoder arguments placed before the input path.
    pub fn transcoder_leading_args(&self) -> Vec<String> {
        self.transcoder.script.iter().cloned().collect()
    }
}

fn s3_from_env<F>(env: &Env<F>) -> Result<S3Config>
where
    F: Fn(&str) -> Option<String>,
{
    let mut s3 = S3Config::default();
    if let Some(key) = env.string("S3_ACCESS_KEY") {
        s3.access_key = key;
    }
    if let Some(secret) = env.string("S3_SECRET_KEY") {
        s3.secret_key = secret;
    }
    if let Some(bucket) = env.string("S3_BUCKET_NAME") {
        s3.bucket = bucket;
    }
    s3.endpoint_url = env.string("S3_ENDPOINT_URL");
    if let Some(region) = env.string("S3_REGION") {
        s3.region = region;
    }
    if let Some(path_style) = env.flag("S3_FORCE_PATH_STYLE")? {
        s3.force_path_style = path_style;
    }
    if let Some(create) = env.flag("S3_CREATE_BUCKET_ON_START")? {
        s3.create_bucket_on_start = create;
    }
    if let Some(prefix) = env.string("S3_LOSSY_PREFIX") {
        s3.lossy_prefix = prefix;
    }
    if let Some(prefix) = env.string("S3_LOSSLESS_PREFIX") {
        s3.lossless_prefix = prefix;
    }
    s3.public_url = env.string("S3_PUBLIC_URL");
    Ok(s3)
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn raw(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn string(&self, key: &str) -> Option<String> {
        self.raw(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.string(key)
            .map(|v| {
                v.parse::<T>()
                    .map_err(|e| Error::config(format!("{key}={v:?} is invalid: {e}")))
            })
            .transpose()
    }

    fn flag(&self, key: &str) -> Result<Option<bool>> {
        let Some(value) = self.string(key) else {
            return Ok(None);
        };
        match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(Error::config(format!("{key}={value:?} is not a boolean"))),
        }
    }
}
