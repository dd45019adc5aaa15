//! Shared fixtures for integration tests.
#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use glissando::clock::{Clock, ManualClock};
use glissando::config::AppConfig;
use glissando::database::models::SongDbModel;
use glissando::services::ServiceContainer;
use glissando::storage::{MemoryStorage, S3Config, StorageBackend};
use tempfile::TempDir;

/// Sample count printed by the fake transcoder.
pub const SAMPLES: i64 = 132_300;

/// Stand-in for the real conversion script: copies the input to both
/// outputs, fails for inputs containing FAIL.
const FAKE_TRANSCODER: &str = r#"#!/bin/sh
set -e
if grep -q FAIL "$1"; then
    echo "cannot decode $1" >&2
    exit 2
fi
if grep -q SLOW "$1"; then
    sleep 2
fi
cp "$1" "$2.oga"
cp "$1" "$2.flac"
echo 132300
"#;

pub struct Harness {
    pub dir: TempDir,
    pub clock: Arc<ManualClock>,
    pub remote: Option<Arc<MemoryStorage>>,
    pub container: ServiceContainer,
}

pub struct HarnessBuilder {
    remote: bool,
    program: Option<PathBuf>,
}

impl HarnessBuilder {
    pub fn remote(mut self) -> Self {
        self.remote = true;
        self
    }

    pub fn program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = Some(program.into());
        self
    }

    pub async fn build(self) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("process-file.sh");
        std::fs::write(&script, FAKE_TRANSCODER).unwrap();
        std::fs::create_dir_all(dir.path().join("uploads")).unwrap();

        let mut config = AppConfig::default();
        config.database_url = format!("sqlite:{}?mode=rwc", dir.path().join("test.db").display());
        config.stem_save_folder = dir.path().join("stems");
        config.transcoder.program = self.program.unwrap_or_else(|| PathBuf::from("/bin/sh"));
        config.transcoder.script = Some(script.display().to_string());
        config.transcoder.timeout = Duration::from_secs(30);
        config.storage.retry.delay = Duration::from_millis(10);

        let remote = self.remote.then(|| Arc::new(MemoryStorage::new()));
        if remote.is_some() {
            config.s3 = Some(S3Config {
                bucket: "band-stems".to_string(),
                lossy_prefix: "lossy/".to_string(),
                lossless_prefix: "lossless/".to_string(),
                public_url: Some("https://cdn.example.com/band-stems".to_string()),
                ..Default::default()
            });
        }

        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap(),
        ));
        let container = ServiceContainer::with_backend(
            config,
            remote.clone().map(|r| r as Arc<dyn StorageBackend>),
            clock.clone() as Arc<dyn Clock>,
        )
        .await
        .unwrap();

        Harness {
            dir,
            clock,
            remote,
            container,
        }
    }
}

impl Harness {
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder {
            remote: false,
            program: None,
        }
    }

    pub async fn local() -> Self {
        Self::builder().build().await
    }

    pub fn remote(&self) -> &MemoryStorage {
        self.remote.as_deref().unwrap()
    }

    pub async fn song(&self, title: &str) -> SongDbModel {
        self.container.songs.create_song(title).await.unwrap()
    }

    /// Write an upload with the given content and return its path.
    pub fn upload(&self, name: &str, content: &str) -> PathBuf {
        let path = self.dir.path().join("uploads").join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    pub fn stem_file(&self, key: &str) -> PathBuf {
        self.container.config.stem_save_folder.join(key)
    }

    /// Files currently in the stem folder.
    pub fn stem_files(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(&self.container.config.stem_save_folder)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }
}
