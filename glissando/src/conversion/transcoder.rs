//! External transcoder process.
//!
//! The tool is invoked as `<program> [leading args] <input> <output prefix>
//! <sample rate>`. On success it exits 0, prints the frame count of the
//! converted audio on stdout, and writes `<output prefix>.oga` and
//! `<output prefix>.flac`.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use process_utils::{describe_exit, tokio_command};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Child;
use tracing::debug;

/// Longest stderr tail kept in errors.
const STDERR_EXCERPT_CHARS: usize = 2000;

#[derive(Debug, thiserror::Error)]
pub enum TranscodeError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("transcoder I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transcoder exited with {status}: {stderr}")]
    Exited { status: String, stderr: String },

    #[error("transcoder printed no sample count (stdout: {stdout:?})")]
    InvalidOutput { stdout: String },

    #[error("transcoder timed out after {0:?}")]
    TimedOut(Duration),
}

/// Successful run.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscodeOutput {
    pub samples: i64,
    pub elapsed: Duration,
    pub stderr: String,
}

/// How to launch the transcoder.
#[derive(Debug, Clone)]
pub struct Transcoder {
    program: PathBuf,
    leading_args: Vec<String>,
    timeout: Duration,
}

impl Transcoder {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
            timeout: Duration::from_secs(3600),
        }
    }

    /// Arguments placed before the input path, e.g. a script for a shell.
    pub fn with_leading_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.leading_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Start converting `input` into `<output_prefix>.oga` and `.flac`.
    pub fn spawn(
        &self,
        input: &Path,
        output_prefix: &Path,
        sample_rate: u32,
    ) -> Result<RunningTranscode, TranscodeError> {
        let mut cmd = tokio_command(&self.program);
        cmd.args(&self.leading_args)
            .arg(input)
            .arg(output_prefix)
            .arg(sample_rate.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let child = cmd.spawn().map_err(|source| TranscodeError::Spawn {
            program: self.program.display().to_string(),
            source,
        })?;

        debug!(
            pid = ?child.id(),
            input = %input.display(),
            output = %output_prefix.display(),
            "Transcoder started"
        );

        Ok(RunningTranscode {
            child,
            timeout: self.timeout,
            started: Instant::now(),
        })
    }
}

/// A transcoder process that has been started. Dropping it kills the process.
#[derive(Debug)]
pub struct RunningTranscode {
    child: Child,
    timeout: Duration,
    started: Instant,
}

impl RunningTranscode {
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Wait for the process and parse its sample count.
    pub async fn wait(mut self) -> Result<TranscodeOutput, TranscodeError> {
        let timeout = self.timeout;
        let stdout = self.child.stdout.take();
        let stderr = self.child.stderr.take();

        let child = &mut self.child;
        let run = async move {
            let (status, stdout, stderr) =
                tokio::join!(child.wait(), read_pipe(stdout), read_pipe(stderr));
            Ok::<_, std::io::Error>((status?, stdout?, stderr?))
        };
        let finished = tokio::time::timeout(timeout, run).await;

        let (status, stdout, stderr) = match finished {
            Ok(result) => result?,
            Err(_) => {
                let _ = self.child.kill().await;
                return Err(TranscodeError::TimedOut(timeout));
            }
        };

        if !status.success() {
            return Err(TranscodeError::Exited {
                status: describe_exit(&status),
                stderr: excerpt(&stderr),
            });
        }

        let samples = parse_samples(&stdout).ok_or_else(|| TranscodeError::InvalidOutput {
            stdout: excerpt(&stdout),
        })?;

        Ok(TranscodeOutput {
            samples,
            elapsed: self.started.elapsed(),
            stderr,
        })
    }
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> std::io::Result<String> {
    let Some(mut pipe) = pipe else {
        return Ok(String::new());
    };
    let mut buf = Vec::new();
    pipe.read_to_end(&mut buf).await?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// The sample count is the last non-empty line of stdout.
fn parse_samples(stdout: &str) -> Option<i64> {
    stdout
        .lines()
        .map(str::trim)
        .rfind(|line| !line.is_empty())?
        .parse::<i64>()
        .ok()
        .filter(|samples| *samples >= 0)
}

/// Tail of `text`, trimmed to a loggable size.
fn excerpt(text: &str) -> String {
    let text = text.trim();
    let count = text.chars().count();
    if count <= STDERR_EXCERPT_CHARS {
        return text.to_string();
    }
    let tail: String = text.chars().skip(count - STDERR_EXCERPT_CHARS).collect();
    format!("...{tail}")
}
