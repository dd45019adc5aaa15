//! Small process-related helpers shared across the workspace.
//!
//! Covers spawning helper binaries without flashing a console window on
//! Windows, identifying the current host/process for bookkeeping columns, and
//! rendering child exit statuses for logs.

use std::ffi::OsStr;
use std::process::ExitStatus;
use std::sync::OnceLock;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Fallback used when the OS refuses to report a hostname.
pub const UNKNOWN_HOST: &str = "unknown-host";

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
}

impl NoWindowExt for std::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.creation_flags(CREATE_NO_WINDOW);
        }
    }
}

#[cfg(feature = "tokio")]
impl NoWindowExt for tokio::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.as_std_mut().creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Create a `tokio::process::Command` that is killed when its handle is
/// dropped, with `CREATE_NO_WINDOW` applied on Windows.
#[cfg(feature = "tokio")]
pub fn tokio_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.no_window();
    cmd.kill_on_drop(true);
    cmd
}

/// Hostname of the machine running this process.
///
/// Resolved once and cached; falls back to [`UNKNOWN_HOST`].
pub fn hostname() -> &'static str {
    static HOSTNAME: OnceLock<String> = OnceLock::new();
    HOSTNAME.get_or_init(|| {
        sysinfo::System::host_name()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| UNKNOWN_HOST.to_string())
    })
}

/// Describe how a child process exited, e.g. `exit code 3` or `signal 9`.
pub fn describe_exit(status: &ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("exit code {code}");
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("signal {signal}");
        }
    }

    "unknown exit status".to_string()
}
