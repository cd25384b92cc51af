//! Small process-related helpers shared across the workspace.
//!
//! Besides the console-window suppression used on Windows, this crate offers
//! [`run_captured`], which runs a child to completion under an optional
//! deadline and turns every way it can go wrong into a [`ProcessError`].

#[cfg(feature = "tokio")]
use std::ffi::OsStr;
#[cfg(feature = "tokio")]
use std::process::Stdio;
#[cfg(feature = "tokio")]
use std::time::Duration;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Number of trailing stderr lines kept in error messages.
const STDERR_TAIL_LINES: usize = 20;

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
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

/// Create a `tokio::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
#[cfg(feature = "tokio")]
pub fn tokio_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.no_window();
    cmd
}

/// Failure modes of a captured child process.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to wait for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} did not finish within {after:?}")]
    TimedOut {
        program: String,
        after: std::time::Duration,
    },

    #[error("{program} exited with status {code:?}: {stderr}")]
    Failed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },
}

/// Output of a child that exited successfully.
#[derive(Debug, Clone, Default)]
pub struct CapturedOutput {
    pub stdout: String,
    /// Last lines written to stderr.
    pub stderr: String,
}

/// Keep only the last [`STDERR_TAIL_LINES`] non-empty lines of `raw`.
pub fn tail_lines(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

/// Run `cmd` to completion, capturing stdout and the tail of stderr.
///
/// stdin is closed. When `deadline` elapses the child is killed (via
/// `kill_on_drop`) and [`ProcessError::TimedOut`] is returned.
#[cfg(feature = "tokio")]
pub async fn run_captured(
    mut cmd: tokio::process::Command,
    deadline: Option<Duration>,
) -> Result<CapturedOutput, ProcessError> {
    let program = cmd.as_std().get_program().to_string_lossy().into_owned();

    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd.spawn().map_err(|source| ProcessError::Spawn {
        program: program.clone(),
        source,
    })?;

    let waited = match deadline {
        Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
            Ok(res) => res,
            Err(_) => {
                return Err(ProcessError::TimedOut {
                    program,
                    after: limit,
                });
            }
        },
        None => child.wait_with_output().await,
    };

    let output = waited.map_err(|source| ProcessError::Wait {
        program: program.clone(),
        source,
    })?;

    if !output.status.success() {
        return Err(ProcessError::Failed {
            program,
            code: output.status.code(),
            stderr: tail_lines(&output.stderr),
        });
    }

    Ok(CapturedOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: tail_lines(&output.stderr),
    })
}
