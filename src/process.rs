use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use crate::error::ProcessError;

#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// `None` when the process was terminated by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Last `lines` lines of stderr, for log messages.
    pub fn stderr_tail(&self, lines: usize) -> String {
        let all: Vec<&str> = self.stderr.trim_end().lines().collect();
        let start = all.len().saturating_sub(lines);
        all[start..].join("\n")
    }
}

/// Run `command` to completion with captured output, killing it after `timeout`.
///
/// The child is spawned with `kill_on_drop`, so whichever way this returns
/// (finished, timed out, or the caller's future dropped) the process does
/// not outlive it.
pub async fn run_captured(
    mut command: Command,
    timeout: Duration,
) -> Result<ProcessOutput, ProcessError> {
    let program = command.as_std().get_program().to_string_lossy().into_owned();

    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = command.spawn().map_err(|source| ProcessError::Spawn {
        program: program.clone(),
        source,
    })?;

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => Ok(ProcessOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }),
        Ok(Err(source)) => Err(ProcessError::Spawn { program, source }),
        Err(_) => Err(ProcessError::TimedOut {
            program,
            after: timeout,
        }),
    }
}
