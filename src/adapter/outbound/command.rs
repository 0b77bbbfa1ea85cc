//! Shared helpers for running external tools.

use std::path::PathBuf;
use std::process::Output;

use tokio::process::Command;
use tracing::debug;

use crate::domain::environment::is_executable;
use crate::error::{Error, Result};

/// Lines of stderr kept in error messages.
const STDERR_TAIL_LINES: usize = 20;

/// Captured output of a successful command.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Run `command` to completion and fail on a non-zero exit.
///
/// # Errors
///
/// Returns [`Error::Io`] when the program cannot be started and
/// [`Error::Command`] when it exits unsuccessfully.
pub async fn run(program: &str, command: &mut Command) -> Result<CommandOutput> {
    debug!(program, "Running command");
    let output = command.kill_on_drop(true).output().await?;
    check(program, output)
}

fn check(program: &str, output: Output) -> Result<CommandOutput> {
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    if output.status.success() {
        return Ok(CommandOutput { stdout, stderr });
    }
    let status = output
        .status
        .code()
        .map_or_else(|| "terminated by signal".to_string(), |code| format!("exit {code}"));
    Err(Error::Command {
        program: program.to_string(),
        status,
        stderr: tail(if stderr.trim().is_empty() { &stdout } else { &stderr }),
    })
}

/// Last few lines of a tool's output, for error messages.
#[must_use]
pub fn tail(text: &str) -> String {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

/// Locate an executable on `PATH`.
#[must_use]
pub fn find_on_path(program: &str) -> Option<PathBuf> {
    if program.contains(std::path::MAIN_SEPARATOR) {
        let path = PathBuf::from(program);
        return is_executable(&path).then_some(path);
    }
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_keeps_last_lines() {
        let text: String = (0..30).map(|i| format!("line {i}\n")).collect();
        let tail = tail(&text);
        assert!(tail.starts_with("line 10"));
        assert!(tail.ends_with("line 29"));
    }

    #[tokio::test]
    async fn non_zero_exit_is_command_error() {
        let result = run("sh", Command::new("sh").args(["-c", "echo oops >&2; exit 3"])).await;
        match result {
            Err(Error::Command { status, stderr, .. }) => {
                assert_eq!(status, "exit 3");
                assert_eq!(stderr, "oops");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_program_is_io_error() {
        let result = run("definitely-not-a-tool", &mut Command::new("definitely-not-a-tool")).await;
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[test]
    fn finds_shell_on_path() {
        assert!(find_on_path("sh").is_some());
        assert!(find_on_path("definitely-not-a-tool").is_none());
    }
}
