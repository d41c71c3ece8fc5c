//! External tool invocation
//!
//! Builds `std::process::Command`s for the command-line clients retrieval
//! delegates to, and runs them while streaming their output to the terminal.

use std::io;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Instant;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command as TokioCommand;

/// A command-line tool with arguments that precede every invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    program: String,
    default_args: Vec<String>,
}

impl ToolCommand {
    /// A tool with no default arguments.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            default_args: Vec::new(),
        }
    }

    /// Append an argument passed on every invocation.
    pub fn add_default_arg(&mut self, arg: impl Into<String>) -> &mut Self {
        self.default_args.push(arg.into());
        self
    }

    /// Program name or path.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Default arguments, in order.
    #[must_use]
    pub fn default_args(&self) -> &[String] {
        &self.default_args
    }

    /// Build a command running in `cwd` with `args` after the defaults.
    #[must_use]
    pub fn build(&self, args: &[&str], cwd: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.default_args);
        cmd.args(args);
        cmd.current_dir(cwd);
        cmd
    }

    /// Command line as text, for diagnostics.
    #[must_use]
    pub fn command_line(&self, args: &[&str]) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.default_args.iter().map(String::as_str))
            .chain(args.iter().copied())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Captured stdout
    pub stdout: String,
    /// Captured stderr
    pub stderr: String,
    /// Exit code (None if killed by signal)
    pub exit_code: Option<i32>,
    /// Wall-clock duration in seconds
    pub duration_secs: u64,
}

impl CommandOutput {
    /// Whether the command exited with status 0.
    #[must_use]
    pub const fn success(&self) -> bool {
        matches!(self.exit_code, Some(0))
    }

    /// Exit status for display, "unknown" if the process was killed by signal.
    #[must_use]
    pub fn exit_status(&self) -> String {
        self.exit_code
            .map_or_else(|| "unknown".to_string(), |c| c.to_string())
    }
}

/// Run a command, forwarding its output to stderr and capturing it.
///
/// Both streams go to stderr so stdout stays free for manifest output.
pub async fn run_command(cmd: Command) -> io::Result<CommandOutput> {
    let mut tokio_cmd = TokioCommand::from(cmd);
    tokio_cmd.stdout(Stdio::piped());
    tokio_cmd.stderr(Stdio::piped());

    let start = Instant::now();
    let mut child = tokio_cmd.spawn()?;

    let child_stdout = child
        .stdout
        .take()
        .ok_or_else(|| io::Error::other("failed to capture stdout"))?;
    let child_stderr = child
        .stderr
        .take()
        .ok_or_else(|| io::Error::other("failed to capture stderr"))?;

    let stdout_handle = tokio::spawn(async move {
        let mut lines = BufReader::new(child_stdout).lines();
        let mut captured = Vec::new();
        while let Ok(Some(line)) = lines.next_line().await {
            eprintln!("    {line}");
            captured.push(line);
        }
        captured.join("\n")
    });

    let stderr_handle = tokio::spawn(async move {
        let mut lines = BufReader::new(child_stderr).lines();
        let mut captured = Vec::new();
        while let Ok(Some(line)) = lines.next_line().await {
            eprintln!("    {line}");
            captured.push(line);
        }
        captured.join("\n")
    });

    let status = child.wait().await?;
    let stdout = stdout_handle.await.map_err(io::Error::other)?;
    let stderr = stderr_handle.await.map_err(io::Error::other)?;

    Ok(CommandOutput {
        stdout,
        stderr,
        exit_code: status.code(),
        duration_secs: start.elapsed().as_secs(),
    })
}
