//! Subprocess seam for the external tools drivers delegate to.
//!
//! Every call carries its own timeout, covering stdin, output and exit.
//! Stdin is the only channel secret values travel on, and it never appears
//! in logs or error messages.

use std::fmt;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::{Output, Stdio};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, Command};
use tracing::debug;

use crate::config::ProgressSettings;
use crate::error::DriverError;

use super::progress::IdleSpinner;

/// Longest stderr excerpt kept in an error.
const MAX_STDERR_CHARS: usize = 2000;

/// Default timeout when a caller does not set one.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(900);

/// A command to run.
#[derive(Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Program name, resolved through `PATH`.
    pub program: String,
    /// Arguments.
    pub args: Vec<String>,
    /// Working directory.
    pub cwd: Option<PathBuf>,
    /// Extra environment variables.
    pub env: Vec<(String, String)>,
    /// Data written to stdin; never logged.
    pub stdin: Option<String>,
    /// Time allowed before the process is killed.
    pub timeout: Duration,
    /// Echo output lines to stderr as they arrive.
    pub stream: bool,
}

impl CommandSpec {
    /// Creates a command with no arguments.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            stdin: None,
            timeout: DEFAULT_TIMEOUT,
            stream: false,
        }
    }

    /// Appends one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets the working directory.
    #[must_use]
    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Adds an environment variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Sets stdin content.
    #[must_use]
    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Sets the timeout.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Echoes stdout and stderr lines to stderr while the command runs.
    /// Both end up in [`CommandOutput::stdout`].
    #[must_use]
    pub const fn stream_output(mut self) -> Self {
        self.stream = true;
        self
    }

    /// Returns true if any argument equals `value`.
    #[must_use]
    pub fn has_arg(&self, value: &str) -> bool {
        self.args.iter().any(|arg| arg == value)
    }

    /// Returns true if the arguments start with `prefix`.
    #[must_use]
    pub fn starts_with(&self, prefix: &[&str]) -> bool {
        self.args.len() >= prefix.len()
            && self.args.iter().zip(prefix).all(|(arg, expected)| arg == expected)
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandSpec")
            .field("command", &self.to_string())
            .field("cwd", &self.cwd)
            .field("env", &self.env.iter().map(|(k, _)| k).collect::<Vec<_>>())
            .field("stdin", &self.stdin.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .field("stream", &self.stream)
            .finish()
    }
}

/// Captured output of a successful command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Output with the given stdout.
    #[must_use]
    pub fn stdout(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }
}

/// Runs external commands.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs a command to completion.
    ///
    /// # Errors
    ///
    /// Returns `DriverError::CommandNotFound` if the program is missing,
    /// `DriverError::Timeout` if it runs too long (the process is killed),
    /// and `DriverError::CommandFailed` for a non-zero exit.
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, DriverError>;
}

/// Runs commands as child processes.
#[derive(Debug, Clone, Copy)]
pub struct ProcessRunner {
    progress: ProgressSettings,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessRunner {
    /// Creates a runner that never draws a spinner.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            progress: ProgressSettings::disabled(),
        }
    }

    /// Creates a runner drawing the idle spinner, if stderr is a terminal.
    #[must_use]
    pub fn with_progress(progress: ProgressSettings) -> Self {
        let enabled = progress.enabled && std::io::stderr().is_terminal();
        Self {
            progress: ProgressSettings { enabled, ..progress },
        }
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, DriverError> {
        debug!("Running: {spec}");
        let started = Instant::now();

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }

        let child = command.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                DriverError::CommandNotFound {
                    program: spec.program.clone(),
                }
            } else {
                failure(spec, e.to_string())
            }
        })?;

        let spinner = IdleSpinner::new(self.progress, &spec.to_string());
        let output = tokio::time::timeout(spec.timeout, complete(spec, child, spinner))
            .await
            .map_err(|_| DriverError::Timeout {
                operation: spec.to_string(),
                after: spec.timeout,
            })??;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        debug!("{} finished in {:?}", spec.program, started.elapsed());

        if output.status.success() {
            Ok(CommandOutput { stdout, stderr })
        } else {
            let detail = if stderr.trim().is_empty() { &stdout } else { &stderr };
            Err(DriverError::CommandFailed {
                command: spec.to_string(),
                status: output.status.code().unwrap_or(-1),
                stderr: truncate(detail.trim(), MAX_STDERR_CHARS),
            })
        }
    }
}

/// Feeds stdin, then collects output until the child exits. Dropping the
/// future kills the child.
async fn complete(
    spec: &CommandSpec,
    mut child: Child,
    mut spinner: IdleSpinner,
) -> Result<Output, DriverError> {
    if let (Some(input), Some(mut stdin)) = (&spec.stdin, child.stdin.take()) {
        stdin
            .write_all(input.as_bytes())
            .await
            .map_err(|e| failure(spec, format!("failed to write stdin: {e}")))?;
    }

    if spec.stream {
        return stream(spec, child, &mut spinner).await;
    }

    let wait = child.wait_with_output();
    tokio::pin!(wait);
    loop {
        tokio::select! {
            output = &mut wait => return output.map_err(|e| failure(spec, e.to_string())),
            () = spinner.wait() => {}
        }
    }
}

/// Echoes both pipes line by line and returns them combined as stdout.
async fn stream(
    spec: &CommandSpec,
    mut child: Child,
    spinner: &mut IdleSpinner,
) -> Result<Output, DriverError> {
    let io_error = |e: std::io::Error| failure(spec, e.to_string());
    let mut stdout = child.stdout.take().map(|out| BufReader::new(out).lines());
    let mut stderr = child.stderr.take().map(|err| BufReader::new(err).lines());
    let mut combined = String::new();

    while stdout.is_some() || stderr.is_some() {
        let line = tokio::select! {
            line = next_line(&mut stdout) => line,
            line = next_line(&mut stderr) => line,
            () = spinner.wait() => continue,
        };
        if let Some(line) = line.map_err(io_error)? {
            spinner.activity();
            eprintln!("{line}");
            combined.push_str(&line);
            combined.push('\n');
        }
    }

    let status = child.wait().await.map_err(io_error)?;
    Ok(Output {
        status,
        stdout: combined.into_bytes(),
        stderr: Vec::new(),
    })
}

/// Next line of an open pipe; closes the pipe at end of input. Never
/// resolves once closed.
async fn next_line<R>(lines: &mut Option<Lines<R>>) -> std::io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let Some(reader) = lines.as_mut() else {
        return std::future::pending().await;
    };
    let line = reader.next_line().await?;
    if line.is_none() {
        *lines = None;
    }
    Ok(line)
}

fn failure(spec: &CommandSpec, stderr: String) -> DriverError {
    DriverError::CommandFailed {
        command: spec.to_string(),
        status: -1,
        stderr,
    }
}

pub(super) fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}…", &text[..cut]),
        None => text.to_string(),
    }
}
