//! Shell command execution with streamed output and an optional timeout.

use cadence_core::CommandTranscript;
use serde::{Deserialize, Serialize};
use std::future;
use std::io::Error as IoError;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt as _, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};

/// Which pipe a line of output came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    /// Standard output
    Stdout,
    /// Standard error
    Stderr,
}

/// One completed line of process output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputLine {
    /// Source pipe
    pub stream: OutputStream,
    /// Line content without the trailing newline
    pub text: String,
}

/// What to run and where.
#[derive(Debug, Clone)]
pub struct CommandRequest {
    /// Command line handed to the shell
    pub command: String,
    /// Directory the shell starts in
    pub working_directory: PathBuf,
    /// Kill the process after this long; `None` waits forever
    pub timeout: Option<Duration>,
}

impl CommandRequest {
    /// Creates a request without a timeout.
    pub fn new(command: impl Into<String>, working_directory: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            working_directory: working_directory.into(),
            timeout: None,
        }
    }

    /// Sets the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Everything observed while a command ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    /// Command line that was run
    pub command: String,
    /// Standard output lines in emission order
    pub stdout: Vec<String>,
    /// Standard error lines in emission order
    pub stderr: Vec<String>,
    /// Exit code; `None` when killed by a signal or on timeout
    pub exit_code: Option<i32>,
    /// Wall-clock duration
    pub duration_ms: u64,
    /// Whether the process was killed because the timeout expired
    pub timed_out: bool,
}

impl CommandOutput {
    /// True when the command exited with code 0 before any timeout.
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == Some(0) && !self.timed_out
    }

    /// Converts into the transcript shape used by failure recovery.
    #[must_use]
    pub fn to_transcript(&self) -> CommandTranscript {
        CommandTranscript {
            command: self.command.clone(),
            exit_code: self.exit_code.unwrap_or(-1),
            stdout: self.stdout.join("\n"),
            stderr: self.stderr.join("\n"),
            duration_ms: self.duration_ms,
            timed_out: self.timed_out,
        }
    }

    fn push(&mut self, line: &OutputLine) {
        match line.stream {
            OutputStream::Stdout => self.stdout.push(line.text.clone()),
            OutputStream::Stderr => self.stderr.push(line.text.clone()),
        }
    }
}

/// Ways a command can fail; callers branch on each one differently.
#[derive(Debug, Error)]
pub enum CommandError {
    /// Command string was blank
    #[error("Empty command string")]
    EmptyCommand,

    /// The shell could not be started
    #[error("Failed to spawn '{command}': {source}")]
    Spawn {
        /// Command that failed to start
        command: String,
        /// Underlying OS error
        #[source]
        source: IoError,
    },

    /// The command ran and exited non-zero (or was killed by a signal)
    #[error("Command '{}' failed with exit code {:?}", .output.command, .output.exit_code)]
    Failed {
        /// Captured output
        output: Box<CommandOutput>,
    },

    /// The command was killed after exceeding its timeout
    #[error("Command '{}' timed out after {timeout_ms}ms", .output.command)]
    TimedOut {
        /// Configured timeout
        timeout_ms: u64,
        /// Output captured before the kill
        output: Box<CommandOutput>,
    },
}

impl CommandError {
    /// Captured output, when the process started at all.
    #[must_use]
    pub fn output(&self) -> Option<&CommandOutput> {
        match self {
            Self::Failed { output } | Self::TimedOut { output, .. } => Some(output),
            Self::EmptyCommand | Self::Spawn { .. } => None,
        }
    }

    /// Transcript for failure recovery; spawn errors become exit code -1 with the error as stderr.
    #[must_use]
    pub fn to_transcript(&self, command: &str) -> CommandTranscript {
        self.output().map_or_else(
            || CommandTranscript {
                command: command.to_owned(),
                exit_code: -1,
                stdout: String::new(),
                stderr: self.to_string(),
                duration_ms: 0,
                timed_out: false,
            },
            CommandOutput::to_transcript,
        )
    }
}

/// Runs shell commands through the platform shell.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandRunner;

impl CommandRunner {
    /// Runs a command, discarding streamed lines.
    ///
    /// # Errors
    /// See [`CommandRunner::execute_streaming`].
    pub async fn execute(&self, request: &CommandRequest) -> Result<CommandOutput, CommandError> {
        self.execute_streaming(request, |_line| {}).await
    }

    /// Runs a command, calling `on_output` for every completed line as it arrives.
    ///
    /// Lines from each stream reach the callback in emission order; there is no
    /// ordering guarantee between stdout and stderr.
    ///
    /// # Errors
    /// - [`CommandError::EmptyCommand`] for a blank command
    /// - [`CommandError::Spawn`] when the shell cannot be started
    /// - [`CommandError::Failed`] on a non-zero exit
    /// - [`CommandError::TimedOut`] when the timeout expires; the process is killed
    pub async fn execute_streaming<F>(
        &self,
        request: &CommandRequest,
        mut on_output: F,
    ) -> Result<CommandOutput, CommandError>
    where
        F: FnMut(&OutputLine) + Send,
    {
        if request.command.trim().is_empty() {
            return Err(CommandError::EmptyCommand);
        }

        tracing::debug!(
            "Running command: {} in directory: {:?}",
            request.command,
            request.working_directory
        );

        let start = Instant::now();
        let mut child = spawn_shell(request)?;

        let (sender, mut receiver) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, OutputStream::Stdout, sender.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, OutputStream::Stderr, sender.clone()));
        }
        drop(sender);

        let mut output = CommandOutput {
            command: request.command.clone(),
            stdout: Vec::new(),
            stderr: Vec::new(),
            exit_code: None,
            duration_ms: 0,
            timed_out: false,
        };

        let deadline = request.timeout.map(|timeout| start + timeout);
        let expiry = async move {
            match deadline {
                Some(deadline) => sleep_until(deadline).await,
                None => future::pending::<()>().await,
            }
        };
        tokio::pin!(expiry);

        let mut streams_open = true;
        let mut status = None;

        while streams_open || status.is_none() {
            tokio::select! {
                line = receiver.recv(), if streams_open => match line {
                    Some(line) => {
                        on_output(&line);
                        output.push(&line);
                    }
                    None => streams_open = false,
                },
                exit = child.wait(), if status.is_none() => {
                    let exit = exit.map_err(|source| CommandError::Spawn {
                        command: request.command.clone(),
                        source,
                    })?;
                    status = Some(exit);
                },
                () = &mut expiry => {
                    kill(&mut child);
                    output.timed_out = true;
                    output.duration_ms = elapsed_ms(start);
                    let timeout_ms = request
                        .timeout
                        .map_or(0, |timeout| timeout.as_millis() as u64);
                    tracing::warn!(
                        "Command '{}' timed out after {}ms",
                        request.command,
                        timeout_ms
                    );
                    return Err(CommandError::TimedOut {
                        timeout_ms,
                        output: Box::new(output),
                    });
                }
            }
        }

        output.exit_code = status.and_then(|exit| exit.code());
        output.duration_ms = elapsed_ms(start);

        tracing::debug!(
            "Command completed with exit code {:?} in {}ms",
            output.exit_code,
            output.duration_ms
        );

        if output.success() {
            Ok(output)
        } else {
            Err(CommandError::Failed {
                output: Box::new(output),
            })
        }
    }
}

/// Spawns the platform shell with piped output.
fn spawn_shell(request: &CommandRequest) -> Result<Child, CommandError> {
    // On Windows, try bash first (for Git Bash), fall back to cmd.exe
    #[cfg(target_os = "windows")]
    let shells = [("bash.exe", "-c"), ("cmd.exe", "/c")];

    #[cfg(not(target_os = "windows"))]
    let shells = [("sh", "-c")];

    let mut last_error = None;
    for (shell, flag) in shells {
        let spawned = Command::new(shell)
            .arg(flag)
            .arg(&request.command)
            .current_dir(&request.working_directory)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        match spawned {
            Ok(child) => return Ok(child),
            Err(error) => {
                tracing::debug!("Failed to start {shell}: {error}");
                last_error = Some(error);
            }
        }
    }

    Err(CommandError::Spawn {
        command: request.command.clone(),
        source: last_error.unwrap_or_else(|| IoError::other("no shell available")),
    })
}

/// Reads a pipe line by line and forwards each line until the pipe closes.
async fn forward_lines<R>(pipe: R, stream: OutputStream, sender: mpsc::UnboundedSender<OutputLine>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(pipe);
    let mut buffer = Vec::new();
    loop {
        buffer.clear();
        match reader.read_until(b'\n', &mut buffer).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&buffer)
                    .trim_end_matches(['\n', '\r'])
                    .to_owned();
                if sender.send(OutputLine { stream, text }).is_err() {
                    break;
                }
            }
            Err(error) => {
                tracing::debug!("Stopped reading {stream:?}: {error}");
                break;
            }
        }
    }
}

fn kill(child: &mut Child) {
    if let Err(error) = child.start_kill() {
        tracing::debug!("Failed to kill timed-out process: {error}");
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}
