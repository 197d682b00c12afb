//! Human approval of terminal steps and the streaming surface that shows their output.
//!
//! A [`PendingCommand`] is created when approval is requested, marked running when
//! the process starts, receives output lines as they stream, and is completed
//! exactly once. A [`CommandSession`] keeps the record and the surface in step so
//! that callers never mutate one without the other.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{info, warn};
use uuid::Uuid;

use crate::command::{OutputLine, OutputStream};

/// Final answer to an approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    /// Run the command
    Approved,
    /// Explicitly refused
    Rejected,
    /// Dismissed, timed out, or the reviewer went away
    Abandoned,
}

impl ApprovalDecision {
    /// Only [`ApprovalDecision::Approved`] lets a command run; the other two are equivalent refusals.
    #[must_use]
    pub const fn is_approved(self) -> bool {
        matches!(self, Self::Approved)
    }
}

/// A terminal command awaiting or undergoing execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingCommand {
    /// Unique id for this request
    pub id: Uuid,
    /// Command line
    pub command: String,
    /// Directory the command will run in
    pub working_directory: PathBuf,
    /// Output in emission order
    pub output_lines: Vec<OutputLine>,
    /// Set once the process starts
    pub is_running: bool,
    /// Set exactly once on completion
    pub exit_code: Option<i32>,
    /// Set exactly once on completion
    pub duration_ms: Option<u64>,
}

impl PendingCommand {
    /// Creates a record for a command that has not started.
    pub fn new(command: impl Into<String>, working_directory: impl Into<PathBuf>) -> Self {
        Self {
            id: Uuid::new_v4(),
            command: command.into(),
            working_directory: working_directory.into(),
            output_lines: Vec::new(),
            is_running: false,
            exit_code: None,
            duration_ms: None,
        }
    }

    /// Whether completion has been recorded.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.duration_ms.is_some()
    }

    /// Marks the process as started.
    pub fn mark_running(&mut self) {
        self.is_running = true;
    }

    /// Appends one output line.
    pub fn add_output(&mut self, stream: OutputStream, text: impl Into<String>) {
        self.output_lines.push(OutputLine {
            stream,
            text: text.into(),
        });
    }

    /// Records completion. Returns false (and changes nothing) if already complete.
    pub fn mark_complete(&mut self, exit_code: Option<i32>, duration_ms: u64) -> bool {
        if self.is_complete() {
            warn!("Ignoring second completion for command {}", self.id);
            return false;
        }
        self.is_running = false;
        self.exit_code = exit_code;
        self.duration_ms = Some(duration_ms);
        true
    }
}

/// Human-facing collaborator that approves commands and displays their output.
#[async_trait]
pub trait ApprovalSurface: Send + Sync {
    /// Blocks until the command is approved, rejected, or abandoned.
    async fn request_approval(&self, command: &PendingCommand) -> ApprovalDecision;

    /// The command has started.
    fn mark_running(&self, id: Uuid);

    /// A line of output arrived.
    fn add_output(&self, id: Uuid, line: &OutputLine);

    /// The command finished.
    fn mark_complete(&self, id: Uuid, exit_code: Option<i32>, duration_ms: u64);
}

/// Keeps a [`PendingCommand`] and its surface in step for one command.
pub struct CommandSession<'surface> {
    pending: PendingCommand,
    surface: &'surface dyn ApprovalSurface,
}

impl<'surface> CommandSession<'surface> {
    /// Starts tracking a command.
    pub fn new(pending: PendingCommand, surface: &'surface dyn ApprovalSurface) -> Self {
        Self { pending, surface }
    }

    /// The tracked record.
    #[must_use]
    pub const fn pending(&self) -> &PendingCommand {
        &self.pending
    }

    /// Asks the surface for approval.
    pub async fn request_approval(&self) -> ApprovalDecision {
        let decision = self.surface.request_approval(&self.pending).await;
        info!("Approval for '{}': {:?}", self.pending.command, decision);
        decision
    }

    /// Marks the command running on both sides.
    pub fn mark_running(&mut self) {
        self.pending.mark_running();
        self.surface.mark_running(self.pending.id);
    }

    /// Appends a line on both sides.
    pub fn add_output(&mut self, line: &OutputLine) {
        self.pending.add_output(line.stream, line.text.clone());
        self.surface.add_output(self.pending.id, line);
    }

    /// Records completion on both sides, once.
    pub fn mark_complete(&mut self, exit_code: Option<i32>, duration_ms: u64) {
        if self.pending.mark_complete(exit_code, duration_ms) {
            self.surface
                .mark_complete(self.pending.id, exit_code, duration_ms);
        }
    }

    /// Ends the session and hands back the final record.
    #[must_use]
    pub fn finish(self) -> PendingCommand {
        self.pending
    }
}

/// Approves everything without asking.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprove;

#[async_trait]
impl ApprovalSurface for AutoApprove {
    async fn request_approval(&self, command: &PendingCommand) -> ApprovalDecision {
        info!("Auto-approving '{}'", command.command);
        ApprovalDecision::Approved
    }

    fn mark_running(&self, _id: Uuid) {}

    fn add_output(&self, _id: Uuid, _line: &OutputLine) {}

    fn mark_complete(&self, _id: Uuid, _exit_code: Option<i32>, _duration_ms: u64) {}
}

/// Event delivered to the human-facing task behind a [`ChannelApprovalSurface`].
#[derive(Debug)]
pub enum ApprovalEvent {
    /// A command needs a decision; answer through `responder`
    Requested {
        /// Snapshot of the command
        command: PendingCommand,
        /// Send the decision here; dropping it counts as abandoned
        responder: oneshot::Sender<ApprovalDecision>,
    },
    /// The command started
    Running {
        /// Command id
        id: Uuid,
    },
    /// An output line arrived
    Output {
        /// Command id
        id: Uuid,
        /// The line
        line: OutputLine,
    },
    /// The command finished
    Completed {
        /// Command id
        id: Uuid,
        /// Exit code, if any
        exit_code: Option<i32>,
        /// Wall-clock duration
        duration_ms: u64,
    },
}

/// Forwards approval requests and output to another task over a channel.
///
/// A request that receives no answer within the wait ceiling, whose responder
/// is dropped, or whose receiver is gone resolves to [`ApprovalDecision::Abandoned`].
#[derive(Debug, Clone)]
pub struct ChannelApprovalSurface {
    sender: mpsc::UnboundedSender<ApprovalEvent>,
    wait_ceiling: Duration,
}

impl ChannelApprovalSurface {
    /// Creates a surface and the receiver the human-facing task reads from.
    pub fn new(wait_ceiling: Duration) -> (Self, mpsc::UnboundedReceiver<ApprovalEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                sender,
                wait_ceiling,
            },
            receiver,
        )
    }

    fn send(&self, event: ApprovalEvent) {
        if let Err(error) = self.sender.send(event) {
            warn!("Failed to send approval event: {}", error);
        }
    }
}

#[async_trait]
impl ApprovalSurface for ChannelApprovalSurface {
    async fn request_approval(&self, command: &PendingCommand) -> ApprovalDecision {
        let (responder, answer) = oneshot::channel();
        let event = ApprovalEvent::Requested {
            command: command.clone(),
            responder,
        };
        if self.sender.send(event).is_err() {
            warn!("Approval receiver is gone; abandoning '{}'", command.command);
            return ApprovalDecision::Abandoned;
        }

        match timeout(self.wait_ceiling, answer).await {
            Ok(Ok(decision)) => decision,
            Ok(Err(_closed)) => {
                warn!("Approval for '{}' was dismissed", command.command);
                ApprovalDecision::Abandoned
            }
            Err(_elapsed) => {
                warn!(
                    "Approval for '{}' expired after {:?}",
                    command.command, self.wait_ceiling
                );
                ApprovalDecision::Abandoned
            }
        }
    }

    fn mark_running(&self, id: Uuid) {
        self.send(ApprovalEvent::Running { id });
    }

    fn add_output(&self, id: Uuid, line: &OutputLine) {
        self.send(ApprovalEvent::Output {
            id,
            line: line.clone(),
        });
    }

    fn mark_complete(&self, id: Uuid, exit_code: Option<i32>, duration_ms: u64) {
        self.send(ApprovalEvent::Completed {
            id,
            exit_code,
            duration_ms,
        });
    }
}
