//! Runs a validated plan: file steps through the [`Workspace`], terminal steps
//! through the approval surface and the [`CommandRunner`].

use cadence_core::{
    CommandTranscript, ExecutionConfig, ExecutionPlan, PlannedChange, TerminalCommand,
};
use cadence_tooling::{
    ApprovalDecision, ApprovalSurface, CommandError, CommandRequest, CommandRunner, CommandSession,
    PendingCommand,
};

use crate::workspace::{AppliedChange, Workspace};

/// What happened to one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepStatus {
    /// File change written to disk
    Applied(AppliedChange),
    /// File change left unapplied because applying is disabled
    Pending,
    /// File change could not be applied
    ApplyFailed(String),
    /// Command exited with code 0
    Succeeded,
    /// Command exited non-zero or was killed by a signal
    Failed {
        /// Exit code, if the process produced one
        exit_code: Option<i32>,
    },
    /// Command killed after the configured timeout
    TimedOut {
        /// The timeout that expired
        timeout_ms: u64,
    },
    /// Command never started
    SpawnFailed(String),
    /// Approval was rejected or abandoned
    Denied(ApprovalDecision),
    /// Not attempted because execution halted earlier
    Skipped,
}

impl StepStatus {
    /// Whether the step counts as a failure.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::ApplyFailed(_)
                | Self::Failed { .. }
                | Self::TimedOut { .. }
                | Self::SpawnFailed(_)
                | Self::Denied(_)
        )
    }
}

/// Outcome of one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    /// Path the step targets
    pub file_path: String,
    /// Operation label
    pub kind: &'static str,
    /// Priority the step ran at
    pub priority: i64,
    /// What happened
    pub status: StepStatus,
}

/// Why a plan stopped before its last step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HaltReason {
    /// A command was not approved
    ApprovalDenied {
        /// The command
        command: String,
        /// Rejected or abandoned
        decision: ApprovalDecision,
    },
    /// A command failed, timed out or could not start
    CommandFailed {
        /// The command
        command: String,
    },
    /// A file change could not be applied
    ApplyFailed {
        /// The file
        path: String,
    },
}

/// Everything observed while executing one plan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionReport {
    /// One report per plan step, in execution order
    pub steps: Vec<StepReport>,
    /// Transcripts of terminal steps that ran (or failed to spawn)
    pub transcripts: Vec<CommandTranscript>,
    /// Set when execution stopped early
    pub halted: Option<HaltReason>,
}

impl ExecutionReport {
    /// True when no step failed.
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        !self.steps.iter().any(|step| step.status.is_failure())
    }

    /// True when a human declined a command.
    #[must_use]
    pub const fn halted_by_approval(&self) -> bool {
        matches!(self.halted, Some(HaltReason::ApprovalDenied { .. }))
    }
}

/// Executes plans against a workspace.
pub struct PlanExecutor<'surface> {
    workspace: Workspace,
    surface: &'surface dyn ApprovalSurface,
    runner: CommandRunner,
    config: ExecutionConfig,
    apply_files: bool,
}

impl<'surface> PlanExecutor<'surface> {
    /// Creates an executor that applies file steps and runs commands.
    pub fn new(
        workspace: Workspace,
        surface: &'surface dyn ApprovalSurface,
        config: ExecutionConfig,
    ) -> Self {
        Self {
            workspace,
            surface,
            runner: CommandRunner,
            config,
            apply_files: true,
        }
    }

    /// When false, file steps are reported as [`StepStatus::Pending`] and only commands run.
    #[must_use]
    pub fn with_apply_files(mut self, apply_files: bool) -> Self {
        self.apply_files = apply_files;
        self
    }

    /// Executes every step in ascending priority, one at a time.
    ///
    /// A refused approval always halts. Failed commands and file changes halt
    /// when `stop_on_failure` is set; the remaining steps are reported as skipped.
    pub async fn execute(&self, plan: &ExecutionPlan) -> ExecutionReport {
        let mut ordered: Vec<&PlannedChange> = plan.steps.iter().collect();
        ordered.sort_by_key(|step| step.priority);

        let mut report = ExecutionReport::default();
        for step in ordered {
            let status = if report.halted.is_some() {
                StepStatus::Skipped
            } else if let Some(command) = step.operation.terminal() {
                let (status, transcript) = self.run_command(command).await;
                report.transcripts.extend(transcript);
                match &status {
                    StepStatus::Denied(decision) => {
                        report.halted = Some(HaltReason::ApprovalDenied {
                            command: command.command.clone(),
                            decision: *decision,
                        });
                    }
                    failure if failure.is_failure() && self.config.stop_on_failure => {
                        report.halted = Some(HaltReason::CommandFailed {
                            command: command.command.clone(),
                        });
                    }
                    _ => {}
                }
                status
            } else {
                let status = self.apply_file_step(step).await;
                if status.is_failure() && self.config.stop_on_failure {
                    report.halted = Some(HaltReason::ApplyFailed {
                        path: step.file_path.clone(),
                    });
                }
                status
            };

            report.steps.push(StepReport {
                file_path: step.file_path.clone(),
                kind: step.operation.kind(),
                priority: step.priority,
                status,
            });
        }

        if let Some(halt) = &report.halted {
            tracing::warn!("Plan execution halted: {halt:?}");
        }
        report
    }

    async fn apply_file_step(&self, step: &PlannedChange) -> StepStatus {
        if !self.apply_files {
            return StepStatus::Pending;
        }
        match self.workspace.apply_step(step).await {
            Ok(change) => StepStatus::Applied(change),
            Err(err) => {
                tracing::warn!(
                    "Failed to apply {} to {}: {err}",
                    step.operation.kind(),
                    step.file_path
                );
                StepStatus::ApplyFailed(err.to_string())
            }
        }
    }

    async fn run_command(
        &self,
        command: &TerminalCommand,
    ) -> (StepStatus, Option<CommandTranscript>) {
        let working_directory = match self
            .workspace
            .resolve_dir(command.working_directory.as_deref())
        {
            Ok(dir) => dir,
            Err(err) => {
                tracing::warn!("Refusing to run '{}': {err}", command.command);
                let transcript = CommandTranscript {
                    command: command.command.clone(),
                    exit_code: -1,
                    stdout: String::new(),
                    stderr: err.to_string(),
                    duration_ms: 0,
                    timed_out: false,
                };
                return (StepStatus::SpawnFailed(err.to_string()), Some(transcript));
            }
        };
        let mut session = CommandSession::new(
            PendingCommand::new(&command.command, working_directory.clone()),
            self.surface,
        );

        if self.config.require_approval || command.requires_approval {
            let decision = session.request_approval().await;
            if !decision.is_approved() {
                tracing::warn!(
                    "Command '{}' was not approved: {decision:?}",
                    command.command
                );
                return (StepStatus::Denied(decision), None);
            }
        }

        session.mark_running();
        let request = CommandRequest::new(&command.command, working_directory)
            .with_timeout(self.config.command_timeout());
        let result = self
            .runner
            .execute_streaming(&request, |line| session.add_output(line))
            .await;

        match result {
            Ok(output) => {
                session.mark_complete(output.exit_code, output.duration_ms);
                (StepStatus::Succeeded, Some(output.to_transcript()))
            }
            Err(err) => {
                let transcript = err.to_transcript(&command.command);
                session.mark_complete(
                    err.output().and_then(|output| output.exit_code),
                    transcript.duration_ms,
                );
                let status = match &err {
                    CommandError::Failed { output } => StepStatus::Failed {
                        exit_code: output.exit_code,
                    },
                    CommandError::TimedOut { timeout_ms, .. } => StepStatus::TimedOut {
                        timeout_ms: *timeout_ms,
                    },
                    CommandError::EmptyCommand | CommandError::Spawn { .. } => {
                        StepStatus::SpawnFailed(err.to_string())
                    }
                };
                tracing::info!("{err}");
                (status, Some(transcript))
            }
        }
    }
}
