//! Command execution and approval tooling for cadence.
//!
//! [`CommandRunner`] spawns shell commands, streams their output line by line,
//! and enforces an optional timeout. The [`approval`] module holds the
//! human-facing side: approval requests and the output panel they drive.
#![cfg_attr(
    test,
    allow(
        clippy::expect_used,
        clippy::unwrap_used,
        clippy::panic,
        clippy::missing_panics_doc,
        clippy::assertions_on_result_states,
        reason = "Allow for tests"
    )
)]

/// Approval requests and output streaming surfaces.
pub mod approval;
/// Shell command execution.
pub mod command;

pub use approval::{
    ApprovalDecision, ApprovalEvent, ApprovalSurface, AutoApprove, ChannelApprovalSurface,
    CommandSession, PendingCommand,
};
pub use command::{
    CommandError, CommandOutput, CommandRequest, CommandRunner, OutputLine, OutputStream,
};
