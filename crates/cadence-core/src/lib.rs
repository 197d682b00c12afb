//! Core types and traits for cadence.
//!
//! This crate holds the execution-plan and task-analysis data model, the
//! [`ModelProvider`] collaborator trait, configuration, and the shared error
//! type used by every other crate in the workspace.
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

/// Task analysis record.
pub mod analysis;
/// Configuration loading and defaults.
pub mod config;
/// Error types and result definitions.
pub mod error;
/// Execution plan data model.
pub mod plan;
/// Embedded prompt templates.
pub mod prompts;
/// Lock helpers.
pub mod sync;
/// Trait definitions for model providers.
pub mod traits;
/// Executed command transcripts.
pub mod transcript;
/// Core data types for queries, responses, and context.
pub mod types;

pub use analysis::{DEFAULT_ANALYSIS_CONFIDENCE, Finding, Severity, TaskAnalysis};
pub use config::{
    CadenceConfig, ContextConfig, ExecutionConfig, PipelineConfig, ProviderConfig,
    WorkspaceConfig,
};
pub use error::{Error, Result};
pub use plan::{
    Complexity, DEFAULT_PLAN_CONFIDENCE, ExecutionPlan, FileEdit, Operation, PlannedChange,
    TaskType, TerminalCommand,
};
pub use sync::RecoverLock;
pub use traits::ModelProvider;
pub use transcript::CommandTranscript;
pub use types::{Context, FileContext, GenerationConfig, Query, Response, TokenUsage};
