//! Structured-response extraction, plan validation, execution and recovery.
//!
//! Every model call in this crate goes through the same escalating pipeline:
//!
//! - **Strict**: extract the payload and parse it against a closed schema
//! - **Repair**: one extra call that restructures the text, then a single re-parse
//! - **Lenient**: pattern-based step salvage (execution plans only)
//! - **Fallback**: a minimal, low-confidence record built from local context
//!
//! Plans from any tier pass through [`normalize_plan`] before anything uses
//! them. The [`Orchestrator`] ties analysis, planning, execution and failure
//! recovery together.
//!
//! # Example
//!
//! ```no_run
//! use cadence_agent::Orchestrator;
//! use cadence_core::{CadenceConfig, ModelProvider};
//! use cadence_providers::MockProvider;
//! use cadence_tooling::AutoApprove;
//! use std::sync::Arc;
//!
//! # async fn example() -> cadence_core::Result<()> {
//! let provider: Arc<dyn ModelProvider> = Arc::new(MockProvider::new());
//! let orchestrator = Orchestrator::new(provider, CadenceConfig::default());
//! let report = orchestrator
//!     .run("Add a README", Some("README.md"), &AutoApprove)
//!     .await?;
//! println!("{:?}", report.stop);
//! # Ok(())
//! # }
//! ```
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

/// Task analysis
pub mod analyzer;
/// Plan execution
pub mod executor;
/// Payload extraction from raw responses
pub mod extraction;
/// Shared generation call and pipeline construction
pub mod generation;
/// Pattern-based plan salvage
pub mod lenient;
/// Plan normalization and validation
pub mod normalize;
/// End-to-end request orchestration
pub mod orchestrator;
/// Tier escalation driver and observers
pub mod pipeline;
/// Plan generation
pub mod planner;
/// Failure recovery
pub mod recovery;
/// Structural repair collaborator
pub mod repair;
/// Record schemas and strict parsers
pub mod schema;
/// Workspace file access
pub mod workspace;

pub use analyzer::{AnalysisResult, TaskAnalyzer, describe_analysis};
pub use executor::{ExecutionReport, HaltReason, PlanExecutor, StepReport, StepStatus};
pub use extraction::extract_payload;
pub use generation::GenerationContext;
pub use lenient::extract_plan;
pub use normalize::{NormalizedPlan, normalize_path, normalize_plan};
pub use orchestrator::{Orchestrator, PlanningOutcome, RoundReport, RunReport, StopReason};
pub use pipeline::{
    ExtractionTier, FallbackTier, FanoutObserver, LenientTier, PipelineObserver, PipelineOutcome,
    RecordingObserver, RepairTier, StrictTier, TierFailure, TierKind, TierOutcome, TierPipeline,
    TierReport, TracingObserver,
};
pub use planner::{PlanRequest, PlanResult, Planner, fallback_plan};
pub use recovery::{FailureRecovery, RecoveryOutcome, RecoveryRequest, mentioned_files};
pub use repair::{RepairCollaborator, RepairContext, build_repair_prompt, worked_example};
pub use schema::{
    AnalysisSchema, ExpectedStructure, MalformedOutput, PlanSchema, RawOperation, RawPlan,
    RawRecovery, RawStep, RecoverySchema, RepairCaller, Schema, SchemaFormat,
};
pub use workspace::{AppliedChange, Workspace, truncate_content};
