use std::sync::Arc;

use cadence_core::{CadenceConfig, ExecutionPlan, FileContext, ModelProvider, Result};
use cadence_tooling::ApprovalSurface;

use crate::analyzer::{AnalysisResult, TaskAnalyzer};
use crate::executor::{ExecutionReport, HaltReason, PlanExecutor};
use crate::generation::GenerationContext;
use crate::normalize::normalize_path;
use crate::pipeline::PipelineObserver;
use crate::planner::{PlanRequest, PlanResult, Planner};
use crate::recovery::{FailureRecovery, RecoveryOutcome, RecoveryRequest};
use crate::workspace::Workspace;

/// Analysis and validated plan for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanningOutcome {
    /// Task analysis
    pub analysis: AnalysisResult,
    /// Validated plan
    pub plan: PlanResult,
}

/// One execute/evaluate cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundReport {
    /// Plan executed this round
    pub plan: ExecutionPlan,
    /// What execution did
    pub execution: ExecutionReport,
    /// Evaluation of the round; `None` when execution halted before evaluation
    pub recovery: Option<RecoveryOutcome>,
}

/// Why the recovery loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// Every command of the last round succeeded
    Completed,
    /// Failure analysis judged the failure unfixable
    NotRecoverable,
    /// Failure analysis produced no steps to run
    EmptyRecoveryPlan,
    /// Execution halted on a refused approval or a failed file change
    Halted(HaltReason),
    /// Commands still failed after the last permitted recovery round
    RoundLimit,
}

/// Everything `run` did.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    /// Planning of the primary plan
    pub planning: PlanningOutcome,
    /// Primary round first, then one per recovery plan
    pub rounds: Vec<RoundReport>,
    /// Why the loop ended
    pub stop: StopReason,
}

impl RunReport {
    /// True when the last round ran without a failed command.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.stop == StopReason::Completed
    }
}

/// Drives a request from analysis through execution and recovery.
pub struct Orchestrator {
    generation: GenerationContext,
    config: CadenceConfig,
    workspace: Workspace,
    role: Option<String>,
}

impl Orchestrator {
    /// Creates an orchestrator for the workspace named in `config`.
    pub fn new(provider: Arc<dyn ModelProvider>, config: CadenceConfig) -> Self {
        let generation = GenerationContext::new(provider, &config.pipeline);
        let workspace = Workspace::new(config.workspace.root_path.clone());
        Self {
            generation,
            config,
            workspace,
            role: None,
        }
    }

    /// Role handed to analysis and planning, narrowing their repair examples.
    #[must_use]
    pub fn with_role(mut self, role: Option<String>) -> Self {
        self.role = role;
        self
    }

    /// Replaces the tier observer used by every pipeline.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.generation = self.generation.with_observer(observer);
        self
    }

    /// The workspace plans are validated against.
    pub const fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Analyzes the request and produces a validated plan. Nothing is executed.
    ///
    /// # Errors
    /// Returns an error when a generation call fails or no plan can be produced.
    pub async fn plan(&self, request: &str, active_file: Option<&str>) -> Result<PlanningOutcome> {
        let active = active_file
            .map(|path| normalize_path(path, self.workspace.root_path()))
            .filter(|path| !path.is_empty() && path != ".");
        tracing::info!(active = active.as_deref().unwrap_or("-"), "Planning request");

        let analysis_files = self.context_files(active.iter().map(String::as_str)).await;
        let analysis = TaskAnalyzer::new(self.generation.clone())
            .with_role(self.role.clone())
            .analyze(request, analysis_files)
            .await?;

        let plan_files = self
            .context_files(
                active
                    .iter()
                    .chain(&analysis.analysis.required_files)
                    .chain(&analysis.analysis.affected_files)
                    .map(String::as_str),
            )
            .await;
        let plan = Planner::new(
            self.generation.clone(),
            self.workspace.root_path().to_path_buf(),
        )
        .with_role(self.role.clone())
        .plan(PlanRequest {
            request,
            analysis: Some(&analysis.analysis),
            active_file: active.as_deref(),
            files: plan_files,
        })
        .await?;

        Ok(PlanningOutcome { analysis, plan })
    }

    /// Plans, then alternates execute and recover until the work succeeds, a
    /// stop condition is hit, or `max_recovery_rounds` recovery plans have run.
    ///
    /// # Errors
    /// Returns an error only when planning the primary plan fails.
    pub async fn run(
        &self,
        request: &str,
        active_file: Option<&str>,
        surface: &dyn ApprovalSurface,
    ) -> Result<RunReport> {
        let planning = self.plan(request, active_file).await?;
        let executor = PlanExecutor::new(
            self.workspace.clone(),
            surface,
            self.config.execution.clone(),
        );
        let recovery = FailureRecovery::new(
            self.generation.clone(),
            self.workspace.clone(),
            self.config.context.clone(),
        );
        let max_rounds = self.config.execution.max_recovery_rounds;

        let mut rounds = Vec::new();
        let mut current = planning.plan.plan.clone();
        let mut round = 0;
        let stop = loop {
            tracing::info!(round, steps = current.steps.len(), "Executing plan");
            let execution = executor.execute(&current).await;

            if let Some(halt @ (HaltReason::ApprovalDenied { .. } | HaltReason::ApplyFailed { .. })) =
                execution.halted.clone()
            {
                rounds.push(RoundReport {
                    plan: current,
                    execution,
                    recovery: None,
                });
                break StopReason::Halted(halt);
            }

            let any_failed = execution
                .transcripts
                .iter()
                .any(|transcript| !transcript.succeeded());
            if any_failed && round >= max_rounds {
                rounds.push(RoundReport {
                    plan: current,
                    execution,
                    recovery: None,
                });
                break StopReason::RoundLimit;
            }

            let outcome = recovery
                .evaluate(RecoveryRequest {
                    request,
                    plan: &current,
                    transcripts: &execution.transcripts,
                })
                .await;
            let next = outcome.actionable_plan().cloned();
            let finished = match &outcome {
                RecoveryOutcome::NoActionNeeded => Some(StopReason::Completed),
                RecoveryOutcome::RecoveryProduced {
                    recoverable: false, ..
                } => Some(StopReason::NotRecoverable),
                RecoveryOutcome::RecoveryProduced { .. } if next.is_none() => {
                    Some(StopReason::EmptyRecoveryPlan)
                }
                RecoveryOutcome::RecoveryProduced { .. } => None,
            };
            rounds.push(RoundReport {
                plan: current,
                execution,
                recovery: Some(outcome),
            });

            match (finished, next) {
                (None, Some(plan)) => {
                    round += 1;
                    current = plan;
                }
                (Some(stop), _) => break stop,
                (None, None) => break StopReason::EmptyRecoveryPlan,
            }
        };

        tracing::info!(rounds = rounds.len(), "Run finished: {stop:?}");
        Ok(RunReport {
            planning,
            rounds,
            stop,
        })
    }

    async fn context_files<'path>(
        &self,
        paths: impl Iterator<Item = &'path str>,
    ) -> Vec<FileContext> {
        let mut unique = Vec::new();
        for path in paths {
            if !unique.contains(&path) {
                unique.push(path);
            }
        }
        self.workspace
            .read_context_files(unique, &self.config.context)
            .await
    }
}
