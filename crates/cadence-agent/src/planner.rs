//! Plan generation: request and analysis in, validated [`ExecutionPlan`] out.

use std::path::PathBuf;

use cadence_core::{Error, ExecutionPlan, FileContext, Result, TaskAnalysis};

use crate::analyzer::describe_analysis;
use crate::generation::GenerationContext;
use crate::normalize::normalize_plan;
use crate::pipeline::{FallbackTier, LenientTier, TierKind};
use crate::schema::plan::PLAN_STRUCTURE;
use crate::schema::{PlanSchema, RawOperation, RawPlan, RawStep};

/// Inputs of one planning call.
#[derive(Debug, Clone, Default)]
pub struct PlanRequest<'req> {
    /// The user's request
    pub request: &'req str,
    /// Analysis made before planning, if any
    pub analysis: Option<&'req TaskAnalysis>,
    /// File the user is working in; the fallback plan targets it
    pub active_file: Option<&'req str>,
    /// Context files sent with the prompt
    pub files: Vec<FileContext>,
}

/// Validated plan with provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanResult {
    /// The plan
    pub plan: ExecutionPlan,
    /// Extraction tier that produced it
    pub tier: TierKind,
    /// Steps or fields dropped during normalization
    pub diagnostics: Vec<String>,
}

/// Produces execution plans.
#[derive(Clone)]
pub struct Planner {
    generation: GenerationContext,
    root: PathBuf,
    role: Option<String>,
}

impl Planner {
    /// Creates a planner for the workspace at `root`.
    pub const fn new(generation: GenerationContext, root: PathBuf) -> Self {
        Self {
            generation,
            root,
            role: None,
        }
    }

    /// Selects a role-specific repair example (for instance `terminal`).
    #[must_use]
    pub fn with_role(mut self, role: Option<String>) -> Self {
        self.role = role;
        self
    }

    /// Generates and validates a plan.
    ///
    /// # Errors
    /// Returns an error when the generation call fails, or [`Error::PlanEmpty`]
    /// when every tier fails, which happens when there is no active file to
    /// build a fallback around.
    pub async fn plan(&self, request: PlanRequest<'_>) -> Result<PlanResult> {
        let raw = self
            .generation
            .generate(
                "plan_generation",
                &PLAN_STRUCTURE,
                planning_prompt(&request),
                request.files,
            )
            .await?;

        let fallback = fallback_plan(
            request.request,
            request.active_file,
            self.generation.fallback_confidence(),
        );
        let outcome = self
            .generation
            .pipeline(PlanSchema, self.role.clone())
            .with_tier(LenientTier)
            .with_tier(FallbackTier::new(fallback))
            .run(&raw)
            .await?;

        let normalized = normalize_plan(&outcome.record, request.analysis, &self.root);
        for diagnostic in &normalized.diagnostics {
            tracing::warn!(
                tier = outcome.tier.as_str(),
                "Dropped plan content: {diagnostic}"
            );
        }

        // Salvaged plans must still carry a step after validation.
        let salvaged = matches!(outcome.tier, TierKind::Lenient | TierKind::Fallback);
        if salvaged && normalized.plan.is_empty() {
            return Err(Error::PlanEmpty(format!(
                "{} tier produced no valid steps",
                outcome.tier
            )));
        }

        tracing::info!(
            tier = outcome.tier.as_str(),
            steps = normalized.plan.steps.len(),
            confidence = normalized.plan.confidence,
            "Plan ready"
        );
        Ok(PlanResult {
            plan: normalized.plan,
            tier: outcome.tier,
            diagnostics: normalized.diagnostics,
        })
    }
}

fn planning_prompt(request: &PlanRequest<'_>) -> String {
    let mut prompt = format!("Request:\n{}\n", request.request.trim());
    if let Some(analysis) = request.analysis {
        prompt.push_str("\nAnalysis:\n");
        prompt.push_str(&describe_analysis(analysis));
    }
    if let Some(active) = request.active_file {
        prompt.push_str(&format!("\nActive file: {active}\n"));
    }
    prompt
}

/// Minimal plan that touches only the active file.
///
/// `None` when there is no active file.
#[must_use]
pub fn fallback_plan(request: &str, active_file: Option<&str>, confidence: f64) -> Option<RawPlan> {
    let path = active_file.map(str::trim).filter(|path| !path.is_empty())?;
    let summary = request.lines().next().unwrap_or_default().trim().to_owned();
    Some(RawPlan {
        summary: summary.clone(),
        confidence,
        risks: vec![
            "Generated without a usable model plan; review the change before applying it"
                .to_owned(),
        ],
        steps: vec![RawStep {
            file_path: Some(path.to_owned()),
            priority: Some(1),
            rationale: format!("Fallback: apply the request to the active file: {summary}"),
            operation: Some(RawOperation {
                kind: "modify".to_owned(),
                reason: summary,
                ..RawOperation::default()
            }),
            ..RawStep::default()
        }],
        ..RawPlan::default()
    })
}
