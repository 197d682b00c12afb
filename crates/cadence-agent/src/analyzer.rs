//! Task analysis: the first collaborator call of every request.

use cadence_core::{FileContext, Result, TaskAnalysis};

use crate::generation::GenerationContext;
use crate::pipeline::{FallbackTier, TierKind};
use crate::schema::markdown::ANALYSIS_STRUCTURE;
use crate::schema::AnalysisSchema;

/// Analysis plus the tier that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisResult {
    /// Parsed analysis
    pub analysis: TaskAnalysis,
    /// Extraction tier that succeeded
    pub tier: TierKind,
}

/// Interprets a request as a [`TaskAnalysis`].
#[derive(Clone)]
pub struct TaskAnalyzer {
    generation: GenerationContext,
    role: Option<String>,
}

impl TaskAnalyzer {
    /// Creates an analyzer.
    pub const fn new(generation: GenerationContext) -> Self {
        Self {
            generation,
            role: None,
        }
    }

    /// Selects a role-specific repair example (for instance `reviewer`).
    #[must_use]
    pub fn with_role(mut self, role: Option<String>) -> Self {
        self.role = role;
        self
    }

    /// Analyzes `request` with the given context files.
    ///
    /// # Errors
    /// Returns an error only when the generation call itself fails; malformed
    /// responses degrade through the tiers down to a fallback built from the request.
    pub async fn analyze(&self, request: &str, files: Vec<FileContext>) -> Result<AnalysisResult> {
        let raw = self
            .generation
            .generate(
                "task_analysis",
                &ANALYSIS_STRUCTURE,
                request.to_owned(),
                files,
            )
            .await?;

        let fallback = TaskAnalysis {
            summary: request.trim().to_owned(),
            confidence: self.generation.fallback_confidence(),
            ..TaskAnalysis::default()
        };
        let outcome = self
            .generation
            .pipeline(AnalysisSchema, self.role.clone())
            .with_tier(FallbackTier::new(Some(fallback)))
            .run(&raw)
            .await?;

        Ok(AnalysisResult {
            analysis: outcome.record,
            tier: outcome.tier,
        })
    }
}

/// Renders an analysis as plain text for the planning prompt.
#[must_use]
pub fn describe_analysis(analysis: &TaskAnalysis) -> String {
    let mut out = format!(
        "Summary: {}\nTask type: {}\nComplexity: {}\n",
        analysis.summary, analysis.task_type, analysis.complexity
    );
    if !analysis.required_files.is_empty() {
        out.push_str(&format!(
            "Required files: {}\n",
            analysis.required_files.join(", ")
        ));
    }
    if !analysis.affected_files.is_empty() {
        out.push_str(&format!(
            "Affected files: {}\n",
            analysis.affected_files.join(", ")
        ));
    }
    for finding in &analysis.findings {
        let location = finding
            .location
            .as_deref()
            .map(|location| format!(" ({location})"))
            .unwrap_or_default();
        out.push_str(&format!(
            "Finding [{:?}] {}{location}: {}\n",
            finding.severity, finding.title, finding.detail
        ));
    }
    for recommendation in &analysis.recommendations {
        out.push_str(&format!("Recommendation: {recommendation}\n"));
    }
    out
}
