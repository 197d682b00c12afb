//! Context-aware structural repair.
//!
//! A repair is one extra model call that asks for the same content in the
//! shape the caller's parser expects. The instruction embeds the caller's
//! [`ExpectedStructure`] and a worked example chosen by caller and role.

use std::sync::Arc;

use cadence_core::prompts::{load_prompt, render_prompt};
use cadence_core::{Context, Error, GenerationConfig, ModelProvider, Query, Result};

use crate::schema::{ExpectedStructure, RepairCaller};

/// Sampling temperature used when the configuration does not override it.
pub const DEFAULT_REPAIR_TEMPERATURE: f32 = 0.1;

const ANALYSIS_EXAMPLE: &str = "## Summary
Add retry handling to the HTTP client.

## Task Type
feature_add

## Complexity
medium

## Required Files
- `src/config.rs`

## Affected Files
- `src/client.rs`

## Findings
### Medium
Title: Requests are not retried
Location: src/client.rs:42
Detail: A single transient failure aborts the whole sync.

## Recommendations
- Wrap `send` in a bounded retry loop

**Confidence:** 0.85";

const REVIEW_EXAMPLE: &str = "## Summary
Review of the session store.

## Task Type
security

## Findings
### Critical
Title: Session ids are predictable
Location: src/session.rs:18
Detail: Ids come from a counter instead of a random source.

### Low
Title: Unused import
Location: src/session.rs:3
Detail: `std::fmt` is imported but never used.

## Recommendations
- Generate ids with a v4 UUID

**Confidence:** 0.9";

const PLAN_EXAMPLE: &str = "```plan
taskType: bug_fix
summary: Guard against an empty list in average()
estimatedComplexity: low
confidence: 0.8
requiredFiles:
  - src/lib.rs
affectedFiles:
  - src/stats.rs
risks:
  - Callers relying on the panic will now get None
verificationSteps:
  - cargo test stats
steps:
  - filePath: src/stats.rs
    priority: 1
    rationale: average() divides by zero on empty input
    operation:
      type: modify
      reason: Return None for empty input
      content: |
        pub fn average(values: &[f64]) -> Option<f64> {
            if values.is_empty() {
                return None;
            }
            Some(values.iter().sum::<f64>() / values.len() as f64)
        }
  - filePath: .
    priority: 2
    rationale: Confirm the fix
    operation:
      type: terminal
      command: cargo test stats
      requiresApproval: false
```";

const TERMINAL_EXAMPLE: &str = "```plan
taskType: testing
summary: Run the test suite and the linter
confidence: 0.9
verificationSteps:
  - Both commands exit with status 0
steps:
  - filePath: .
    priority: 1
    rationale: Run the tests
    operation:
      type: terminal
      command: cargo test --workspace
      workingDirectory: .
      requiresApproval: false
  - filePath: .
    priority: 2
    rationale: Run the linter
    operation:
      type: terminal
      command: cargo clippy --workspace
      requiresApproval: false
```";

const RECOVERY_EXAMPLE: &str = "```plan
recoverable: true
rationale: The test failed because parse_port is not exported from the crate root.
taskType: bug_fix
summary: Export parse_port and rerun the failing test
confidence: 0.75
risks:
  - The export widens the public API
steps:
  - filePath: src/lib.rs
    priority: 1
    rationale: The test imports parse_port from the crate root
    operation:
      type: modify
      reason: Add pub use for parse_port
      content: |
        mod net;

        pub use net::parse_port;
  - filePath: .
    priority: 2
    rationale: Rerun the test that failed
    operation:
      type: terminal
      command: cargo test parse_port
      requiresApproval: false
```";

/// Who needs a repair and what they expect back.
#[derive(Debug, Clone, Copy)]
pub struct RepairContext<'role> {
    /// Subsystem that produced the malformed text
    pub caller: RepairCaller,
    /// Optional narrower role, selecting a more specific example
    pub role: Option<&'role str>,
    /// Structure the caller's parser accepts
    pub expected: &'static ExpectedStructure,
}

impl<'role> RepairContext<'role> {
    /// Creates a context for the descriptor's own caller.
    pub const fn new(expected: &'static ExpectedStructure) -> Self {
        Self {
            caller: expected.caller,
            role: None,
            expected,
        }
    }

    /// Narrows the worked example by role.
    #[must_use]
    pub const fn with_role(mut self, role: Option<&'role str>) -> Self {
        self.role = role;
        self
    }
}

/// Returns the worked example for a caller and optional role.
///
/// Unknown roles fall back to the caller's default example.
#[must_use]
pub fn worked_example(caller: RepairCaller, role: Option<&str>) -> &'static str {
    let role = role.map(str::to_ascii_lowercase);
    match (caller, role.as_deref()) {
        (RepairCaller::TaskAnalyzer, Some("reviewer" | "review")) => REVIEW_EXAMPLE,
        (RepairCaller::TaskAnalyzer, _) => ANALYSIS_EXAMPLE,
        (RepairCaller::PlanGenerator, Some("terminal" | "verification")) => TERMINAL_EXAMPLE,
        (RepairCaller::PlanGenerator, _) => PLAN_EXAMPLE,
        (RepairCaller::FailureAnalyzer, _) => RECOVERY_EXAMPLE,
    }
}

/// Builds the repair instruction for a context.
///
/// # Errors
/// Returns an error if the embedded repair prompt cannot be loaded.
pub fn build_repair_prompt(context: &RepairContext<'_>) -> Result<String> {
    let template = load_prompt("repair").map_err(Error::Prompt)?;
    let caller = context.caller.to_string();
    let structure = context.expected.render();
    Ok(render_prompt(
        &template,
        &[
            ("caller", &caller),
            ("structure", &structure),
            ("example", worked_example(context.caller, context.role)),
        ],
    ))
}

/// Issues structural repair requests to a model provider.
#[derive(Clone)]
pub struct RepairCollaborator {
    provider: Arc<dyn ModelProvider>,
    temperature: f32,
}

impl RepairCollaborator {
    /// Creates a collaborator that repairs at the given temperature.
    pub fn new(provider: Arc<dyn ModelProvider>, temperature: f32) -> Self {
        Self {
            provider,
            temperature,
        }
    }

    /// Sampling temperature of repair calls.
    pub const fn temperature(&self) -> f32 {
        self.temperature
    }

    /// Sends one repair request and returns the raw repaired text.
    ///
    /// The result is not parsed here; the caller extracts and re-parses it once.
    ///
    /// # Errors
    /// Returns the provider error unchanged when the call fails.
    pub async fn repair(&self, context: &RepairContext<'_>, malformed: &str) -> Result<String> {
        let system_prompt = build_repair_prompt(context)?;
        let query = Query::new(malformed)
            .with_generation(GenerationConfig::deterministic(self.temperature));

        tracing::debug!(
            caller = context.caller.as_str(),
            role = context.role.unwrap_or("default"),
            input_chars = malformed.len(),
            "Requesting structural repair"
        );

        let response = self
            .provider
            .generate(&query, &Context::new(system_prompt))
            .await?;
        Ok(response.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::markdown::ANALYSIS_STRUCTURE;
    use crate::schema::plan::{PLAN_STRUCTURE, RECOVERY_STRUCTURE};
    use crate::schema::{AnalysisSchema, PlanSchema, RecoverySchema, Schema as _};
    use cadence_providers::MockProvider;

    #[test]
    fn test_examples_parse_with_their_schemas() {
        assert!(AnalysisSchema.parse_response(ANALYSIS_EXAMPLE).is_ok());
        assert!(AnalysisSchema.parse_response(REVIEW_EXAMPLE).is_ok());
        assert!(PlanSchema.parse_response(PLAN_EXAMPLE).is_ok());
        assert!(PlanSchema.parse_response(TERMINAL_EXAMPLE).is_ok());
        assert!(RecoverySchema.parse_response(RECOVERY_EXAMPLE).is_ok());
    }

    #[test]
    fn test_example_selection_by_role() {
        assert_eq!(
            worked_example(RepairCaller::TaskAnalyzer, Some("Reviewer")),
            REVIEW_EXAMPLE
        );
        assert_eq!(
            worked_example(RepairCaller::TaskAnalyzer, Some("unknown")),
            ANALYSIS_EXAMPLE
        );
        assert_eq!(
            worked_example(RepairCaller::PlanGenerator, Some("terminal")),
            TERMINAL_EXAMPLE
        );
        assert_eq!(
            worked_example(RepairCaller::FailureAnalyzer, None),
            RECOVERY_EXAMPLE
        );
    }

    #[test]
    fn test_prompt_carries_structure_and_rules() {
        let prompt = build_repair_prompt(&RepairContext::new(&PLAN_STRUCTURE))
            .expect("repair prompt should build");
        assert!(prompt.contains("plan generator"));
        assert!(prompt.contains("steps:\n  - filePath:"));
        assert!(prompt.contains("Preserve all content"));
        assert!(!prompt.contains("{{"));

        let recovery = build_repair_prompt(&RepairContext::new(&RECOVERY_STRUCTURE))
            .expect("repair prompt should build");
        assert!(recovery.contains("recoverable: true"));
    }

    #[tokio::test]
    async fn test_repair_sends_low_temperature_request() {
        let provider = Arc::new(MockProvider::new().with_default_response("## Summary\nfixed"));
        let model = Arc::clone(&provider) as Arc<dyn ModelProvider>;
        let collaborator = RepairCollaborator::new(model, DEFAULT_REPAIR_TEMPERATURE);

        let repaired = collaborator
            .repair(&RepairContext::new(&ANALYSIS_STRUCTURE), "Summary: broken")
            .await
            .expect("mock repair should succeed");
        assert_eq!(repaired, "## Summary\nfixed");

        let calls = provider.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].query, "Summary: broken");
        assert_eq!(calls[0].temperature, Some(DEFAULT_REPAIR_TEMPERATURE));
        assert!(calls[0].system_prompt.contains("task analyzer"));
    }

    #[tokio::test]
    async fn test_repair_failure_is_returned() {
        let collaborator =
            RepairCollaborator::new(Arc::new(MockProvider::new().failing()), 0.1);
        let result = collaborator
            .repair(&RepairContext::new(&PLAN_STRUCTURE), "junk")
            .await;
        assert!(matches!(result, Err(Error::Provider(_))));
    }
}
