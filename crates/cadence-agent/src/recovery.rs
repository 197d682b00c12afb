//! Failure recovery: decides what to do after terminal steps fail.
//!
//! Evaluation has two outcomes. When every transcript succeeded nothing is
//! asked of the model. Otherwise the failed transcripts go through the
//! recovery pipeline and come back as an independently validated plan, or as
//! a "cannot determine" verdict when the model could not be reached.

use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

use cadence_core::{CommandTranscript, ContextConfig, ExecutionPlan};

use crate::generation::GenerationContext;
use crate::normalize::{normalize_path, normalize_plan};
use crate::pipeline::{FallbackTier, TierKind};
use crate::schema::plan::RECOVERY_STRUCTURE;
use crate::schema::{RawPlan, RawRecovery, RecoverySchema};
use crate::workspace::Workspace;

static MENTIONED_PATH: LazyLock<Regex> = LazyLock::new(|| {
    match Regex::new(r"(?:[A-Za-z0-9_.\-]+/)*[A-Za-z0-9_\-]+\.[A-Za-z][A-Za-z0-9]*") {
        Ok(regex) => regex,
        Err(err) => panic!("Mentioned path regex is invalid: {err}"),
    }
});

const UNPARSEABLE_RATIONALE: &str = "could not parse failure analysis";

/// Result of evaluating an executed plan.
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryOutcome {
    /// Every command succeeded
    NoActionNeeded,
    /// At least one command failed
    RecoveryProduced {
        /// Validated corrective plan; empty when there is nothing to do
        plan: ExecutionPlan,
        /// Whether the failure is believed fixable
        recoverable: bool,
        /// Explanation, or the collaborator error text
        rationale: String,
        /// Extraction tier, `None` when the collaborator call failed
        tier: Option<TierKind>,
    },
}

impl RecoveryOutcome {
    /// The corrective plan, when one exists and is worth running.
    #[must_use]
    pub fn actionable_plan(&self) -> Option<&ExecutionPlan> {
        match self {
            Self::RecoveryProduced {
                plan,
                recoverable: true,
                ..
            } if !plan.is_empty() => Some(plan),
            Self::NoActionNeeded | Self::RecoveryProduced { .. } => None,
        }
    }
}

/// What was run, and how it went.
#[derive(Debug, Clone, Copy)]
pub struct RecoveryRequest<'req> {
    /// Original user request
    pub request: &'req str,
    /// Plan that was executed
    pub plan: &'req ExecutionPlan,
    /// One transcript per executed terminal step
    pub transcripts: &'req [CommandTranscript],
}

/// Evaluates executed plans and plans corrections.
#[derive(Clone)]
pub struct FailureRecovery {
    generation: GenerationContext,
    workspace: Workspace,
    limits: ContextConfig,
}

impl FailureRecovery {
    /// Creates an evaluator rooted at `workspace`.
    pub fn new(generation: GenerationContext, workspace: Workspace, limits: ContextConfig) -> Self {
        Self {
            generation,
            workspace,
            limits,
        }
    }

    /// Evaluates an executed plan. Never fails: a collaborator error becomes a
    /// non-recoverable outcome carrying the error text.
    pub async fn evaluate(&self, request: RecoveryRequest<'_>) -> RecoveryOutcome {
        let failed: Vec<&CommandTranscript> = request
            .transcripts
            .iter()
            .filter(|transcript| !transcript.succeeded())
            .collect();
        if failed.is_empty() {
            tracing::debug!(
                "All {} commands succeeded; no recovery needed",
                request.transcripts.len()
            );
            return RecoveryOutcome::NoActionNeeded;
        }

        tracing::info!("Evaluating {} failed commands", failed.len());
        let mentioned = mentioned_files(request.plan, &failed);
        let files = self
            .workspace
            .read_context_files(mentioned.iter().map(String::as_str), &self.limits)
            .await;

        let raw = match self
            .generation
            .generate(
                "failure_analysis",
                &RECOVERY_STRUCTURE,
                self.recovery_prompt(&request, &failed),
                files,
            )
            .await
        {
            Ok(raw) => raw,
            Err(err) => return cannot_determine(&err.to_string()),
        };

        let fallback = RawRecovery {
            recoverable: false,
            rationale: UNPARSEABLE_RATIONALE.to_owned(),
            plan: RawPlan::default(),
        };
        let outcome = match self
            .generation
            .pipeline(RecoverySchema, None)
            .with_tier(FallbackTier::new(Some(fallback)))
            .run(&raw)
            .await
        {
            Ok(outcome) => outcome,
            Err(err) => return cannot_determine(&err.to_string()),
        };

        let mut raw_plan = outcome.record.plan;
        if raw_plan.task_type.is_none() {
            raw_plan.task_type = Some(request.plan.task_type.as_str().to_owned());
        }
        let normalized = normalize_plan(&raw_plan, None, self.workspace.root_path());
        for diagnostic in &normalized.diagnostics {
            tracing::warn!("Dropped recovery plan content: {diagnostic}");
        }

        tracing::info!(
            tier = outcome.tier.as_str(),
            recoverable = outcome.record.recoverable,
            steps = normalized.plan.steps.len(),
            "Recovery evaluated"
        );
        RecoveryOutcome::RecoveryProduced {
            plan: normalized.plan,
            recoverable: outcome.record.recoverable,
            rationale: outcome.record.rationale,
            tier: Some(outcome.tier),
        }
    }

    fn recovery_prompt(
        &self,
        request: &RecoveryRequest<'_>,
        failed: &[&CommandTranscript],
    ) -> String {
        let mut prompt = format!(
            "Original request:\n{}\n\nExecuted plan:\n{}\nFailed commands:\n",
            request.request.trim(),
            request.plan
        );
        for transcript in failed {
            prompt.push('\n');
            prompt.push_str(&transcript.render(self.limits.max_file_chars));
        }
        prompt
    }
}

fn cannot_determine(reason: &str) -> RecoveryOutcome {
    tracing::warn!("Failure analysis unavailable: {reason}");
    RecoveryOutcome::RecoveryProduced {
        plan: ExecutionPlan::default(),
        recoverable: false,
        rationale: reason.to_owned(),
        tier: None,
    }
}

/// Files worth showing the model: paths named in failed output first, then the
/// plan's own files. Deduplicated, in first-seen order.
#[must_use]
pub fn mentioned_files(plan: &ExecutionPlan, failed: &[&CommandTranscript]) -> Vec<String> {
    let mut files = Vec::new();
    let mut push = |path: String| {
        if !path.is_empty() && path != "." && !files.contains(&path) {
            files.push(path);
        }
    };

    for transcript in failed {
        for text in [&transcript.stderr, &transcript.stdout] {
            for found in MENTIONED_PATH.find_iter(text) {
                push(normalize_path(found.as_str(), Path::new("")));
            }
        }
    }
    for path in plan.affected_files.iter().chain(&plan.required_files) {
        push(path.clone());
    }
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::{ModelProvider, PipelineConfig};
    use cadence_providers::MockProvider;
    use std::sync::Arc;
    use tempfile::TempDir;

    const RECOVERY_PLAN: &str = "```plan
recoverable: true
rationale: Missing export
summary: Export the function
steps:
  - filePath: src/lib.rs
    operation:
      type: modify
      content: |
        pub use net::parse_port;
  - filePath: .
    operation:
      type: terminal
      command: cargo test
```";

    fn transcript(command: &str, exit_code: i32, stderr: &str) -> CommandTranscript {
        CommandTranscript {
            command: command.to_owned(),
            exit_code,
            stdout: String::new(),
            stderr: stderr.to_owned(),
            duration_ms: 5,
            timed_out: false,
        }
    }

    fn recovery(provider: &Arc<MockProvider>, root: &TempDir) -> FailureRecovery {
        FailureRecovery::new(
            GenerationContext::new(
                Arc::clone(provider) as Arc<dyn ModelProvider>,
                &PipelineConfig::default(),
            ),
            Workspace::new(root.path().to_path_buf()),
            ContextConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_all_success_makes_no_call() {
        let tmp_dir = TempDir::new().expect("create temp dir");
        let provider = Arc::new(MockProvider::new().with_default_response(RECOVERY_PLAN));
        let transcripts = [transcript("cargo build", 0, ""), transcript("cargo test", 0, "")];
        let plan = ExecutionPlan::default();

        let outcome = recovery(&provider, &tmp_dir)
            .evaluate(RecoveryRequest {
                request: "fix",
                plan: &plan,
                transcripts: &transcripts,
            })
            .await;

        assert_eq!(outcome, RecoveryOutcome::NoActionNeeded);
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_commands_produce_validated_plan() {
        let tmp_dir = TempDir::new().expect("create temp dir");
        let provider = Arc::new(MockProvider::new().with_default_response(RECOVERY_PLAN));
        let transcripts = [
            transcript("cargo build", 0, ""),
            transcript("cargo test", 101, "error[E0432]: unresolved import"),
        ];
        let plan = ExecutionPlan::default();

        let outcome = recovery(&provider, &tmp_dir)
            .evaluate(RecoveryRequest {
                request: "fix",
                plan: &plan,
                transcripts: &transcripts,
            })
            .await;

        let RecoveryOutcome::RecoveryProduced {
            plan,
            recoverable,
            rationale,
            tier,
        } = outcome
        else {
            panic!("expected a recovery plan");
        };
        assert!(recoverable);
        assert_eq!(rationale, "Missing export");
        assert_eq!(tier, Some(TierKind::Strict));
        assert_eq!(plan.steps.len(), 2);
        assert!(plan.affected_files.contains("src/lib.rs"));
        assert!(!plan.affected_files.contains("."));
        let command = plan.steps[1].operation.terminal().expect("terminal step");
        assert_eq!(command.working_directory, None);

        let calls = provider.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].query.contains("$ cargo test"));
        assert!(!calls[0].query.contains("$ cargo build"));
    }

    #[tokio::test]
    async fn test_unreachable_collaborator_cannot_determine() {
        let tmp_dir = TempDir::new().expect("create temp dir");
        let provider = Arc::new(MockProvider::new().failing());
        let transcripts = [transcript("exit 1", 1, "")];
        let plan = ExecutionPlan::default();

        let outcome = recovery(&provider, &tmp_dir)
            .evaluate(RecoveryRequest {
                request: "fix",
                plan: &plan,
                transcripts: &transcripts,
            })
            .await;

        let RecoveryOutcome::RecoveryProduced {
            plan,
            recoverable,
            rationale,
            tier,
        } = outcome
        else {
            panic!("expected a verdict");
        };
        assert!(!recoverable);
        assert!(plan.is_empty());
        assert!(!rationale.is_empty());
        assert_eq!(tier, None);
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_unparseable_answer_falls_back() {
        let tmp_dir = TempDir::new().expect("create temp dir");
        let provider = Arc::new(MockProvider::new().with_default_response("shrug"));
        let transcripts = [transcript("exit 1", 1, "")];
        let plan = ExecutionPlan::default();

        let outcome = recovery(&provider, &tmp_dir)
            .evaluate(RecoveryRequest {
                request: "fix",
                plan: &plan,
                transcripts: &transcripts,
            })
            .await;

        assert!(outcome.actionable_plan().is_none());
        assert!(matches!(
            outcome,
            RecoveryOutcome::RecoveryProduced {
                recoverable: false,
                tier: Some(TierKind::Fallback),
                ..
            }
        ));
        // generation + one repair
        assert_eq!(provider.call_count(), 2);
    }

    #[test]
    fn test_mentioned_files_from_output_and_plan() {
        let mut plan = ExecutionPlan::default();
        plan.affected_files.insert("src/net.rs".to_owned());
        plan.required_files.insert("Cargo.toml".to_owned());
        let failed = transcript(
            "cargo test",
            101,
            "error: --> src/lib.rs:4:9\nerror: --> src/net.rs:1:1",
        );

        let files = mentioned_files(&plan, &[&failed]);
        assert_eq!(files, vec!["src/lib.rs", "src/net.rs", "Cargo.toml"]);
    }
}
