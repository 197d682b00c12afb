use cadence_core::{DEFAULT_PLAN_CONFIDENCE, ExecutionPlan, Operation};

use super::block::{BlockMap, BlockValue, parse_block};
use super::{
    ExpectedStructure, MalformedOutput, RepairCaller, Schema, SchemaFormat, parse_confidence_value,
};

/// Shape of one entry in the `steps` list.
const STEP_SHAPE: &str = "  - filePath: <workspace-relative path>
    priority: <integer, lower runs first>
    rationale: <why this step is needed>
    risks:
      - <item>
    agentInputs:
      - <item>
    operation:
      type: <create|modify|delete|rename|terminal>
      reason: <why>
      newPath: <rename target, rename only>
      dependencies:
        - <path>
      content: |
        <full file content, create and modify only>
      command: <shell command, terminal only>
      workingDirectory: <directory, terminal only>
      requiresApproval: <true|false, terminal only>
";

const PLAN_SECTIONS: &[&str] = &[
    "requiredFiles",
    "affectedFiles",
    "risks",
    "verificationSteps",
    "steps",
];

/// Expected structure of an execution plan.
pub static PLAN_STRUCTURE: ExpectedStructure = ExpectedStructure {
    caller: RepairCaller::PlanGenerator,
    format: SchemaFormat::IndentedBlock,
    sections: PLAN_SECTIONS,
    scalar_fields: &["taskType", "summary", "estimatedComplexity", "confidence"],
    fence_tags: &["plan", "yaml", "yml"],
    item_shape: Some(STEP_SHAPE),
};

/// Expected structure of a failure analysis: a plan plus a verdict.
pub static RECOVERY_STRUCTURE: ExpectedStructure = ExpectedStructure {
    caller: RepairCaller::FailureAnalyzer,
    format: SchemaFormat::IndentedBlock,
    sections: PLAN_SECTIONS,
    scalar_fields: &[
        "recoverable",
        "rationale",
        "taskType",
        "summary",
        "estimatedComplexity",
        "confidence",
    ],
    fence_tags: &["plan", "yaml", "yml"],
    item_shape: Some(STEP_SHAPE),
};

/// Plan as parsed, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPlan {
    /// Task type label, if the text carried one
    pub task_type: Option<String>,
    /// One-line summary
    pub summary: String,
    /// Complexity label, if the text carried one
    pub estimated_complexity: Option<String>,
    /// Confidence in [0, 1]
    pub confidence: f64,
    /// Read-only context files
    pub required_files: Vec<String>,
    /// Files the plan claims to touch
    pub affected_files: Vec<String>,
    /// Plan-level risks
    pub risks: Vec<String>,
    /// Verification steps
    pub verification_steps: Vec<String>,
    /// Steps in the order they appeared
    pub steps: Vec<RawStep>,
}

impl Default for RawPlan {
    fn default() -> Self {
        Self {
            task_type: None,
            summary: String::new(),
            estimated_complexity: None,
            confidence: DEFAULT_PLAN_CONFIDENCE,
            required_files: Vec::new(),
            affected_files: Vec::new(),
            risks: Vec::new(),
            verification_steps: Vec::new(),
            steps: Vec::new(),
        }
    }
}

/// Step as parsed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawStep {
    /// Target path, unnormalized
    pub file_path: Option<String>,
    /// Explicit priority
    pub priority: Option<i64>,
    /// Why the step exists
    pub rationale: String,
    /// Step risks
    pub risks: Vec<String>,
    /// Hints for the executor
    pub agent_inputs: Vec<String>,
    /// Operation; steps without one are dropped during normalization
    pub operation: Option<RawOperation>,
}

/// Operation as parsed; `kind` is not yet validated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawOperation {
    /// `create`, `modify`, `delete`, `rename`, `terminal` or anything else
    pub kind: String,
    /// Rename target
    pub new_path: Option<String>,
    /// File content
    pub content: Option<String>,
    /// Why
    pub reason: String,
    /// Dependency paths
    pub dependencies: Vec<String>,
    /// Shell command
    pub command: Option<String>,
    /// Command directory
    pub working_directory: Option<String>,
    /// Explicit approval flag
    pub requires_approval: Option<bool>,
}

/// Failure analysis as parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecovery {
    /// Whether the analyzer believes the failure can be fixed
    pub recoverable: bool,
    /// Why
    pub rationale: String,
    /// Corrective plan
    pub plan: RawPlan,
}

impl From<&ExecutionPlan> for RawPlan {
    fn from(plan: &ExecutionPlan) -> Self {
        Self {
            task_type: Some(plan.task_type.as_str().to_owned()),
            summary: plan.summary.clone(),
            estimated_complexity: Some(plan.estimated_complexity.to_string()),
            confidence: plan.confidence,
            required_files: plan.required_files.iter().cloned().collect(),
            affected_files: plan.affected_files.iter().cloned().collect(),
            risks: plan.risks.clone(),
            verification_steps: plan.verification_steps.clone(),
            steps: plan
                .steps
                .iter()
                .map(|step| RawStep {
                    file_path: Some(step.file_path.clone()),
                    priority: Some(step.priority),
                    rationale: step.rationale.clone(),
                    risks: step.risks.clone(),
                    agent_inputs: step.agent_inputs.clone(),
                    operation: Some(RawOperation::from(&step.operation)),
                })
                .collect(),
        }
    }
}

impl From<&Operation> for RawOperation {
    fn from(operation: &Operation) -> Self {
        let mut raw = Self {
            kind: operation.kind().to_owned(),
            ..Self::default()
        };
        if let Some(edit) = operation.file_edit() {
            raw.new_path.clone_from(&edit.new_path);
            raw.content.clone_from(&edit.content);
            raw.reason.clone_from(&edit.reason);
            raw.dependencies.clone_from(&edit.dependencies);
        }
        if let Some(command) = operation.terminal() {
            raw.command = Some(command.command.clone());
            raw.working_directory.clone_from(&command.working_directory);
            raw.requires_approval = Some(command.requires_approval);
        }
        raw
    }
}

/// Strict parser for execution plans.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanSchema;

impl Schema for PlanSchema {
    type Record = RawPlan;

    fn structure(&self) -> &'static ExpectedStructure {
        &PLAN_STRUCTURE
    }

    fn parse(&self, payload: &str) -> Result<RawPlan, MalformedOutput> {
        let document = parse_block(payload);
        if !has_plan_section(&document) {
            return Err(MalformedOutput::new(
                RepairCaller::PlanGenerator,
                "no top-level list section (requiredFiles, affectedFiles, risks, verificationSteps, steps)",
            ));
        }
        Ok(plan_from_map(&document))
    }
}

/// Strict parser for failure analyses.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecoverySchema;

impl Schema for RecoverySchema {
    type Record = RawRecovery;

    fn structure(&self) -> &'static ExpectedStructure {
        &RECOVERY_STRUCTURE
    }

    fn parse(&self, payload: &str) -> Result<RawRecovery, MalformedOutput> {
        let document = parse_block(payload);
        let verdict = document.scalar("recoverable").and_then(parse_bool);
        if verdict.is_none() && !has_plan_section(&document) {
            return Err(MalformedOutput::new(
                RepairCaller::FailureAnalyzer,
                "neither a recoverable verdict nor a plan section",
            ));
        }

        let plan = plan_from_map(&document);
        Ok(RawRecovery {
            recoverable: verdict.unwrap_or(!plan.steps.is_empty()),
            rationale: document
                .scalar("rationale")
                .map(str::to_owned)
                .unwrap_or_default(),
            plan,
        })
    }
}

fn has_plan_section(document: &BlockMap) -> bool {
    PLAN_SECTIONS.iter().any(|section| document.contains(section))
}

fn plan_from_map(document: &BlockMap) -> RawPlan {
    let steps = match document.get("steps") {
        Some(BlockValue::List(items)) => items
            .iter()
            .filter_map(BlockValue::as_map)
            .map(step_from_map)
            .collect(),
        Some(BlockValue::Scalar(_) | BlockValue::Map(_)) | None => Vec::new(),
    };

    RawPlan {
        task_type: document.scalar("taskType").map(str::to_owned),
        summary: document
            .scalar("summary")
            .map(str::to_owned)
            .unwrap_or_default(),
        estimated_complexity: document
            .scalar("estimatedComplexity")
            .or_else(|| document.scalar("complexity"))
            .map(str::to_owned),
        confidence: document
            .scalar("confidence")
            .and_then(parse_confidence_value)
            .unwrap_or(DEFAULT_PLAN_CONFIDENCE),
        required_files: document.list("requiredFiles"),
        affected_files: document.list("affectedFiles"),
        risks: document.list("risks"),
        verification_steps: document.list("verificationSteps"),
        steps,
    }
}

fn step_from_map(step: &BlockMap) -> RawStep {
    let operation = match step.get("operation") {
        Some(BlockValue::Map(operation)) => Some(operation_from_map(operation)),
        // `operation: delete` shorthand
        Some(BlockValue::Scalar(kind)) if !kind.trim().is_empty() => Some(RawOperation {
            kind: kind.trim().to_owned(),
            ..RawOperation::default()
        }),
        Some(BlockValue::Scalar(_) | BlockValue::List(_)) | None => None,
    };

    RawStep {
        file_path: step.scalar("filePath").map(str::to_owned),
        priority: step.scalar("priority").and_then(parse_priority),
        rationale: step
            .scalar("rationale")
            .map(str::to_owned)
            .unwrap_or_default(),
        risks: step.list("risks"),
        agent_inputs: step.list("agentInputs"),
        operation,
    }
}

fn operation_from_map(operation: &BlockMap) -> RawOperation {
    RawOperation {
        kind: operation
            .scalar("type")
            .or_else(|| operation.scalar("kind"))
            .unwrap_or_default()
            .to_owned(),
        new_path: operation.scalar("newPath").map(str::to_owned),
        // Content keeps its whitespace.
        content: operation
            .get("content")
            .and_then(BlockValue::as_scalar)
            .filter(|content| !content.is_empty())
            .map(str::to_owned),
        reason: operation
            .scalar("reason")
            .map(str::to_owned)
            .unwrap_or_default(),
        dependencies: operation.list("dependencies"),
        command: operation.scalar("command").map(str::to_owned),
        working_directory: operation.scalar("workingDirectory").map(str::to_owned),
        requires_approval: operation.scalar("requiresApproval").and_then(parse_bool),
    }
}

/// Accepts integers and integral floats.
pub(crate) fn parse_priority(text: &str) -> Option<i64> {
    let trimmed = text.trim();
    if let Ok(value) = trimmed.parse::<i64>() {
        return Some(value);
    }
    let value: f64 = trimmed.parse().ok()?;
    (value.is_finite() && value.fract() == 0.0).then_some(value as i64)
}

pub(crate) fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "y" | "1" => Some(true),
        "false" | "no" | "n" | "0" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WELL_FORMED: &str = "taskType: bug_fix
summary: Fix the off-by-one in the pager
estimatedComplexity: low
confidence: 0.85
requiredFiles:
  - src/lib.rs
affectedFiles:
  - src/pager.rs
risks:
  - Pagination tests may need updating
verificationSteps:
  - cargo test
steps:
  - filePath: src/pager.rs
    priority: 1
    rationale: Boundary check is wrong
    operation:
      type: modify
      reason: Use < instead of <=
      content: |
        pub fn last(len: usize) -> usize {
            len - 1
        }
  - filePath: .
    priority: 2
    rationale: Verify
    operation:
      type: terminal
      command: cargo test
      requiresApproval: false
";

    #[test]
    fn test_parses_well_formed_plan() {
        let Ok(plan) = PlanSchema.parse(WELL_FORMED) else {
            panic!("plan should parse");
        };
        assert_eq!(plan.task_type.as_deref(), Some("bug_fix"));
        assert_eq!(plan.estimated_complexity.as_deref(), Some("low"));
        assert!((plan.confidence - 0.85).abs() < f64::EPSILON);
        assert_eq!(plan.required_files, vec!["src/lib.rs"]);
        assert_eq!(plan.steps.len(), 2);

        let modify = plan.steps[0].operation.as_ref().expect("operation");
        assert_eq!(modify.kind, "modify");
        assert_eq!(
            modify.content.as_deref(),
            Some("pub fn last(len: usize) -> usize {\n    len - 1\n}\n")
        );

        let terminal = plan.steps[1].operation.as_ref().expect("operation");
        assert_eq!(terminal.command.as_deref(), Some("cargo test"));
        assert_eq!(terminal.requires_approval, Some(false));
    }

    #[test]
    fn test_structurally_empty_plan_is_malformed() {
        let result = PlanSchema.parse("summary: only a summary\nconfidence: 0.9");
        assert!(result.is_err());
        assert!(PlanSchema.parse("").is_err());
    }

    #[test]
    fn test_empty_steps_section_is_valid() {
        let Ok(plan) = PlanSchema.parse("summary: nothing to do\nsteps:\n") else {
            panic!("empty steps should parse");
        };
        assert!(plan.steps.is_empty());
        assert!((plan.confidence - DEFAULT_PLAN_CONFIDENCE).abs() < f64::EPSILON);
    }

    #[test]
    fn test_step_without_operation_kept_for_normalizer() {
        let Ok(plan) = PlanSchema.parse("steps:\n  - filePath: a.rs\n    priority: 1\n") else {
            panic!("plan should parse");
        };
        assert_eq!(plan.steps.len(), 1);
        assert!(plan.steps[0].operation.is_none());
    }

    #[test]
    fn test_operation_shorthand_and_priority_forms() {
        let text = "steps:\n  - filePath: old.rs\n    priority: 2.0\n    operation: delete\n  - filePath: x.rs\n    priority: soon\n    operation:\n      type: modify\n";
        let Ok(plan) = PlanSchema.parse(text) else {
            panic!("plan should parse");
        };
        assert_eq!(plan.steps[0].priority, Some(2));
        assert_eq!(
            plan.steps[0].operation.as_ref().map(|op| op.kind.as_str()),
            Some("delete")
        );
        assert_eq!(plan.steps[1].priority, None);
    }

    #[test]
    fn test_parse_response_prefers_plan_fence() {
        let raw = format!("Here you go:\n```rust\nfn x() {{}}\n```\n```plan\n{WELL_FORMED}```\nDone.");
        let Ok(plan) = PlanSchema.parse_response(&raw) else {
            panic!("fenced plan should parse");
        };
        assert_eq!(plan.steps.len(), 2);
    }

    #[test]
    fn test_recovery_verdict_and_default() {
        let Ok(recovery) =
            RecoverySchema.parse("recoverable: no\nrationale: Missing toolchain\n")
        else {
            panic!("verdict alone should parse");
        };
        assert!(!recovery.recoverable);
        assert_eq!(recovery.rationale, "Missing toolchain");

        let Ok(recovery) = RecoverySchema.parse(
            "rationale: fix import\nsteps:\n  - filePath: src/a.rs\n    operation:\n      type: modify\n",
        ) else {
            panic!("plan without verdict should parse");
        };
        assert!(recovery.recoverable);
        assert_eq!(recovery.plan.steps.len(), 1);

        assert!(RecoverySchema.parse("rationale: only prose").is_err());
    }

    #[test]
    fn test_bool_forms() {
        assert_eq!(parse_bool("Yes"), Some(true));
        assert_eq!(parse_bool("false"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
