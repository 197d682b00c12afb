//! Execution plan data model.
//!
//! An [`ExecutionPlan`] is the canonical, validated form of whatever the model
//! produced. Plans are only ever built by the normalizer in `cadence-agent`;
//! the types here carry no validation logic beyond lenient enum lookups.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Confidence assigned to a plan whose source text carried none.
pub const DEFAULT_PLAN_CONFIDENCE: f64 = 0.7;

/// Category of work a request asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Write new code from scratch
    CodeGeneration,
    /// Restructure existing code without behavior change
    Refactoring,
    /// Fix incorrect behavior
    BugFix,
    /// Extend existing code with a new capability
    FeatureAdd,
    /// Write or update documentation
    Documentation,
    /// Add or repair tests
    Testing,
    /// Improve performance or resource use
    Optimization,
    /// Address a security concern
    Security,
    /// Anything not covered above
    #[default]
    General,
}

impl TaskType {
    /// All variants, in declaration order.
    pub const ALL: [Self; 9] = [
        Self::CodeGeneration,
        Self::Refactoring,
        Self::BugFix,
        Self::FeatureAdd,
        Self::Documentation,
        Self::Testing,
        Self::Optimization,
        Self::Security,
        Self::General,
    ];

    /// Canonical `snake_case` label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CodeGeneration => "code_generation",
            Self::Refactoring => "refactoring",
            Self::BugFix => "bug_fix",
            Self::FeatureAdd => "feature_add",
            Self::Documentation => "documentation",
            Self::Testing => "testing",
            Self::Optimization => "optimization",
            Self::Security => "security",
            Self::General => "general",
        }
    }

    /// Case-insensitive lookup that tolerates spaces, hyphens and quotes.
    ///
    /// Returns `None` when the label matches no variant.
    #[must_use]
    pub fn from_label(raw: &str) -> Option<Self> {
        let key = canonical_label(raw);
        Self::ALL.into_iter().find(|variant| variant.as_str() == key)
    }

    /// Lenient coercion: unknown labels become [`TaskType::General`].
    #[must_use]
    pub fn coerce(raw: &str) -> Self {
        Self::from_label(raw).unwrap_or(Self::General)
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Advisory size estimate of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    /// Small, local change
    Low,
    /// Touches a handful of files
    #[default]
    Medium,
    /// Cross-cutting change
    High,
}

impl Complexity {
    /// Lenient lookup; unknown labels become [`Complexity::Medium`].
    #[must_use]
    pub fn coerce(raw: &str) -> Self {
        match canonical_label(raw).as_str() {
            "low" | "simple" | "trivial" => Self::Low,
            "high" | "complex" | "hard" => Self::High,
            _ => Self::Medium,
        }
    }
}

impl fmt::Display for Complexity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// Payload shared by the four file-touching operations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEdit {
    /// Destination path (rename only)
    pub new_path: Option<String>,
    /// Full new file content (create/modify)
    pub content: Option<String>,
    /// Why this change is needed
    pub reason: String,
    /// Other workspace files this change relies on
    pub dependencies: Vec<String>,
}

/// A shell command the plan wants to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalCommand {
    /// Command line passed to the shell
    pub command: String,
    /// Workspace-relative directory; `None` means the workspace root
    pub working_directory: Option<String>,
    /// Whether a human must approve the command before it runs
    pub requires_approval: bool,
}

impl TerminalCommand {
    /// Creates a command that runs at the workspace root and requires approval.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            working_directory: None,
            requires_approval: true,
        }
    }
}

/// What a planned change does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operation {
    /// Create a new file
    Create(FileEdit),
    /// Overwrite or edit an existing file
    Modify(FileEdit),
    /// Remove a file
    Delete(FileEdit),
    /// Move a file to `new_path`
    Rename(FileEdit),
    /// Run a shell command; never counted as an affected file
    Terminal(TerminalCommand),
}

impl Operation {
    /// Returns true for shell commands.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal(_))
    }

    /// Lower-case operation label as it appears in plan text.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Create(_) => "create",
            Self::Modify(_) => "modify",
            Self::Delete(_) => "delete",
            Self::Rename(_) => "rename",
            Self::Terminal(_) => "terminal",
        }
    }

    /// File payload, if this is a file operation.
    #[must_use]
    pub const fn file_edit(&self) -> Option<&FileEdit> {
        match self {
            Self::Create(edit) | Self::Modify(edit) | Self::Delete(edit) | Self::Rename(edit) => {
                Some(edit)
            }
            Self::Terminal(_) => None,
        }
    }

    /// Command payload, if this is a terminal operation.
    #[must_use]
    pub const fn terminal(&self) -> Option<&TerminalCommand> {
        match self {
            Self::Terminal(command) => Some(command),
            _ => None,
        }
    }
}

/// One step of an execution plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedChange {
    /// Workspace-relative path this step targets
    pub file_path: String,
    /// What the step does
    pub operation: Operation,
    /// Ascending order of execution; ties keep their original order
    pub priority: i64,
    /// Why the step is part of the plan
    pub rationale: String,
    /// Step-specific risks
    pub risks: Vec<String>,
    /// Free-form hints for whoever carries out the step
    pub agent_inputs: Vec<String>,
}

impl PlannedChange {
    /// Creates a step with empty rationale and no risks.
    pub fn new(file_path: impl Into<String>, operation: Operation, priority: i64) -> Self {
        Self {
            file_path: file_path.into(),
            operation,
            priority,
            rationale: String::new(),
            risks: Vec::new(),
            agent_inputs: Vec::new(),
        }
    }
}

/// The canonical, validated set of ordered operations derived from a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    /// Category of the task
    pub task_type: TaskType,
    /// One-line human-readable description
    pub summary: String,
    /// Steps in execution order
    pub steps: Vec<PlannedChange>,
    /// Read-only context files
    pub required_files: BTreeSet<String>,
    /// Files created, modified, deleted or renamed by this plan
    pub affected_files: BTreeSet<String>,
    /// Advisory size estimate
    pub estimated_complexity: Complexity,
    /// Plan-level risks
    pub risks: Vec<String>,
    /// How to check the plan worked
    pub verification_steps: Vec<String>,
    /// Confidence in [0, 1]
    pub confidence: f64,
}

impl Default for ExecutionPlan {
    fn default() -> Self {
        Self {
            task_type: TaskType::General,
            summary: String::new(),
            steps: Vec::new(),
            required_files: BTreeSet::new(),
            affected_files: BTreeSet::new(),
            estimated_complexity: Complexity::Medium,
            risks: Vec::new(),
            verification_steps: Vec::new(),
            confidence: DEFAULT_PLAN_CONFIDENCE,
        }
    }
}

impl ExecutionPlan {
    /// Returns true when the plan has no steps (a valid no-op).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Steps that run shell commands.
    pub fn terminal_steps(&self) -> impl Iterator<Item = &PlannedChange> {
        self.steps.iter().filter(|step| step.operation.is_terminal())
    }

    /// Steps that touch files.
    pub fn file_steps(&self) -> impl Iterator<Item = &PlannedChange> {
        self.steps.iter().filter(|step| !step.operation.is_terminal())
    }
}

impl fmt::Display for ExecutionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "[{}] {} (confidence {:.2}, complexity {})",
            self.task_type, self.summary, self.confidence, self.estimated_complexity
        )?;
        for (index, step) in self.steps.iter().enumerate() {
            match &step.operation {
                Operation::Terminal(command) => writeln!(
                    f,
                    "  {}. [p{}] terminal: {}",
                    index + 1,
                    step.priority,
                    command.command
                )?,
                Operation::Rename(edit) => writeln!(
                    f,
                    "  {}. [p{}] rename: {} -> {}",
                    index + 1,
                    step.priority,
                    step.file_path,
                    edit.new_path.as_deref().unwrap_or("?")
                )?,
                operation => writeln!(
                    f,
                    "  {}. [p{}] {}: {}",
                    index + 1,
                    step.priority,
                    operation.kind(),
                    step.file_path
                )?,
            }
        }
        for risk in &self.risks {
            writeln!(f, "  risk: {risk}")?;
        }
        Ok(())
    }
}

/// Lower-cases and maps separators to underscores, dropping quotes and backticks.
fn canonical_label(raw: &str) -> String {
    raw.trim()
        .trim_matches(|ch: char| matches!(ch, '"' | '\'' | '`' | '*'))
        .trim()
        .to_lowercase()
        .replace([' ', '-'], "_")
}
