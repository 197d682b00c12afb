//! Turns a parsed plan from any tier into a canonical [`ExecutionPlan`].
//!
//! Normalization is a pure function of the raw plan, the preceding analysis
//! and the workspace root. Dropped steps are reported as diagnostics rather
//! than logged here, so the same function serves primary and recovery plans.

use regex::Regex;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::LazyLock;

use cadence_core::{
    Complexity, ExecutionPlan, FileEdit, Operation, PlannedChange, TaskAnalysis, TaskType,
    TerminalCommand,
};

use crate::schema::{RawOperation, RawPlan, RawStep};

static DRIVE_PREFIX: LazyLock<Regex> = LazyLock::new(|| match Regex::new(r"^[A-Za-z]:/") {
    Ok(regex) => regex,
    Err(err) => panic!("Drive prefix regex is invalid: {err}"),
});

/// Canonical plan plus what was discarded on the way.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedPlan {
    /// The validated plan
    pub plan: ExecutionPlan,
    /// One entry per dropped step or ignored field
    pub diagnostics: Vec<String>,
}

/// Normalizes a path to workspace-relative, forward-slash form.
///
/// Absolute paths under `root` lose the root prefix; absolute paths elsewhere
/// are reduced to their file name. Surrounding quotes, `.` segments and
/// repeated separators are removed. A path that reduces to nothing but was
/// not blank becomes `.`. Applying this twice gives the same result.
#[must_use]
pub fn normalize_path(raw: &str, root: &Path) -> String {
    let trimmed = raw
        .trim()
        .trim_matches(|ch: char| matches!(ch, '"' | '\'' | '`'))
        .trim();
    if trimmed.is_empty() {
        return String::new();
    }

    let mut path = trimmed.replace('\\', "/");
    if path.starts_with('/') || DRIVE_PREFIX.is_match(&path) {
        let root_text = root.to_string_lossy().replace('\\', "/");
        let root_text = root_text.trim_end_matches('/');
        let root_is_absolute = root_text.starts_with('/') || DRIVE_PREFIX.is_match(root_text);
        let under_root = if root_is_absolute {
            path.strip_prefix(root_text)
                .filter(|rest| rest.is_empty() || rest.starts_with('/'))
                .map(str::to_owned)
        } else {
            None
        };
        path = under_root.unwrap_or_else(|| {
            path.rsplit('/')
                .find(|segment| !segment.is_empty())
                .unwrap_or_default()
                .to_owned()
        });
    }

    let segments: Vec<&str> = path
        .split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect();
    if segments.is_empty() {
        return ".".to_owned();
    }
    segments.join("/")
}

/// True for paths a file operation may target.
fn is_file_target(path: &str) -> bool {
    !path.is_empty() && path != "."
}

/// Builds the canonical plan.
///
/// `analysis`, when present, supplies the task type for plans that carry none
/// and contributes its required files.
#[must_use]
pub fn normalize_plan(
    raw: &RawPlan,
    analysis: Option<&TaskAnalysis>,
    root: &Path,
) -> NormalizedPlan {
    let mut diagnostics = Vec::new();

    let task_type = match raw.task_type.as_deref() {
        Some(label) => TaskType::coerce(label),
        None => analysis.map_or(TaskType::General, |analysis| analysis.task_type),
    };
    let estimated_complexity = match raw.estimated_complexity.as_deref() {
        Some(label) => Complexity::coerce(label),
        None => analysis.map_or(Complexity::Medium, |analysis| analysis.complexity),
    };

    let mut steps: Vec<PlannedChange> = Vec::with_capacity(raw.steps.len());
    for (index, step) in raw.steps.iter().enumerate() {
        match normalize_step(step, index, root) {
            Ok(change) => steps.push(change),
            Err(reason) => diagnostics.push(format!("step {}: {reason}", index + 1)),
        }
    }
    // Stable: equal priorities keep their original order.
    steps.sort_by_key(|step| step.priority);

    let terminal_paths: BTreeSet<&str> = steps
        .iter()
        .filter(|step| step.operation.is_terminal())
        .map(|step| step.file_path.as_str())
        .collect();
    let mut file_paths: BTreeSet<String> = BTreeSet::new();
    for step in &steps {
        if let Some(edit) = step.operation.file_edit() {
            file_paths.insert(step.file_path.clone());
            if let Some(new_path) = &edit.new_path {
                file_paths.insert(new_path.clone());
            }
        }
    }

    let mut affected_files: BTreeSet<String> = raw
        .affected_files
        .iter()
        .map(|path| normalize_path(path, root))
        .filter(|path| is_file_target(path))
        .filter(|path| file_paths.contains(path) || !terminal_paths.contains(path.as_str()))
        .collect();
    affected_files.extend(file_paths);

    let analysis_files = analysis
        .map(|analysis| analysis.required_files.as_slice())
        .unwrap_or_default();
    let required_files: BTreeSet<String> = raw
        .required_files
        .iter()
        .chain(analysis_files)
        .map(|path| normalize_path(path, root))
        .filter(|path| is_file_target(path) && !affected_files.contains(path))
        .collect();

    let summary = if raw.summary.trim().is_empty() {
        analysis.map_or_else(String::new, |analysis| first_line(&analysis.summary))
    } else {
        raw.summary.trim().to_owned()
    };

    let plan = ExecutionPlan {
        task_type,
        summary,
        steps,
        required_files,
        affected_files,
        estimated_complexity,
        risks: clean_list(&raw.risks),
        verification_steps: clean_list(&raw.verification_steps),
        confidence: if raw.confidence.is_finite() {
            raw.confidence.clamp(0.0, 1.0)
        } else {
            0.0
        },
    };

    NormalizedPlan { plan, diagnostics }
}

fn normalize_step(step: &RawStep, index: usize, root: &Path) -> Result<PlannedChange, String> {
    let operation = step
        .operation
        .as_ref()
        .ok_or_else(|| "missing operation".to_owned())?;
    let file_path = normalize_path(step.file_path.as_deref().unwrap_or_default(), root);
    let operation = normalize_operation(operation, &file_path, root)?;

    let file_path = if operation.is_terminal() && file_path.is_empty() {
        ".".to_owned()
    } else {
        file_path
    };

    Ok(PlannedChange {
        file_path,
        operation,
        priority: step.priority.unwrap_or(index as i64 + 1),
        rationale: step.rationale.trim().to_owned(),
        risks: clean_list(&step.risks),
        agent_inputs: clean_list(&step.agent_inputs),
    })
}

fn normalize_operation(
    raw: &RawOperation,
    file_path: &str,
    root: &Path,
) -> Result<Operation, String> {
    let kind = raw.kind.trim().to_ascii_lowercase();
    if kind == "terminal" || kind == "command" || kind == "shell" {
        let command = raw
            .command
            .as_deref()
            .map(str::trim)
            .filter(|command| !command.is_empty())
            .ok_or_else(|| "terminal step without a command".to_owned())?;
        let working_directory = raw
            .working_directory
            .as_deref()
            .map(|directory| normalize_path(directory, root))
            .filter(|directory| is_file_target(directory));
        return Ok(Operation::Terminal(TerminalCommand {
            command: command.to_owned(),
            working_directory,
            requires_approval: raw.requires_approval.unwrap_or(true),
        }));
    }

    if !is_file_target(file_path) {
        return Err(format!("{kind} step has no usable file path"));
    }

    let mut edit = FileEdit {
        new_path: None,
        content: raw.content.clone(),
        reason: raw.reason.trim().to_owned(),
        dependencies: raw
            .dependencies
            .iter()
            .map(|path| normalize_path(path, root))
            .filter(|path| is_file_target(path))
            .collect(),
    };

    match kind.as_str() {
        "create" | "add" | "new" => Ok(Operation::Create(edit)),
        "modify" | "edit" | "update" => Ok(Operation::Modify(edit)),
        "delete" | "remove" => {
            edit.content = None;
            Ok(Operation::Delete(edit))
        }
        "rename" | "move" => {
            let new_path = raw
                .new_path
                .as_deref()
                .map(|path| normalize_path(path, root))
                .filter(|path| is_file_target(path))
                .ok_or_else(|| "rename step without a new path".to_owned())?;
            edit.new_path = Some(new_path);
            edit.content = None;
            Ok(Operation::Rename(edit))
        }
        "" => Err("operation has no type".to_owned()),
        other => Err(format!("unknown operation type `{other}`")),
    }
}

fn clean_list(items: &[String]) -> Vec<String> {
    items
        .iter()
        .map(|item| item.trim())
        .filter(|item| !item.is_empty())
        .map(str::to_owned)
        .collect()
}

fn first_line(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or_default()
        .to_owned()
}
