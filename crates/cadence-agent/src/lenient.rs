//! Pattern-based plan salvage for responses whose structure is too broken to parse.
//!
//! Steps are delimited by `filePath:` anchors at the start of a line; within
//! each span the operation type, command and rationale are matched
//! independently. A `filePath:` in the middle of a line (inside a rationale,
//! say) is not an anchor.

use regex::Regex;
use std::sync::LazyLock;

use cadence_core::DEFAULT_PLAN_CONFIDENCE;

use crate::schema::{RawOperation, RawPlan, RawStep, parse_confidence_value};

/// Rationale given to steps whose span carried none.
pub const DEFAULT_RATIONALE: &str = "Operation required";

static ANCHOR: LazyLock<Regex> = LazyLock::new(|| {
    match Regex::new(r#"(?mi)^[ \t]*(?:-[ \t]+)?["']?file_?path["']?[ \t]*:[ \t]*(.*?)[ \t,]*$"#) {
        Ok(regex) => regex,
        Err(err) => panic!("Anchor regex is invalid: {err}"),
    }
});

static OPERATION_TYPE: LazyLock<Regex> = LazyLock::new(|| {
    match Regex::new(r#"(?mi)^[ \t]*(?:-[ \t]+)?["']?(?:type|operation)["']?[ \t]*:[ \t]*["']?([A-Za-z_]+)"#) {
        Ok(regex) => regex,
        Err(err) => panic!("Operation type regex is invalid: {err}"),
    }
});

static COMMAND: LazyLock<Regex> = LazyLock::new(|| {
    match Regex::new(r#"(?mi)^[ \t]*(?:-[ \t]+)?["']?command["']?[ \t]*:[ \t]*(\S.*?)[ \t]*$"#) {
        Ok(regex) => regex,
        Err(err) => panic!("Command regex is invalid: {err}"),
    }
});

static RATIONALE: LazyLock<Regex> = LazyLock::new(|| {
    match Regex::new(r#"(?mi)^[ \t]*(?:-[ \t]+)?["']?(rationale|reason)["']?[ \t]*:[ \t]*(\S.*?)[ \t]*$"#) {
        Ok(regex) => regex,
        Err(err) => panic!("Rationale regex is invalid: {err}"),
    }
});

static TOP_LEVEL_SCALAR: LazyLock<Regex> = LazyLock::new(|| {
    match Regex::new(r#"(?mi)^[ \t]*["']?(confidence|summary|task_?type)["']?[ \t]*:[ \t]*(\S.*?)[ \t]*$"#) {
        Ok(regex) => regex,
        Err(err) => panic!("Scalar regex is invalid: {err}"),
    }
});

/// Extracts whatever steps the `filePath:` anchors delimit.
///
/// Returns a plan with zero steps when no anchor carried a path; the caller
/// treats that as a failure of this tier.
#[must_use]
pub fn extract_plan(raw: &str) -> RawPlan {
    let anchors: Vec<(usize, String)> = ANCHOR
        .captures_iter(raw)
        .filter_map(|captures| {
            let whole = captures.get(0)?;
            let path = strip_quotes(captures.get(1)?.as_str());
            Some((whole.start(), path))
        })
        .collect();

    let mut steps = Vec::new();
    for (index, (start, path)) in anchors.iter().enumerate() {
        if path.is_empty() {
            continue;
        }
        let end = anchors.get(index + 1).map_or(raw.len(), |(next, _)| *next);
        let span = &raw[*start..end];
        let position = steps.len() as i64 + 1;
        steps.push(step_from_span(path, span, position));
    }

    let mut plan = RawPlan {
        steps,
        confidence: find_scalar(raw, "confidence")
            .and_then(parse_confidence_value)
            .unwrap_or(DEFAULT_PLAN_CONFIDENCE),
        ..RawPlan::default()
    };
    // Summary and task type are only taken from text before the first step.
    let header = &raw[..anchors.first().map_or(raw.len(), |(start, _)| *start)];
    apply_header(&mut plan, header);
    plan
}

fn step_from_span(path: &str, span: &str, position: i64) -> RawStep {
    let command = COMMAND
        .captures(span)
        .and_then(|captures| captures.get(1))
        .map(|command| strip_quotes(command.as_str()))
        .filter(|command| !command.is_empty());

    let kind = OPERATION_TYPE
        .captures(span)
        .and_then(|captures| captures.get(1))
        .map(|kind| kind.as_str().to_ascii_lowercase())
        .unwrap_or_else(|| {
            if command.is_some() {
                "terminal".to_owned()
            } else {
                "modify".to_owned()
            }
        });

    let mut rationale = None;
    let mut reason = None;
    for captures in RATIONALE.captures_iter(span) {
        let (Some(label), Some(text)) = (captures.get(1), captures.get(2)) else {
            continue;
        };
        let slot = if label.as_str().eq_ignore_ascii_case("rationale") {
            &mut rationale
        } else {
            &mut reason
        };
        if slot.is_none() {
            *slot = Some(strip_quotes(text.as_str()));
        }
    }
    let rationale = rationale
        .or_else(|| reason.clone())
        .unwrap_or_else(|| DEFAULT_RATIONALE.to_owned());

    RawStep {
        file_path: Some(path.to_owned()),
        priority: Some(position),
        rationale: rationale.clone(),
        risks: Vec::new(),
        agent_inputs: Vec::new(),
        operation: Some(RawOperation {
            kind,
            reason: reason.unwrap_or(rationale),
            command,
            ..RawOperation::default()
        }),
    }
}

fn apply_header(plan: &mut RawPlan, header: &str) {
    for captures in TOP_LEVEL_SCALAR.captures_iter(header) {
        let (Some(label), Some(value)) = (captures.get(1), captures.get(2)) else {
            continue;
        };
        let value = strip_quotes(value.as_str());
        match label.as_str().to_ascii_lowercase().as_str() {
            "summary" if plan.summary.is_empty() => plan.summary = value,
            "tasktype" | "task_type" if plan.task_type.is_none() => plan.task_type = Some(value),
            _ => {}
        }
    }
}

fn find_scalar<'text>(text: &'text str, wanted: &str) -> Option<&'text str> {
    TOP_LEVEL_SCALAR
        .captures_iter(text)
        .find(|captures| {
            captures
                .get(1)
                .is_some_and(|label| label.as_str().eq_ignore_ascii_case(wanted))
        })
        .and_then(|captures| captures.get(2))
        .map(|value| value.as_str())
}

fn strip_quotes(text: &str) -> String {
    text.trim()
        .trim_matches(|ch: char| matches!(ch, '"' | '\'' | '`'))
        .trim()
        .to_owned()
}
