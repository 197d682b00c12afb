//! Pulls the structured payload out of a free-form model response.

/// A fenced block found in a response.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Fence<'text> {
    tag: &'text str,
    body: String,
}

/// Returns the best-effort payload text of a response.
///
/// When the response holds fenced blocks, the first one whose tag is in
/// `preferred_tags` wins, then the first fence of any tag. Without a fence the
/// trimmed response is returned as is. Never fails.
#[must_use]
pub fn extract_payload(raw: &str, preferred_tags: &[&str]) -> String {
    let fences = find_fences(raw);

    let preferred = fences.iter().find(|fence| {
        preferred_tags
            .iter()
            .any(|tag| fence.tag.eq_ignore_ascii_case(tag))
    });

    match preferred.or_else(|| fences.first()) {
        Some(fence) => fence.body.trim().to_owned(),
        None => raw.trim().to_owned(),
    }
}

/// Finds every fenced block.
///
/// A fence closes on a bare fence line indented no deeper than its opener, so
/// fences inside indented `|` content blocks do not end the outer block. An
/// unterminated fence runs to the end of the text.
fn find_fences(raw: &str) -> Vec<Fence<'_>> {
    let mut fences = Vec::new();
    let mut lines = raw.lines();

    while let Some(line) = lines.next() {
        let Some((indent, tag)) = fence_opener(line) else {
            continue;
        };

        let mut body_lines = Vec::new();
        for inner in lines.by_ref() {
            if is_fence_closer(inner, indent) {
                break;
            }
            body_lines.push(inner);
        }

        fences.push(Fence {
            tag,
            body: dedent(&body_lines, indent),
        });
    }

    fences
}

/// Returns the indentation and tag of a fence-opening line.
fn fence_opener(line: &str) -> Option<(usize, &str)> {
    let indent = indent_width(line);
    let rest = strip_indent(line, indent).strip_prefix("```")?;
    let tag = rest.trim();
    if tag.contains('`') {
        return None;
    }
    Some((indent, tag))
}

fn is_fence_closer(line: &str, opener_indent: usize) -> bool {
    let indent = indent_width(line);
    indent <= opener_indent && strip_indent(line, indent).trim_end() == "```"
}

/// Strips the opener's indentation from each body line when present.
fn dedent(lines: &[&str], indent: usize) -> String {
    lines
        .iter()
        .map(|line| strip_indent(line, indent))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Byte length of the leading run of spaces and tabs.
///
/// Other Unicode whitespace is content, so the width is always a char boundary.
pub(crate) fn indent_width(line: &str) -> usize {
    line.len() - line.trim_start_matches([' ', '\t']).len()
}

/// Drops at most `max` bytes of leading spaces and tabs.
pub(crate) fn strip_indent(line: &str, max: usize) -> &str {
    line.get(indent_width(line).min(max)..).unwrap_or(line)
}
