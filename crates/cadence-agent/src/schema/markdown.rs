use cadence_core::{
    Complexity, DEFAULT_ANALYSIS_CONFIDENCE, Finding, Severity, TaskAnalysis, TaskType,
};
use regex::Regex;
use std::sync::LazyLock;

use super::{
    ExpectedStructure, MalformedOutput, RepairCaller, Schema, SchemaFormat, parse_confidence_value,
    scale_confidence,
};

/// Shape of one finding block, appended to the rendered structure.
const FINDING_SHAPE: &str = "Findings are grouped under `### Critical`, `### High`, `### Medium` \
or `### Low`, one blank-line separated block per item:\nTitle: <short title>\nLocation: <file or \
file:line>\nDetail: <explanation>";

/// Expected structure of a task analysis.
pub static ANALYSIS_STRUCTURE: ExpectedStructure = ExpectedStructure {
    caller: RepairCaller::TaskAnalyzer,
    format: SchemaFormat::SectionedMarkdown,
    sections: &[
        "Summary",
        "Task Type",
        "Complexity",
        "Required Files",
        "Affected Files",
        "Findings",
        "Recommendations",
    ],
    scalar_fields: &["Confidence"],
    fence_tags: &["markdown", "md"],
    item_shape: Some(FINDING_SHAPE),
};

static HEADER: LazyLock<Regex> =
    LazyLock::new(|| match Regex::new(r"^\s{0,3}(#{1,4})\s+(.+?)\s*#*\s*$") {
        Ok(regex) => regex,
        Err(err) => panic!("Header regex is invalid: {err}"),
    });

static CONFIDENCE: LazyLock<Regex> = LazyLock::new(|| {
    match Regex::new(r"(?i)^\W*confidence\W{0,6}?(\d{1,3}(?:\.\d+)?|\.\d+)\s*(%?)") {
        Ok(regex) => regex,
        Err(err) => panic!("Confidence regex is invalid: {err}"),
    }
});

static BULLET: LazyLock<Regex> =
    LazyLock::new(|| match Regex::new(r"^\s*(?:[-*+]|\d{1,3}[.)])\s+(.*\S)\s*$") {
        Ok(regex) => regex,
        Err(err) => panic!("Bullet regex is invalid: {err}"),
    });

static FINDING_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    match Regex::new(
        r"(?i)^\s*(?:[-*+]\s+)?[*_]*(title|location|file|detail|details|description)[*_]*\s*:[*_]*\s*(.*?)\s*$",
    ) {
        Ok(regex) => regex,
        Err(err) => panic!("Finding label regex is invalid: {err}"),
    }
});

/// Sections of the analysis text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Summary,
    TaskType,
    Complexity,
    RequiredFiles,
    AffectedFiles,
    Findings,
    Recommendations,
    Confidence,
}

impl Section {
    fn from_header(raw: &str) -> Option<Self> {
        let name = raw
            .trim_matches(|ch: char| matches!(ch, '*' | '_' | ':' | '`') || ch.is_whitespace())
            .to_lowercase();
        let name = name.split_whitespace().collect::<Vec<_>>().join(" ");
        match name.as_str() {
            "summary" | "overview" => Some(Self::Summary),
            "task type" | "type" => Some(Self::TaskType),
            "complexity" | "estimated complexity" => Some(Self::Complexity),
            "required files" | "context files" => Some(Self::RequiredFiles),
            "affected files" | "files to change" => Some(Self::AffectedFiles),
            "findings" | "issues" => Some(Self::Findings),
            "recommendations" | "recommended approach" | "approach" => {
                Some(Self::Recommendations)
            }
            "confidence" => Some(Self::Confidence),
            _ => None,
        }
    }
}

/// Strict parser for the sectioned-markdown task analysis.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnalysisSchema;

impl Schema for AnalysisSchema {
    type Record = TaskAnalysis;

    fn structure(&self) -> &'static ExpectedStructure {
        &ANALYSIS_STRUCTURE
    }

    fn parse(&self, payload: &str) -> Result<TaskAnalysis, MalformedOutput> {
        let sections = split_sections(payload);
        if sections.is_empty() {
            return Err(MalformedOutput::new(
                RepairCaller::TaskAnalyzer,
                "no recognizable section headers",
            ));
        }

        let mut analysis = TaskAnalysis {
            confidence: find_confidence(payload).unwrap_or(DEFAULT_ANALYSIS_CONFIDENCE),
            ..TaskAnalysis::default()
        };

        for (section, body) in sections {
            match section {
                Section::Summary => analysis.summary = paragraph(&body),
                Section::TaskType => {
                    if let Some(line) = first_line(&body) {
                        analysis.task_type = coerce_task_type(line);
                    }
                }
                Section::Complexity => {
                    if let Some(line) = first_line(&body) {
                        analysis.complexity = Complexity::coerce(first_word(line));
                    }
                }
                Section::RequiredFiles => analysis.required_files.extend(file_items(&body)),
                Section::AffectedFiles => analysis.affected_files.extend(file_items(&body)),
                Section::Findings => analysis.findings.extend(parse_findings(&body)),
                Section::Recommendations => analysis.recommendations.extend(list_items(&body)),
                Section::Confidence => {
                    if let Some(value) = first_line(&body).and_then(parse_confidence_value) {
                        analysis.confidence = value;
                    }
                }
            }
        }

        Ok(analysis)
    }
}

/// Splits text into recognized sections; unknown top-level headers end the current one.
fn split_sections(payload: &str) -> Vec<(Section, Vec<&str>)> {
    let mut sections: Vec<(Section, Vec<&str>)> = Vec::new();
    let mut current: Option<usize> = None;

    for line in payload.lines() {
        if let Some(captures) = HEADER.captures(line) {
            let level = captures.get(1).map_or(0, |hashes| hashes.as_str().len());
            let title = captures.get(2).map_or("", |title| title.as_str());

            let in_findings =
                current.is_some_and(|index| sections[index].0 == Section::Findings);
            if in_findings && Severity::from_heading(title).is_some() {
                if let Some(index) = current {
                    sections[index].1.push(line);
                }
                continue;
            }

            if let Some(section) = Section::from_header(title) {
                sections.push((section, Vec::new()));
                current = Some(sections.len() - 1);
                continue;
            }

            if level <= 2 {
                current = None;
                continue;
            }
        }

        if CONFIDENCE.is_match(line) {
            continue;
        }
        if let Some(index) = current {
            sections[index].1.push(line);
        }
    }

    sections
}

fn find_confidence(payload: &str) -> Option<f64> {
    payload.lines().find_map(|line| {
        let captures = CONFIDENCE.captures(line)?;
        let number: f64 = captures.get(1)?.as_str().parse().ok()?;
        let percent = captures.get(2).is_some_and(|sign| !sign.as_str().is_empty());
        Some(scale_confidence(number, percent))
    })
}

fn paragraph(body: &[&str]) -> String {
    body.iter()
        .map(|line| line.trim())
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_owned()
}

fn first_line<'text>(body: &[&'text str]) -> Option<&'text str> {
    body.iter()
        .copied()
        .map(|line| strip_bullet(line.trim()))
        .find(|line| !line.is_empty())
}

fn first_word(line: &str) -> &str {
    line.split(|ch: char| !(ch.is_alphanumeric() || ch == '_' || ch == '-'))
        .find(|word| !word.is_empty())
        .unwrap_or("")
}

/// Tries the whole line, then its first word.
fn coerce_task_type(line: &str) -> TaskType {
    TaskType::from_label(line)
        .or_else(|| TaskType::from_label(first_word(line)))
        .unwrap_or(TaskType::General)
}

fn strip_bullet(line: &str) -> &str {
    BULLET
        .captures(line)
        .and_then(|captures| captures.get(1))
        .map_or(line, |item| item.as_str())
}

fn list_items(body: &[&str]) -> Vec<String> {
    body.iter()
        .filter_map(|line| BULLET.captures(line))
        .filter_map(|captures| captures.get(1))
        .map(|item| item.as_str().trim().to_owned())
        .filter(|item| !item.is_empty())
        .collect()
}

/// Bullet items reduced to their path: the first backticked span, else the first token.
fn file_items(body: &[&str]) -> Vec<String> {
    list_items(body)
        .iter()
        .filter_map(|item| {
            let path = item
                .split('`')
                .nth(1)
                .filter(|quoted| !quoted.trim().is_empty())
                .unwrap_or_else(|| item.split_whitespace().next().unwrap_or(""));
            let path = path
                .trim_matches(|ch: char| matches!(ch, '"' | '\'' | '*' | ',' | ';' | ':'))
                .trim();
            let lowered = path.to_lowercase();
            if path.is_empty() || matches!(lowered.as_str(), "none" | "n/a" | "-") {
                None
            } else {
                Some(path.to_owned())
            }
        })
        .collect()
}

/// Parses finding blocks grouped under severity headings.
fn parse_findings(body: &[&str]) -> Vec<Finding> {
    let mut findings = Vec::new();
    let mut severity = Severity::Medium;
    let mut block: Vec<&str> = Vec::new();

    for line in body {
        let heading = HEADER
            .captures(line)
            .and_then(|captures| captures.get(2))
            .map(|title| title.as_str())
            .or_else(|| {
                let trimmed = line.trim();
                (trimmed.starts_with('*') || trimmed.ends_with(':')).then_some(trimmed)
            })
            .and_then(Severity::from_heading);

        if let Some(next) = heading {
            findings.extend(parse_finding_block(&block, severity));
            block.clear();
            severity = next;
        } else if line.trim().is_empty() {
            findings.extend(parse_finding_block(&block, severity));
            block.clear();
        } else {
            block.push(line);
        }
    }
    findings.extend(parse_finding_block(&block, severity));

    findings
}

/// A block with no recognized label yields nothing.
fn parse_finding_block(block: &[&str], severity: Severity) -> Option<Finding> {
    let mut title = None;
    let mut location = None;
    let mut detail: Option<String> = None;
    let mut last_label = "";

    for line in block {
        if let Some(captures) = FINDING_LABEL.captures(line) {
            let label = captures
                .get(1)
                .map_or(String::new(), |label| label.as_str().to_lowercase());
            let value = captures
                .get(2)
                .map_or("", |value| value.as_str())
                .trim_matches(|ch: char| matches!(ch, '*' | '`'))
                .trim()
                .to_owned();
            match label.as_str() {
                "title" => {
                    title = Some(value);
                    last_label = "title";
                }
                "location" | "file" => {
                    location = Some(value).filter(|found| !found.is_empty());
                    last_label = "location";
                }
                _ => {
                    detail = Some(value);
                    last_label = "detail";
                }
            }
        } else if last_label == "detail" {
            if let Some(text) = detail.as_mut() {
                text.push('\n');
                text.push_str(line.trim());
            }
        }
    }

    if title.is_none() && location.is_none() && detail.is_none() {
        return None;
    }

    Some(Finding {
        severity,
        title: title.unwrap_or_default(),
        location,
        detail: detail.unwrap_or_default().trim().to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const WELL_FORMED: &str = "## Summary
Pagination skips the last page when the total is an exact multiple of the page size.

## Task Type
bug_fix

## Complexity
Low

## Required Files
- `src/lib.rs`

## Affected Files
- `src/pager.rs` (boundary math)
- tests/pager.rs

## Findings
### High
Title: Off-by-one in page count
Location: src/pager.rs:42
Detail: Integer division drops the final page.

### Low
Title: Missing doc comment
Location: src/pager.rs

## Recommendations
1. Use ceiling division for the page count.
2. Add a regression test.

**Confidence:** 0.92
";

    fn parse(text: &str) -> Result<TaskAnalysis, MalformedOutput> {
        AnalysisSchema.parse(text)
    }

    #[test]
    fn test_well_formed_analysis_copies_fields() {
        let analysis = parse(WELL_FORMED).expect("well-formed analysis parses");

        assert!(analysis.summary.starts_with("Pagination skips the last page"));
        assert_eq!(analysis.task_type, TaskType::BugFix);
        assert_eq!(analysis.complexity, Complexity::Low);
        assert_eq!(analysis.required_files, vec!["src/lib.rs"]);
        assert_eq!(analysis.affected_files, vec!["src/pager.rs", "tests/pager.rs"]);
        assert_eq!(analysis.recommendations.len(), 2);
        assert!((analysis.confidence - 0.92).abs() < f64::EPSILON);

        assert_eq!(analysis.findings.len(), 2);
        assert_eq!(analysis.findings[0].severity, Severity::High);
        assert_eq!(analysis.findings[0].title, "Off-by-one in page count");
        assert_eq!(
            analysis.findings[0].location.as_deref(),
            Some("src/pager.rs:42")
        );
        assert_eq!(analysis.findings[1].severity, Severity::Low);
        assert!(analysis.findings[1].detail.is_empty());
    }

    #[test]
    fn test_missing_header_markers_is_malformed() {
        let stripped = WELL_FORMED.replace("## ", "").replace("### ", "");
        let error = parse(&stripped).expect_err("no headers should fail");
        assert_eq!(error.caller, RepairCaller::TaskAnalyzer);
    }

    #[test]
    fn test_absent_fields_take_defaults() {
        let analysis = parse("## Summary\nJust a summary.").expect("summary only parses");
        assert!((analysis.confidence - DEFAULT_ANALYSIS_CONFIDENCE).abs() < f64::EPSILON);
        assert_eq!(analysis.task_type, TaskType::General);
        assert_eq!(analysis.complexity, Complexity::Medium);
        assert!(analysis.findings.is_empty());
    }

    #[test]
    fn test_headers_are_order_and_punctuation_insensitive() {
        let text = "### **Recommendations:**\n- Do (this): now\n# task type\nFeature Add\n## Summary:\nAdd \"quotes\": fine";
        let analysis = parse(text).expect("reordered sections parse");
        assert_eq!(analysis.task_type, TaskType::FeatureAdd);
        assert_eq!(analysis.recommendations, vec!["Do (this): now"]);
        assert_eq!(analysis.summary, "Add \"quotes\": fine");
    }

    #[test]
    fn test_block_without_labels_is_dropped() {
        let text = "## Findings\n### Critical\nJust some prose with no labels.\n\nTitle: Real one\nDetail: first line\ncontinued here";
        let analysis = parse(text).expect("findings parse");
        assert_eq!(analysis.findings.len(), 1);
        assert_eq!(analysis.findings[0].severity, Severity::Critical);
        assert_eq!(analysis.findings[0].detail, "first line\ncontinued here");
    }

    #[test]
    fn test_unknown_sections_are_ignored() {
        let text = "## Summary\nKeep me\n## Thoughts\n- not a recommendation\n## Recommendations\n- real";
        let analysis = parse(text).expect("parses");
        assert_eq!(analysis.summary, "Keep me");
        assert_eq!(analysis.recommendations, vec!["real"]);
    }

    #[test]
    fn test_confidence_variants() {
        let cases = [
            ("**Confidence:** 0.92", 0.92),
            ("Confidence: 85%", 0.85),
            ("confidence - 70", 0.7),
            ("- **Confidence**: .5", 0.5),
        ];
        for (line, expected) in cases {
            let text = format!("## Summary\nx\n{line}");
            let analysis = parse(&text).expect("parses");
            assert!(
                (analysis.confidence - expected).abs() < 1e-9,
                "{line} gave {}",
                analysis.confidence
            );
            assert_eq!(analysis.summary, "x", "{line} leaked into the summary");
        }
    }

    #[test]
    fn test_none_file_entries_skipped() {
        let analysis = parse("## Required Files\n- None\n- N/A\n- \"Cargo.toml\"").expect("parses");
        assert_eq!(analysis.required_files, vec!["Cargo.toml"]);
    }
}
