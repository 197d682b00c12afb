//! Closed record schemas and their strict parsers.
//!
//! Each schema pairs a parser with an [`ExpectedStructure`] descriptor. The
//! descriptor is rendered into the generation prompt and into the repair
//! prompt, so both describe the same shape the parser accepts.

use std::fmt;
use thiserror::Error;

use crate::extraction::extract_payload;

/// Indentation-based block tree shared by the plan and recovery schemas.
pub mod block;
/// Sectioned-markdown task analysis schema.
pub mod markdown;
/// Execution plan and recovery schemas.
pub mod plan;

pub use markdown::AnalysisSchema;
pub use plan::{PlanSchema, RawOperation, RawPlan, RawRecovery, RawStep, RecoverySchema};

/// Subsystem that produced a response; selects repair examples and log fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepairCaller {
    /// Interprets the request before planning
    TaskAnalyzer,
    /// Produces the execution plan
    PlanGenerator,
    /// Diagnoses failed commands
    FailureAnalyzer,
}

impl RepairCaller {
    /// Stable `snake_case` name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TaskAnalyzer => "task_analyzer",
            Self::PlanGenerator => "plan_generator",
            Self::FailureAnalyzer => "failure_analyzer",
        }
    }
}

impl fmt::Display for RepairCaller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TaskAnalyzer => write!(f, "task analyzer"),
            Self::PlanGenerator => write!(f, "plan generator"),
            Self::FailureAnalyzer => write!(f, "failure analyzer"),
        }
    }
}

/// Text layout a schema is written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaFormat {
    /// `## Section` headers with free text, bullets and labelled blocks
    SectionedMarkdown,
    /// `key: value` pairs nested by indentation
    IndentedBlock,
}

/// Declares the sections and scalar fields a caller expects.
#[derive(Debug, PartialEq, Eq)]
pub struct ExpectedStructure {
    /// Who expects this structure
    pub caller: RepairCaller,
    /// Layout of the text
    pub format: SchemaFormat,
    /// Required sections, in the order they should appear
    pub sections: &'static [&'static str],
    /// Required scalar fields
    pub scalar_fields: &'static [&'static str],
    /// Fence tags the payload may be wrapped in
    pub fence_tags: &'static [&'static str],
    /// Shape of one list item in the main list section, if any
    pub item_shape: Option<&'static str>,
}

impl ExpectedStructure {
    /// Renders the structure as a skeleton for prompts.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        match self.format {
            SchemaFormat::SectionedMarkdown => {
                for section in self.sections {
                    out.push_str(&format!("## {section}\n<content>\n\n"));
                }
                for field in self.scalar_fields {
                    out.push_str(&format!("**{field}:** <value>\n"));
                }
            }
            SchemaFormat::IndentedBlock => {
                for field in self.scalar_fields {
                    out.push_str(&format!("{field}: <value>\n"));
                }
                for section in self.sections {
                    out.push_str(&format!("{section}:\n"));
                    match self.item_shape {
                        Some(shape) if *section == "steps" => out.push_str(shape),
                        _ => out.push_str("  - <item>\n"),
                    }
                }
            }
        }
        if let Some(shape) = self.item_shape
            && self.format == SchemaFormat::SectionedMarkdown
        {
            out.push('\n');
            out.push_str(shape);
        }
        out.trim_end().to_owned()
    }
}

/// Strict parse found nothing close enough to the schema to trust.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{caller} output is malformed: {reason}")]
pub struct MalformedOutput {
    /// Schema owner
    pub caller: RepairCaller,
    /// What was missing
    pub reason: String,
}

impl MalformedOutput {
    /// Creates a malformed-output error.
    pub fn new(caller: RepairCaller, reason: impl Into<String>) -> Self {
        Self {
            caller,
            reason: reason.into(),
        }
    }
}

/// Parses `0.8`, `80%` or `80` into [0, 1].
pub(crate) fn parse_confidence_value(text: &str) -> Option<f64> {
    let trimmed = text.trim().trim_matches('*');
    let (number, percent) = trimmed
        .strip_suffix('%')
        .map_or((trimmed, false), |stripped| (stripped, true));
    let value: f64 = number.trim().parse().ok()?;
    Some(scale_confidence(value, percent))
}

/// Maps percentages and out-of-range values into [0, 1].
pub(crate) fn scale_confidence(value: f64, percent: bool) -> f64 {
    let scaled = if percent || value > 1.0 {
        value / 100.0
    } else {
        value
    };
    scaled.clamp(0.0, 1.0)
}

/// A closed record type with a deterministic parser.
pub trait Schema: Send + Sync {
    /// Parsed record
    type Record: Send;

    /// Descriptor used for prompts and repair.
    fn structure(&self) -> &'static ExpectedStructure;

    /// Parses already-extracted payload text.
    ///
    /// # Errors
    /// Returns [`MalformedOutput`] when the text is structurally empty.
    fn parse(&self, payload: &str) -> Result<Self::Record, MalformedOutput>;

    /// Extracts the payload from a raw response and parses it.
    ///
    /// # Errors
    /// Returns [`MalformedOutput`] when the payload is structurally empty.
    fn parse_response(&self, raw: &str) -> Result<Self::Record, MalformedOutput> {
        self.parse(&extract_payload(raw, self.structure().fence_tags))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_markdown_structure_renders_headers() {
        let rendered = markdown::ANALYSIS_STRUCTURE.render();
        assert!(rendered.starts_with("## Summary"));
        assert!(rendered.contains("## Findings"));
        assert!(rendered.contains("**Confidence:** <value>"));
    }

    #[test]
    fn test_block_structure_renders_step_shape() {
        let rendered = plan::PLAN_STRUCTURE.render();
        assert!(rendered.contains("taskType: <value>"));
        assert!(rendered.contains("steps:\n  - filePath:"));
        assert!(rendered.contains("requiredFiles:\n  - <item>"));
    }

    #[test]
    fn test_recovery_structure_has_extra_fields() {
        let rendered = plan::RECOVERY_STRUCTURE.render();
        assert!(rendered.contains("recoverable: <value>"));
        assert!(rendered.contains("rationale: <value>"));
    }

    #[test]
    fn test_malformed_output_message() {
        let error = MalformedOutput::new(RepairCaller::PlanGenerator, "no list sections");
        assert_eq!(
            error.to_string(),
            "plan generator output is malformed: no list sections"
        );
    }
}
