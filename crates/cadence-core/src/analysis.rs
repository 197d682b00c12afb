//! Task analysis record produced before planning.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::plan::{Complexity, TaskType};

/// Confidence assigned to an analysis whose source text carried none.
pub const DEFAULT_ANALYSIS_CONFIDENCE: f64 = 0.8;

/// Severity of an analysis finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Must be addressed before anything else
    Critical,
    /// Likely to cause failures
    High,
    /// Worth addressing
    Medium,
    /// Cosmetic or informational
    Low,
}

impl Severity {
    /// Matches a heading such as `Critical`, `HIGH:` or `**Medium**`.
    #[must_use]
    pub fn from_heading(raw: &str) -> Option<Self> {
        let cleaned = raw
            .trim()
            .trim_matches(|ch: char| matches!(ch, '*' | ':' | '_' | '`'))
            .trim()
            .to_lowercase();
        match cleaned.as_str() {
            "critical" | "blocker" => Some(Self::Critical),
            "high" | "major" => Some(Self::High),
            "medium" | "moderate" => Some(Self::Medium),
            "low" | "minor" | "info" => Some(Self::Low),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Critical => write!(f, "Critical"),
            Self::High => write!(f, "High"),
            Self::Medium => write!(f, "Medium"),
            Self::Low => write!(f, "Low"),
        }
    }
}

/// One itemized issue surfaced by the analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    /// Severity heading the item was listed under
    pub severity: Severity,
    /// Short title
    pub title: String,
    /// File or file:line reference, when given
    pub location: Option<String>,
    /// Longer explanation
    pub detail: String,
}

/// Structured interpretation of a natural-language request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskAnalysis {
    /// One-paragraph restatement of the request
    pub summary: String,
    /// Category of work
    pub task_type: TaskType,
    /// Advisory size estimate
    pub complexity: Complexity,
    /// Files needed as read-only context
    pub required_files: Vec<String>,
    /// Files expected to change
    pub affected_files: Vec<String>,
    /// Itemized issues, grouped by severity in the source text
    pub findings: Vec<Finding>,
    /// Suggested approach, one item per line
    pub recommendations: Vec<String>,
    /// Confidence in [0, 1]
    pub confidence: f64,
}

impl Default for TaskAnalysis {
    fn default() -> Self {
        Self {
            summary: String::new(),
            task_type: TaskType::General,
            complexity: Complexity::Medium,
            required_files: Vec::new(),
            affected_files: Vec::new(),
            findings: Vec::new(),
            recommendations: Vec::new(),
            confidence: DEFAULT_ANALYSIS_CONFIDENCE,
        }
    }
}

impl TaskAnalysis {
    /// Total characters of free text carried by this record.
    ///
    /// Used to check that a structural repair did not drop content.
    #[must_use]
    pub fn content_len(&self) -> usize {
        let lists: usize = self
            .required_files
            .iter()
            .chain(&self.affected_files)
            .chain(&self.recommendations)
            .map(String::len)
            .sum();
        let findings: usize = self
            .findings
            .iter()
            .map(|finding| {
                finding.title.len()
                    + finding.detail.len()
                    + finding.location.as_ref().map_or(0, String::len)
            })
            .sum();
        self.summary.len() + lists + findings
    }
}
