//! Prompt loading utilities
//!
//! Prompt files live in the workspace `prompts/` directory. Each one is a
//! markdown document with Usage and Prompt sections; only the Prompt section
//! is sent to the model. Prompts are embedded at compile time using `include_str!`.

const TASK_ANALYSIS_MD: &str = include_str!("../../../../prompts/task_analysis.md");
const PLAN_GENERATION_MD: &str = include_str!("../../../../prompts/plan_generation.md");
const FAILURE_ANALYSIS_MD: &str = include_str!("../../../../prompts/failure_analysis.md");
const REPAIR_MD: &str = include_str!("../../../../prompts/repair.md");

/// Names accepted by [`load_prompt`].
pub const PROMPT_NAMES: [&str; 4] = [
    "task_analysis",
    "plan_generation",
    "failure_analysis",
    "repair",
];

/// Loads a prompt by name
///
/// # Errors
/// Returns an error if the prompt name is unknown or the prompt section cannot be extracted
pub fn load_prompt(name: &str) -> Result<String, String> {
    let content = match name {
        "task_analysis" => TASK_ANALYSIS_MD,
        "plan_generation" => PLAN_GENERATION_MD,
        "failure_analysis" => FAILURE_ANALYSIS_MD,
        "repair" => REPAIR_MD,
        _ => return Err(format!("Unknown prompt: {name}")),
    };

    extract_prompt_section(content)
}

/// Replaces every `{{key}}` placeholder with its value.
///
/// Placeholders without a matching key are left untouched.
#[must_use]
pub fn render_prompt(template: &str, values: &[(&str, &str)]) -> String {
    values
        .iter()
        .fold(template.to_owned(), |rendered, (key, value)| {
            rendered.replace(&format!("{{{{{key}}}}}"), value)
        })
}

/// Extracts the Prompt section from a markdown file
///
/// # Errors
/// Returns an error if the Prompt section cannot be found
fn extract_prompt_section(content: &str) -> Result<String, String> {
    let prompt_start = content
        .find("## Prompt")
        .ok_or_else(|| "Prompt section not found".to_owned())?;

    // Skip past the header line
    let prompt_content_start = content[prompt_start..]
        .find('\n')
        .ok_or_else(|| "Invalid prompt format".to_owned())?
        + prompt_start
        + 1;

    // ## Prompt is always the last top-level section
    Ok(content[prompt_content_start..].trim().to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Result, anyhow};

    #[test]
    fn test_extract_prompt_section() -> Result<()> {
        let markdown = r"# Test Prompt

## Usage

This is usage info.

## Prompt

This is the actual prompt content.

It can have multiple lines.
";

        let result = extract_prompt_section(markdown).map_err(|err| anyhow!("{err}"))?;
        assert_eq!(
            result,
            "This is the actual prompt content.\n\nIt can have multiple lines."
        );
        Ok(())
    }

    #[test]
    fn test_every_prompt_loads_without_usage() -> Result<()> {
        for name in PROMPT_NAMES {
            let prompt = load_prompt(name).map_err(|err| anyhow!("{err}"))?;
            assert!(!prompt.contains("## Usage"), "{name} leaked its usage notes");
            assert!(prompt.contains("{{structure}}"), "{name} lacks a structure slot");
        }
        Ok(())
    }

    #[test]
    fn test_unknown_prompt_is_error() {
        assert!(load_prompt("nope").is_err());
    }

    #[test]
    fn test_render_prompt_substitutes_placeholders() {
        let rendered = render_prompt(
            "Fix {{what}} in {{where}}; keep {{other}}",
            &[("what", "the bug"), ("where", "src/lib.rs")],
        );
        assert_eq!(rendered, "Fix the bug in src/lib.rs; keep {{other}}");
    }
}
