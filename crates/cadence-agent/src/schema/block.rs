//! Parser for indentation-nested `key: value` text.
//!
//! This is a small, forgiving subset of block-style YAML: maps, `- ` lists,
//! `|` literal blocks, inline `[a, b]` lists and quoted scalars. Lines that
//! are not a key, a list item, or part of a literal block are skipped, as are
//! lines indented deeper than anything that could own them. Top-level keys
//! must sit at the document's minimum indentation.

use regex::Regex;
use std::sync::LazyLock;

use crate::extraction::{indent_width, strip_indent};

/// A bare, double-quoted or single-quoted key, then `:` and an optional value.
static KEY: LazyLock<Regex> = LazyLock::new(|| {
    match Regex::new(
        r#"^(?:"([A-Za-z_][A-Za-z0-9_-]*)"|'([A-Za-z_][A-Za-z0-9_-]*)'|([A-Za-z_][A-Za-z0-9_-]*))\s*:(?:\s+(.*)|\s*)$"#,
    ) {
        Ok(regex) => regex,
        Err(err) => panic!("Key regex is invalid: {err}"),
    }
});

/// A parsed value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockValue {
    /// Single-line or literal-block text
    Scalar(String),
    /// `- ` items
    List(Vec<BlockValue>),
    /// Nested keys
    Map(BlockMap),
}

impl BlockValue {
    /// Scalar text, if this is a scalar.
    #[must_use]
    pub fn as_scalar(&self) -> Option<&str> {
        match self {
            Self::Scalar(text) => Some(text),
            Self::List(_) | Self::Map(_) => None,
        }
    }

    /// Nested map, if this is a map.
    #[must_use]
    pub const fn as_map(&self) -> Option<&BlockMap> {
        match self {
            Self::Map(map) => Some(map),
            Self::Scalar(_) | Self::List(_) => None,
        }
    }

    /// Items of a list as text; a non-empty scalar counts as a one-item list.
    ///
    /// Items that parsed as maps, such as `- Note: callers break`, come back
    /// as their `key: value` text.
    #[must_use]
    pub fn string_list(&self) -> Vec<String> {
        match self {
            Self::List(items) => items
                .iter()
                .map(Self::render_inline)
                .filter(|item| !item.is_empty())
                .collect(),
            Self::Scalar(text) if !text.trim().is_empty() => vec![text.trim().to_owned()],
            Self::Scalar(_) | Self::Map(_) => Vec::new(),
        }
    }

    fn render_inline(&self) -> String {
        match self {
            Self::Scalar(text) => text.trim().to_owned(),
            Self::List(items) => {
                let rendered: Vec<String> = items.iter().map(Self::render_inline).collect();
                format!("[{}]", rendered.join(", "))
            }
            Self::Map(map) => map
                .entries
                .iter()
                .map(|(key, value)| match value.render_inline() {
                    rendered if rendered.is_empty() => format!("{key}:"),
                    rendered => format!("{key}: {rendered}"),
                })
                .collect::<Vec<_>>()
                .join(", "),
        }
    }
}

/// Ordered key/value pairs; lookups ignore case, `_` and `-`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockMap {
    entries: Vec<(String, BlockValue)>,
}

impl BlockMap {
    /// First value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&BlockValue> {
        let wanted = fold_key(key);
        self.entries
            .iter()
            .find(|(name, _)| fold_key(name) == wanted)
            .map(|(_, value)| value)
    }

    /// Whether `key` is present.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Trimmed scalar under `key`, `None` when absent or empty.
    #[must_use]
    pub fn scalar(&self, key: &str) -> Option<&str> {
        self.get(key)
            .and_then(BlockValue::as_scalar)
            .map(str::trim)
            .filter(|text| !text.is_empty())
    }

    /// Scalar list under `key`; empty when absent.
    #[must_use]
    pub fn list(&self, key: &str) -> Vec<String> {
        self.get(key).map(BlockValue::string_list).unwrap_or_default()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no entries were parsed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn push(&mut self, key: String, value: BlockValue) {
        self.entries.push((key, value));
    }
}

fn fold_key(key: &str) -> String {
    key.chars()
        .filter(|ch| *ch != '_' && *ch != '-')
        .flat_map(char::to_lowercase)
        .collect()
}

/// Parses a document into its top-level map.
#[must_use]
pub fn parse_block(text: &str) -> BlockMap {
    let mut parser = BlockParser::new(text);
    let Some(indent) = parser.min_indent() else {
        return BlockMap::default();
    };

    let mut document = BlockMap::default();
    loop {
        let parsed = parser.parse_map(indent);
        document.entries.extend(parsed.entries);
        // A top-level list item or stray line stopped the map; skip it and go on.
        if parser.next_content().is_none() {
            break;
        }
        parser.pos += 1;
    }
    document
}

#[derive(Debug, Clone, Copy)]
struct Line<'text> {
    indent: usize,
    content: &'text str,
}

impl Line<'_> {
    fn is_blank(&self) -> bool {
        self.content.is_empty() || self.content.starts_with('#')
    }

    fn list_item(&self) -> Option<&str> {
        if self.content == "-" {
            return Some("");
        }
        self.content.strip_prefix("- ")
    }
}

struct BlockParser<'text> {
    lines: Vec<Line<'text>>,
    raw: Vec<&'text str>,
    pos: usize,
}

impl<'text> BlockParser<'text> {
    fn new(text: &'text str) -> Self {
        let raw: Vec<&str> = text.lines().collect();
        let lines = raw
            .iter()
            .map(|line| {
                let content = strip_indent(line, usize::MAX);
                let indent = content_columns(line);
                Line {
                    indent,
                    content: content.trim_end(),
                }
            })
            .collect();
        Self { lines, raw, pos: 0 }
    }

    fn min_indent(&self) -> Option<usize> {
        self.lines
            .iter()
            .filter(|line| !line.is_blank())
            .map(|line| line.indent)
            .min()
    }

    /// Next non-blank line, advancing past blanks.
    fn next_content(&mut self) -> Option<Line<'text>> {
        while let Some(line) = self.lines.get(self.pos) {
            if !line.is_blank() {
                return Some(*line);
            }
            self.pos += 1;
        }
        None
    }

    fn parse_map(&mut self, indent: usize) -> BlockMap {
        let mut map = BlockMap::default();
        while let Some(line) = self.next_content() {
            if line.indent < indent {
                break;
            }
            if line.indent > indent {
                self.pos += 1;
                continue;
            }
            if line.list_item().is_some() {
                break;
            }
            self.pos += 1;
            if let Some((key, value)) = split_key(line.content) {
                let parsed = self.parse_value(indent, value);
                map.push(key, parsed);
            }
        }
        map
    }

    fn parse_list(&mut self, indent: usize) -> Vec<BlockValue> {
        let mut items = Vec::new();
        while let Some(line) = self.next_content() {
            if line.indent < indent {
                break;
            }
            if line.indent > indent {
                self.pos += 1;
                continue;
            }
            let Some(rest) = line.list_item() else {
                break;
            };
            self.pos += 1;

            let trimmed = rest.trim_start_matches([' ', '\t']);
            let item_indent = indent + (line.content.len() - trimmed.len());

            let item = if trimmed.is_empty() {
                self.parse_value(indent, "")
            } else if let Some((key, value)) = split_key(trimmed) {
                let mut map = BlockMap::default();
                let first = self.parse_value(item_indent, value);
                map.push(key, first);
                map.entries.extend(self.parse_map(item_indent).entries);
                BlockValue::Map(map)
            } else {
                BlockValue::Scalar(unquote(trimmed))
            };
            items.push(item);
        }
        items
    }

    /// Parses the value of a key whose line sits at `owner_indent`.
    fn parse_value(&mut self, owner_indent: usize, inline: &str) -> BlockValue {
        let inline = inline.trim();
        if matches!(inline, "|" | "|-" | "|+" | ">" | ">-") {
            return BlockValue::Scalar(self.literal_block(owner_indent, inline.starts_with('>')));
        }
        if !inline.is_empty() {
            return inline_value(inline);
        }

        let Some(next) = self.next_content() else {
            return BlockValue::Scalar(String::new());
        };
        if next.indent > owner_indent {
            if next.list_item().is_some() {
                BlockValue::List(self.parse_list(next.indent))
            } else {
                BlockValue::Map(self.parse_map(next.indent))
            }
        } else if next.indent == owner_indent && next.list_item().is_some() {
            BlockValue::List(self.parse_list(owner_indent))
        } else {
            BlockValue::Scalar(String::new())
        }
    }

    /// Collects raw lines indented deeper than the owner, keeping relative indentation.
    fn literal_block(&mut self, owner_indent: usize, folded: bool) -> String {
        let start = self.pos;
        let mut end = start;
        while let Some(line) = self.lines.get(end) {
            if !line.content.is_empty() && line.indent <= owner_indent {
                break;
            }
            end += 1;
        }
        self.pos = end;

        let body = &self.raw[start..end];
        let block_indent = body
            .iter()
            .filter(|line| !line.trim().is_empty())
            .map(|line| indent_width(line))
            .min()
            .unwrap_or(0);

        let mut kept: Vec<&str> = body
            .iter()
            .map(|line| strip_indent(line, block_indent).trim_end_matches('\r'))
            .collect();
        while kept.last().is_some_and(|line| line.trim().is_empty()) {
            kept.pop();
        }
        if kept.is_empty() {
            return String::new();
        }

        let separator = if folded { " " } else { "\n" };
        let mut text = kept.join(separator);
        text.push('\n');
        text
    }
}

/// Columns of leading indentation, a tab counting two.
fn content_columns(line: &str) -> usize {
    line.chars()
        .take_while(|ch| matches!(ch, ' ' | '\t'))
        .map(|ch| if ch == '\t' { 2 } else { 1 })
        .sum()
}

/// Splits `key: value`; `None` when the line is not a key.
fn split_key(content: &str) -> Option<(String, &str)> {
    let captures = KEY.captures(content)?;
    let key = captures
        .get(1)
        .or_else(|| captures.get(2))
        .or_else(|| captures.get(3))?
        .as_str()
        .to_owned();
    let value = captures.get(4).map_or("", |value| value.as_str());
    Some((key, value))
}

fn inline_value(text: &str) -> BlockValue {
    if let Some(inner) = text.strip_prefix('[').and_then(|rest| rest.strip_suffix(']')) {
        return BlockValue::List(
            inner
                .split(',')
                .map(unquote)
                .filter(|item| !item.is_empty())
                .map(BlockValue::Scalar)
                .collect(),
        );
    }
    BlockValue::Scalar(unquote(text))
}

/// Removes one pair of matching surrounding quotes or backticks.
fn unquote(text: &str) -> String {
    let trimmed = text.trim();
    for quote in ['"', '\'', '`'] {
        if trimmed.len() >= 2 && trimmed.starts_with(quote) && trimmed.ends_with(quote) {
            return trimmed[1..trimmed.len() - 1].to_owned();
        }
    }
    trimmed.to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalars_and_lists() {
        let map = parse_block("summary: Fix it\nrisks:\n  - one\n  - \"two: quoted\"\nempty:\n");
        assert_eq!(map.scalar("summary"), Some("Fix it"));
        assert_eq!(map.list("risks"), vec!["one", "two: quoted"]);
        assert!(map.contains("empty"));
        assert_eq!(map.scalar("empty"), None);
    }

    #[test]
    fn test_list_at_same_indent_as_key() {
        let map = parse_block("steps:\n- filePath: a.rs\n  priority: 2\n- filePath: b.rs\n");
        let Some(BlockValue::List(steps)) = map.get("steps") else {
            panic!("steps should be a list");
        };
        assert_eq!(steps.len(), 2);
        let first = steps[0].as_map().expect("map item");
        assert_eq!(first.scalar("filePath"), Some("a.rs"));
        assert_eq!(first.scalar("priority"), Some("2"));
    }

    #[test]
    fn test_nested_maps_and_literal_block() {
        let text = "steps:\n  - filePath: src/main.rs\n    operation:\n      type: create\n      content: |\n        fn main() {\n\n            println!(\"hi\");\n        }\n      reason: entry\n";
        let map = parse_block(text);
        let Some(BlockValue::List(steps)) = map.get("steps") else {
            panic!("steps should be a list");
        };
        let step = steps[0].as_map().expect("map item");
        let operation = step.get("operation").and_then(BlockValue::as_map).expect("operation");
        assert_eq!(operation.scalar("type"), Some("create"));
        assert_eq!(operation.scalar("reason"), Some("entry"));
        let content = operation.get("content").and_then(BlockValue::as_scalar);
        assert_eq!(
            content,
            Some("fn main() {\n\n    println!(\"hi\");\n}\n")
        );
    }

    #[test]
    fn test_keys_are_case_and_separator_insensitive() {
        let map = parse_block("file_path: a\nWorking-Directory: b");
        assert_eq!(map.scalar("filePath"), Some("a"));
        assert_eq!(map.scalar("workingDirectory"), Some("b"));
    }

    #[test]
    fn test_inline_list() {
        let map = parse_block("dependencies: [src/a.rs, 'src/b.rs']");
        assert_eq!(map.list("dependencies"), vec!["src/a.rs", "src/b.rs"]);
    }

    #[test]
    fn test_prose_and_comments_skipped() {
        let map = parse_block("Here is the plan you asked for.\n# comment\nsummary: ok\nNote that C:\\dir is odd");
        assert_eq!(map.len(), 1);
        assert_eq!(map.scalar("summary"), Some("ok"));
    }

    #[test]
    fn test_over_indented_keys_are_not_top_level() {
        let map = parse_block("confidence: 0.8\n   steps:\n - filePath: a.rs\n");
        assert!(!map.contains("steps"));
        assert_eq!(map.scalar("confidence"), Some("0.8"));
    }

    #[test]
    fn test_top_level_list_item_does_not_stop_parsing() {
        let map = parse_block("- stray item\nsummary: after");
        assert_eq!(map.scalar("summary"), Some("after"));
    }

    #[test]
    fn test_key_shaped_list_items_keep_their_text() {
        let cases = [
            ("  - \"two: quoted\"", "two: quoted"),
            ("  - 'single: quoted'", "single: quoted"),
            ("  - Note: callers break", "Note: callers break"),
            ("  - Run: cargo test", "Run: cargo test"),
            ("  - Caveat: a: b", "Caveat: a: b"),
            ("  - Pending:", "Pending:"),
        ];
        for (item, expected) in cases {
            let map = parse_block(&format!("risks:\n  - first\n{item}\n  - last"));
            assert_eq!(map.list("risks"), vec!["first", expected, "last"], "item {item:?}");
        }
    }

    #[test]
    fn test_quoted_keys_need_matching_quotes() {
        let map = parse_block("\"summary\": ok\n'confidence': 0.5\n\"broken': no");
        assert_eq!(map.scalar("summary"), Some("ok"));
        assert_eq!(map.scalar("confidence"), Some("0.5"));
        assert!(!map.contains("broken"));
    }

    #[test]
    fn test_literal_block_with_unicode_whitespace() {
        let text = "content: |\n  \u{3000}a\n   \u{3000}c\n  \u{a0}d\nnext: x";
        let map = parse_block(text);
        assert_eq!(
            map.get("content").and_then(BlockValue::as_scalar),
            Some("\u{3000}a\n \u{3000}c\n\u{a0}d\n")
        );
        assert_eq!(map.scalar("next"), Some("x"));
    }

    #[test]
    fn test_unicode_leading_whitespace_is_not_indentation() {
        let map = parse_block("summary: ok\n\u{3000}stray: line\nrisks:\n  - \u{3000}wide");
        assert_eq!(map.scalar("summary"), Some("ok"));
        assert!(!map.contains("stray"));
        assert_eq!(map.list("risks"), vec!["wide"]);
    }

    #[test]
    fn test_empty_document() {
        assert!(parse_block("").is_empty());
        assert!(parse_block("\n\n   \n").is_empty());
    }

    #[test]
    fn test_scalar_item_list_of_commands() {
        let map = parse_block("verificationSteps:\n  - cargo test -- --nocapture\n  - `cargo clippy`");
        assert_eq!(
            map.list("verificationSteps"),
            vec!["cargo test -- --nocapture", "cargo clippy"]
        );
    }
}
