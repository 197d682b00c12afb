//! Properties that hold for every plan regardless of which tier produced it.

#![cfg_attr(
    test,
    allow(
        clippy::tests_outside_test_module,
        clippy::missing_panics_doc,
        clippy::expect_used,
        clippy::panic,
        clippy::assertions_on_result_states,
        reason = "Test file allows"
    )
)]

use std::path::Path;
use std::sync::Arc;

use cadence_agent::{
    GenerationContext, PipelineObserver, PlanSchema, RawOperation, RawPlan, RawStep,
    RecordingObserver, Schema as _, TaskAnalyzer, TierKind, extract_plan, normalize_path,
    normalize_plan,
};
use cadence_core::{ModelProvider, PipelineConfig, TaskAnalysis};
use cadence_providers::MockProvider;

const ROOT: &str = "/home/dev/project";

const PLAN_TEXTS: [&str; 3] = [
    "```plan
taskType: Bug Fix
summary: Guard the division
affectedFiles:
  - ./src/stats.rs
steps:
  - filePath: /home/dev/project/src/stats.rs
    priority: 2
    operation:
      type: modify
      content: |
        pub fn mean(values: &[f64]) -> Option<f64> {
            None
        }
  - filePath: tests\\stats.rs
    priority: 1
    operation:
      type: create
      content: |
        fn empty() {}
  - filePath: .
    priority: 3
    operation:
      type: terminal
      command: cargo test
```",
    "summary: Move the helpers
steps:
  - filePath: src/util.rs
    operation:
      type: rename
      newPath: src/helpers/mod.rs
  - filePath: src/old.rs
    operation:
      type: delete
  - filePath: src/lib.rs
    operation:
      type: modify
",
    "confidence: 100%
requiredFiles:
  - Cargo.toml
steps:
  - filePath: README.md
    priority: 5
    operation:
      type: modify
  - filePath: src/main.rs
    rationale: forgot the operation
  - filePath: docs/guide.md
    priority: 5
    operation:
      type: create
",
];

fn root() -> &'static Path {
    Path::new(ROOT)
}

fn parsed(text: &str) -> RawPlan {
    PlanSchema.parse_response(text).expect("plan text parses")
}

#[test]
fn test_normalizing_twice_is_identity() {
    for text in PLAN_TEXTS {
        let first = normalize_plan(&parsed(text), None, root()).plan;
        let second = normalize_plan(&RawPlan::from(&first), None, root()).plan;
        assert_eq!(first, second, "not idempotent for:\n{text}");
    }
}

#[test]
fn test_priorities_are_non_decreasing() {
    for text in PLAN_TEXTS {
        let plan = normalize_plan(&parsed(text), None, root()).plan;
        assert!(
            plan.steps
                .windows(2)
                .all(|pair| pair[0].priority <= pair[1].priority),
            "unsorted steps for:\n{text}"
        );
    }
}

#[test]
fn test_equal_priorities_keep_source_order() {
    let plan = normalize_plan(&parsed(PLAN_TEXTS[2]), None, root()).plan;
    let paths: Vec<&str> = plan.steps.iter().map(|step| step.file_path.as_str()).collect();
    assert_eq!(paths, vec!["README.md", "docs/guide.md"]);
    assert!((plan.confidence - 1.0).abs() < f64::EPSILON);
}

#[test]
fn test_paths_under_root_become_relative_forward_slash() {
    let absolute = [
        "/home/dev/project/src/main.rs",
        "/home/dev/project/./src/nested/../nested/mod.rs",
        "/home/dev/project//docs/guide.md",
        "\\home\\dev\\project\\src\\lib.rs",
    ];
    for path in absolute {
        let normalized = normalize_path(path, root());
        assert!(!normalized.starts_with('/'), "{path} -> {normalized}");
        assert!(!normalized.contains('\\'), "{path} -> {normalized}");
        assert!(
            !normalized.chars().nth(1).is_some_and(|ch| ch == ':'),
            "{path} -> {normalized}"
        );
        assert!(!normalized.is_empty());
    }

    let windows_root = Path::new("C:\\work\\app");
    let normalized = normalize_path("C:\\work\\app\\src\\main.rs", windows_root);
    assert_eq!(normalized, "src/main.rs");
}

#[test]
fn test_terminal_only_paths_never_affected() {
    let raw = RawPlan {
        affected_files: vec!["scripts".to_owned(), "src/lib.rs".to_owned()],
        steps: vec![
            RawStep {
                file_path: Some("scripts".to_owned()),
                operation: Some(RawOperation {
                    kind: "terminal".to_owned(),
                    command: Some("./check.sh".to_owned()),
                    ..RawOperation::default()
                }),
                ..RawStep::default()
            },
            RawStep {
                file_path: Some("src/lib.rs".to_owned()),
                operation: Some(RawOperation {
                    kind: "modify".to_owned(),
                    ..RawOperation::default()
                }),
                ..RawStep::default()
            },
        ],
        ..RawPlan::default()
    };

    let plan = normalize_plan(&raw, None, root()).plan;
    assert!(!plan.affected_files.contains("scripts"));
    assert!(plan.affected_files.contains("src/lib.rs"));

    for text in PLAN_TEXTS {
        let plan = normalize_plan(&parsed(text), None, root()).plan;
        for step in plan.terminal_steps() {
            let also_file_step = plan
                .file_steps()
                .any(|file_step| file_step.file_path == step.file_path);
            assert!(also_file_step || !plan.affected_files.contains(&step.file_path));
        }
    }
}

#[test]
fn test_steps_without_operation_are_dropped_with_diagnostic() {
    let normalized = normalize_plan(&parsed(PLAN_TEXTS[2]), None, root());
    assert_eq!(normalized.plan.steps.len(), 2);
    assert_eq!(normalized.diagnostics.len(), 1);
    assert!(normalized.diagnostics[0].starts_with("step 2"));
}

#[test]
fn test_analysis_fills_missing_plan_fields() {
    let analysis = TaskAnalysis {
        summary: "Speed up startup\nby caching".to_owned(),
        required_files: vec!["src/config.rs".to_owned()],
        ..TaskAnalysis::default()
    };
    let plan = normalize_plan(&parsed(PLAN_TEXTS[1]), Some(&analysis), root()).plan;
    assert_eq!(plan.summary, "Move the helpers");
    assert!(plan.required_files.contains("src/config.rs"));
    assert!(plan.affected_files.contains("src/helpers/mod.rs"));
}

#[test]
fn test_mid_line_file_path_does_not_split_steps() {
    let raw = "Steps
filePath: src/parser.rs
type: modify
rationale: Callers in filePath: src/lexer.rs must be updated too
filePath: src/lexer.rs
type: modify";
    let plan = extract_plan(raw);
    assert_eq!(plan.steps.len(), 2);
    assert_eq!(plan.steps[0].file_path.as_deref(), Some("src/parser.rs"));
    assert!(plan.steps[0].rationale.contains("filePath: src/lexer.rs"));
    assert_eq!(plan.steps[1].file_path.as_deref(), Some("src/lexer.rs"));
}

#[test]
fn test_strict_tier_keeps_key_shaped_list_items() {
    let cases = [
        ("Note: callers break", "Note: callers break"),
        ("\"two: quoted\"", "two: quoted"),
        ("'Caveat: a: b'", "Caveat: a: b"),
        ("Run: cargo test", "Run: cargo test"),
        ("cargo test -- --exact api::tests", "cargo test -- --exact api::tests"),
    ];
    for (item, expected) in cases {
        let text = format!(
            "summary: Keep everything
risks:
  - first
  - {item}
verificationSteps:
  - {item}
steps:
  - filePath: src/lib.rs
    risks:
      - {item}
    operation:
      type: modify
"
        );
        let plan = parsed(&text);
        assert_eq!(plan.risks, vec!["first", expected], "plan risks for {item:?}");
        assert_eq!(plan.verification_steps, vec![expected], "verification for {item:?}");
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].risks, vec![expected], "step risks for {item:?}");
    }
}

#[test]
fn test_unicode_whitespace_survives_indented_fences() {
    let cases = [
        ("\u{3000}indented", "\u{3000}indented\n"),
        ("\u{a0}\u{a0}nbsp", "\u{a0}\u{a0}nbsp\n"),
        ("\u{2003}em space", "\u{2003}em space\n"),
    ];
    for (line, expected) in cases {
        let text = format!(
            "  ```plan
  summary: Wide spaces
  steps:
    - filePath: notes.txt
      operation:
        type: create
        content: |
          {line}
  ```"
        );
        let plan = parsed(&text);
        assert_eq!(plan.summary, "Wide spaces");
        let content = plan.steps[0]
            .operation
            .as_ref()
            .and_then(|operation| operation.content.as_deref());
        assert_eq!(content, Some(expected), "content for {line:?}");
    }
}

#[tokio::test]
async fn test_each_tier_stops_the_escalation() {
    let good = "## Summary\nShip it\n\n## Task Type\ntesting";
    let cases = [
        // strict succeeds: no repair call
        (good, good, vec![TierKind::Strict], 1),
        // repair succeeds: fallback never consulted
        ("Summary: ship it", good, vec![TierKind::Strict, TierKind::Repair], 2),
        // nothing parses: fallback is last
        (
            "no idea",
            "still no idea",
            vec![TierKind::Strict, TierKind::Repair, TierKind::Fallback],
            2,
        ),
    ];

    for (first, repaired, expected_tiers, expected_calls) in cases {
        let provider = Arc::new(MockProvider::new().with_sequence([first, repaired]));
        let observer = Arc::new(RecordingObserver::new());
        let generation = GenerationContext::new(
            Arc::clone(&provider) as Arc<dyn ModelProvider>,
            &PipelineConfig::default(),
        )
        .with_observer(Arc::clone(&observer) as Arc<dyn PipelineObserver>);

        let result = TaskAnalyzer::new(generation)
            .analyze("Ship it", Vec::new())
            .await
            .expect("analysis");

        assert_eq!(observer.tiers(), expected_tiers);
        assert_eq!(result.tier, *expected_tiers.last().expect("a tier ran"));
        assert_eq!(provider.call_count(), expected_calls);
    }
}

#[tokio::test]
async fn test_repair_disabled_skips_straight_to_fallback() {
    let provider = Arc::new(MockProvider::new().with_default_response("no idea"));
    let observer = Arc::new(RecordingObserver::new());
    let config = PipelineConfig {
        repair_enabled: false,
        ..PipelineConfig::default()
    };
    let generation = GenerationContext::new(
        Arc::clone(&provider) as Arc<dyn ModelProvider>,
        &config,
    )
    .with_observer(Arc::clone(&observer) as Arc<dyn PipelineObserver>);

    let result = TaskAnalyzer::new(generation)
        .analyze("Ship it", Vec::new())
        .await
        .expect("analysis");
    assert_eq!(result.tier, TierKind::Fallback);
    assert_eq!(observer.tiers(), vec![TierKind::Strict, TierKind::Fallback]);
    assert_eq!(provider.call_count(), 1);
}

#[tokio::test]
async fn test_repair_keeps_the_content() {
    let summary = "The cache is rebuilt on every request, which dominates latency for large workspaces.";
    let finding = "Cache invalidation ignores the config file, so stale entries survive edits.";
    let recommendation = "Key the cache on the config hash and rebuild lazily.";
    let malformed = format!(
        "Summary - {summary}\nProblem ({finding})\nWhat to do: {recommendation}\nConfidence 0.7"
    );
    let repaired = format!(
        "## Summary\n{summary}\n\n## Findings\n### Medium\nTitle: Stale cache\nDetail: {finding}\n\n\
         ## Recommendations\n- {recommendation}\n\n**Confidence:** 0.7"
    );
    let provider = Arc::new(MockProvider::new().with_sequence([malformed.clone(), repaired]));
    let generation = GenerationContext::new(
        Arc::clone(&provider) as Arc<dyn ModelProvider>,
        &PipelineConfig::default(),
    );

    let result = TaskAnalyzer::new(generation)
        .analyze("Why is it slow?", Vec::new())
        .await
        .expect("analysis");
    assert_eq!(result.tier, TierKind::Repair);

    let analysis = &result.analysis;
    let kept = analysis.summary.len()
        + analysis
            .findings
            .iter()
            .map(|finding| finding.detail.len())
            .sum::<usize>()
        + analysis
            .recommendations
            .iter()
            .map(String::len)
            .sum::<usize>();
    let original = summary.len() + finding.len() + recommendation.len();
    let difference = kept.abs_diff(original);
    assert!(
        difference * 20 <= original,
        "kept {kept} chars of {original}"
    );
    assert!(provider.calls()[1].query.contains(finding));
}
