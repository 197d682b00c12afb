//! Ordered extraction tiers.
//!
//! A [`TierPipeline`] is a list of tiers tried in order until one yields a
//! record. Every attempt, successful or not, is reported to a
//! [`PipelineObserver`]. Tier failures never escape the pipeline; only the
//! exhaustion of every tier is an error.

use core::result::Result as CoreResult;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use thiserror::Error;

use cadence_core::{Error, RecoverLock as _, Result};

use crate::lenient::extract_plan;
use crate::repair::{RepairCollaborator, RepairContext};
use crate::schema::{MalformedOutput, RawPlan, RepairCaller, Schema};

/// Strategy used by a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TierKind {
    /// Parse the raw response against the schema
    Strict,
    /// Ask the model to fix the structure, then parse once
    Repair,
    /// Pattern-match steps out of the raw response (plans only)
    Lenient,
    /// Build a minimal record from local context
    Fallback,
}

impl TierKind {
    /// Stable name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::Repair => "repair",
            Self::Lenient => "lenient",
            Self::Fallback => "fallback",
        }
    }
}

impl fmt::Display for TierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a tier produced nothing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TierFailure {
    /// The text was not close enough to the schema
    #[error(transparent)]
    Malformed(#[from] MalformedOutput),
    /// The repair call itself failed
    #[error("repair collaborator unreachable: {0}")]
    RepairUnreachable(String),
    /// No usable step could be found
    #[error("no steps found")]
    NoSteps,
}

/// Result of one tier attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TierOutcome {
    /// The tier produced a record
    Succeeded,
    /// The tier failed and the next one was tried
    Failed(TierFailure),
}

impl TierOutcome {
    /// Returns true for [`TierOutcome::Succeeded`].
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

/// One observed tier attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierReport {
    /// Pipeline owner
    pub caller: RepairCaller,
    /// Tier that ran
    pub tier: TierKind,
    /// What happened
    pub outcome: TierOutcome,
    /// Wall time spent in the tier
    pub elapsed_ms: u64,
}

/// Receives tier reports as they happen.
pub trait PipelineObserver: Send + Sync {
    /// Called once per tier attempt.
    fn report(&self, report: &TierReport);
}

/// Emits tier reports as structured `tracing` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl PipelineObserver for TracingObserver {
    fn report(&self, report: &TierReport) {
        let caller = report.caller.as_str();
        let tier = report.tier.as_str();
        match &report.outcome {
            TierOutcome::Succeeded => tracing::info!(
                caller,
                tier,
                outcome = "success",
                elapsed_ms = report.elapsed_ms,
                "Extraction tier succeeded"
            ),
            TierOutcome::Failed(failure @ TierFailure::RepairUnreachable(_)) => tracing::warn!(
                caller,
                tier,
                outcome = "repair_unreachable",
                elapsed_ms = report.elapsed_ms,
                "{failure}"
            ),
            TierOutcome::Failed(failure) => tracing::debug!(
                caller,
                tier,
                outcome = "failed",
                elapsed_ms = report.elapsed_ms,
                "{failure}"
            ),
        }
    }
}

/// Keeps every report in memory.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    reports: Mutex<Vec<TierReport>>,
}

impl RecordingObserver {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports seen so far.
    pub fn reports(&self) -> Vec<TierReport> {
        self.reports.recover().clone()
    }

    /// Tiers that ran, in order.
    pub fn tiers(&self) -> Vec<TierKind> {
        self.reports
            .recover()
            .iter()
            .map(|report| report.tier)
            .collect()
    }
}

impl PipelineObserver for RecordingObserver {
    fn report(&self, report: &TierReport) {
        self.reports.recover().push(report.clone());
    }
}

/// Sends reports to several observers.
pub struct FanoutObserver {
    observers: Vec<Arc<dyn PipelineObserver>>,
}

impl FanoutObserver {
    /// Creates a fan-out over `observers`.
    pub fn new(observers: Vec<Arc<dyn PipelineObserver>>) -> Self {
        Self { observers }
    }
}

impl PipelineObserver for FanoutObserver {
    fn report(&self, report: &TierReport) {
        for observer in &self.observers {
            observer.report(report);
        }
    }
}

/// One extraction strategy.
#[async_trait]
pub trait ExtractionTier<R>: Send + Sync {
    /// Strategy of this tier.
    fn kind(&self) -> TierKind;

    /// Attempts to produce a record from the raw response.
    async fn attempt(&self, raw: &str) -> CoreResult<R, TierFailure>;
}

/// Parses the raw response with a schema.
pub struct StrictTier<S> {
    schema: S,
}

impl<S> StrictTier<S> {
    /// Creates a strict tier.
    pub const fn new(schema: S) -> Self {
        Self { schema }
    }
}

#[async_trait]
impl<S: Schema> ExtractionTier<S::Record> for StrictTier<S> {
    fn kind(&self) -> TierKind {
        TierKind::Strict
    }

    async fn attempt(&self, raw: &str) -> CoreResult<S::Record, TierFailure> {
        Ok(self.schema.parse_response(raw)?)
    }
}

/// Repairs the raw response once, then parses it with a schema.
pub struct RepairTier<S> {
    schema: S,
    collaborator: RepairCollaborator,
    role: Option<String>,
}

impl<S: Schema> RepairTier<S> {
    /// Creates a repair tier for `schema`.
    pub const fn new(schema: S, collaborator: RepairCollaborator) -> Self {
        Self {
            schema,
            collaborator,
            role: None,
        }
    }

    /// Selects a role-specific worked example.
    #[must_use]
    pub fn with_role(mut self, role: Option<String>) -> Self {
        self.role = role;
        self
    }
}

#[async_trait]
impl<S: Schema> ExtractionTier<S::Record> for RepairTier<S> {
    fn kind(&self) -> TierKind {
        TierKind::Repair
    }

    async fn attempt(&self, raw: &str) -> CoreResult<S::Record, TierFailure> {
        let context = RepairContext::new(self.schema.structure()).with_role(self.role.as_deref());
        let repaired = self
            .collaborator
            .repair(&context, raw)
            .await
            .map_err(|err| TierFailure::RepairUnreachable(err.to_string()))?;
        Ok(self.schema.parse_response(&repaired)?)
    }
}

/// Salvages plan steps by pattern.
#[derive(Debug, Clone, Copy, Default)]
pub struct LenientTier;

#[async_trait]
impl ExtractionTier<RawPlan> for LenientTier {
    fn kind(&self) -> TierKind {
        TierKind::Lenient
    }

    async fn attempt(&self, raw: &str) -> CoreResult<RawPlan, TierFailure> {
        let plan = extract_plan(raw);
        if plan.steps.is_empty() {
            return Err(TierFailure::NoSteps);
        }
        Ok(plan)
    }
}

/// Returns a prebuilt record regardless of the response.
pub struct FallbackTier<R> {
    record: Option<R>,
}

impl<R> FallbackTier<R> {
    /// Creates a fallback; `None` means no record can be built from local context.
    pub const fn new(record: Option<R>) -> Self {
        Self { record }
    }
}

#[async_trait]
impl<R: Clone + Send + Sync> ExtractionTier<R> for FallbackTier<R> {
    fn kind(&self) -> TierKind {
        TierKind::Fallback
    }

    async fn attempt(&self, _raw: &str) -> CoreResult<R, TierFailure> {
        self.record.clone().ok_or(TierFailure::NoSteps)
    }
}

/// Record produced by a pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineOutcome<R> {
    /// The record
    pub record: R,
    /// Tier that produced it
    pub tier: TierKind,
    /// Every attempt made, in order
    pub reports: Vec<TierReport>,
}

/// Ordered tiers for one caller.
pub struct TierPipeline<R> {
    caller: RepairCaller,
    tiers: Vec<Box<dyn ExtractionTier<R>>>,
    observer: Arc<dyn PipelineObserver>,
}

impl<R: Send + 'static> TierPipeline<R> {
    /// Creates an empty pipeline.
    pub fn new(caller: RepairCaller, observer: Arc<dyn PipelineObserver>) -> Self {
        Self {
            caller,
            tiers: Vec::new(),
            observer,
        }
    }

    /// Strict tier, plus the repair tier when a collaborator is given.
    pub fn for_schema<S>(
        schema: S,
        repair: Option<(RepairCollaborator, Option<String>)>,
        observer: Arc<dyn PipelineObserver>,
    ) -> Self
    where
        S: Schema<Record = R> + Clone + 'static,
    {
        let caller = schema.structure().caller;
        let pipeline = Self::new(caller, observer).with_tier(StrictTier::new(schema.clone()));
        match repair {
            Some((collaborator, role)) => {
                pipeline.with_tier(RepairTier::new(schema, collaborator).with_role(role))
            }
            None => pipeline,
        }
    }

    /// Appends a tier.
    #[must_use]
    pub fn with_tier(mut self, tier: impl ExtractionTier<R> + 'static) -> Self {
        self.tiers.push(Box::new(tier));
        self
    }

    /// Tier strategies, in the order they will run.
    pub fn tier_kinds(&self) -> Vec<TierKind> {
        self.tiers.iter().map(|tier| tier.kind()).collect()
    }

    /// Runs tiers in order until one succeeds.
    ///
    /// # Errors
    /// Returns [`Error::PlanEmpty`] when every tier fails.
    pub async fn run(&self, raw: &str) -> Result<PipelineOutcome<R>> {
        let mut reports = Vec::with_capacity(self.tiers.len());

        for tier in &self.tiers {
            let start = Instant::now();
            let attempt = tier.attempt(raw).await;
            let elapsed_ms = start.elapsed().as_millis() as u64;

            let (outcome, record) = match attempt {
                Ok(record) => (TierOutcome::Succeeded, Some(record)),
                Err(failure) => (TierOutcome::Failed(failure), None),
            };
            let report = TierReport {
                caller: self.caller,
                tier: tier.kind(),
                outcome,
                elapsed_ms,
            };
            self.observer.report(&report);
            reports.push(report);

            if let Some(record) = record {
                return Ok(PipelineOutcome {
                    record,
                    tier: tier.kind(),
                    reports,
                });
            }
        }

        Err(Error::PlanEmpty(format!(
            "every extraction tier of the {} failed",
            self.caller
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::PlanSchema;
    use cadence_core::ModelProvider;
    use cadence_providers::MockProvider;

    const GOOD_PLAN: &str =
        "summary: ok\nsteps:\n  - filePath: a.rs\n    operation:\n      type: modify\n";
    const BROKEN_PLAN: &str =
        "Plan\n    filePath: a.rs\n  type: modify\n      filePath: b.rs\nconfidence: 0.8";

    fn plan_pipeline(
        provider: &Arc<MockProvider>,
        observer: &Arc<RecordingObserver>,
    ) -> TierPipeline<RawPlan> {
        let model: Arc<dyn ModelProvider> = Arc::clone(provider) as Arc<dyn ModelProvider>;
        let collaborator = RepairCollaborator::new(model, 0.1);
        let fallback = RawPlan {
            summary: "fallback".to_owned(),
            ..RawPlan::default()
        };
        TierPipeline::for_schema(
            PlanSchema,
            Some((collaborator, None)),
            Arc::clone(observer) as Arc<dyn PipelineObserver>,
        )
        .with_tier(LenientTier)
        .with_tier(FallbackTier::new(Some(fallback)))
    }

    #[tokio::test]
    async fn test_strict_success_skips_later_tiers() {
        let provider = Arc::new(MockProvider::new());
        let observer = Arc::new(RecordingObserver::new());
        let outcome = plan_pipeline(&provider, &observer)
            .run(GOOD_PLAN)
            .await
            .expect("strict tier should succeed");

        assert_eq!(outcome.tier, TierKind::Strict);
        assert_eq!(observer.tiers(), vec![TierKind::Strict]);
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_repair_success_skips_lenient_and_fallback() {
        let provider = Arc::new(MockProvider::new().with_default_response(GOOD_PLAN));
        let observer = Arc::new(RecordingObserver::new());
        let outcome = plan_pipeline(&provider, &observer)
            .run("no structure here")
            .await
            .expect("repair tier should succeed");

        assert_eq!(outcome.tier, TierKind::Repair);
        assert_eq!(observer.tiers(), vec![TierKind::Strict, TierKind::Repair]);
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_repair_falls_through_to_lenient() {
        let provider = Arc::new(MockProvider::new().failing());
        let observer = Arc::new(RecordingObserver::new());
        let outcome = plan_pipeline(&provider, &observer)
            .run(BROKEN_PLAN)
            .await
            .expect("lenient tier should succeed");

        assert_eq!(outcome.tier, TierKind::Lenient);
        assert_eq!(outcome.record.steps.len(), 2);
        let reports = observer.reports();
        assert!(matches!(
            reports[1].outcome,
            TierOutcome::Failed(TierFailure::RepairUnreachable(_))
        ));
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_fallback_runs_last() {
        let provider = Arc::new(MockProvider::new().with_default_response("still nothing"));
        let observer = Arc::new(RecordingObserver::new());
        let outcome = plan_pipeline(&provider, &observer)
            .run("")
            .await
            .expect("fallback should succeed");

        assert_eq!(outcome.tier, TierKind::Fallback);
        assert_eq!(outcome.record.summary, "fallback");
        assert_eq!(outcome.reports.len(), 4);
    }

    #[tokio::test]
    async fn test_exhausted_pipeline_is_plan_empty() {
        let observer: Arc<dyn PipelineObserver> = Arc::new(RecordingObserver::new());
        let pipeline = TierPipeline::for_schema(PlanSchema, None, observer)
            .with_tier(LenientTier)
            .with_tier(FallbackTier::<RawPlan>::new(None));

        assert_eq!(
            pipeline.tier_kinds(),
            vec![TierKind::Strict, TierKind::Lenient, TierKind::Fallback]
        );
        let result = pipeline.run("nothing").await;
        assert!(matches!(result, Err(Error::PlanEmpty(_))));
    }

    #[test]
    fn test_fanout_reaches_every_observer() {
        let first = Arc::new(RecordingObserver::new());
        let second = Arc::new(RecordingObserver::new());
        let fanout = FanoutObserver::new(vec![
            Arc::clone(&first) as Arc<dyn PipelineObserver>,
            Arc::clone(&second) as Arc<dyn PipelineObserver>,
            Arc::new(TracingObserver),
        ]);
        fanout.report(&TierReport {
            caller: RepairCaller::TaskAnalyzer,
            tier: TierKind::Strict,
            outcome: TierOutcome::Succeeded,
            elapsed_ms: 1,
        });
        assert_eq!(first.reports().len(), 1);
        assert_eq!(second.tiers(), vec![TierKind::Strict]);
    }
}
