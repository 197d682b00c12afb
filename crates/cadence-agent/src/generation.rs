use std::sync::Arc;

use cadence_core::prompts::{load_prompt, render_prompt};
use cadence_core::{
    Context, Error, FileContext, GenerationConfig, ModelProvider, PipelineConfig, Query, Result,
};

use crate::pipeline::{PipelineObserver, TierPipeline, TracingObserver};
use crate::repair::RepairCollaborator;
use crate::schema::{ExpectedStructure, Schema};

/// Everything a subsystem needs to ask the model for a structured record.
#[derive(Clone)]
pub struct GenerationContext {
    provider: Arc<dyn ModelProvider>,
    observer: Arc<dyn PipelineObserver>,
    repair: Option<RepairCollaborator>,
    temperature: f32,
    fallback_confidence: f64,
}

impl GenerationContext {
    /// Creates a context from the `[pipeline]` config section.
    pub fn new(provider: Arc<dyn ModelProvider>, config: &PipelineConfig) -> Self {
        let repair = config
            .repair_enabled
            .then(|| RepairCollaborator::new(Arc::clone(&provider), config.repair_temperature));
        Self {
            provider,
            observer: Arc::new(TracingObserver),
            repair,
            temperature: config.generation_temperature,
            fallback_confidence: config.fallback_confidence,
        }
    }

    /// Replaces the tier observer.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Confidence given to deterministic fallback records.
    pub const fn fallback_confidence(&self) -> f64 {
        self.fallback_confidence
    }

    /// Strict and, when enabled, repair tiers for `schema`.
    pub(crate) fn pipeline<S>(&self, schema: S, role: Option<String>) -> TierPipeline<S::Record>
    where
        S: Schema + Clone + 'static,
        S::Record: 'static,
    {
        let repair = self
            .repair
            .as_ref()
            .map(|collaborator| (collaborator.clone(), role));
        TierPipeline::for_schema(schema, repair, Arc::clone(&self.observer))
    }

    /// Makes the primary generation call and returns the raw response text.
    ///
    /// # Errors
    /// Returns an error when the prompt cannot be loaded or the provider call fails.
    pub(crate) async fn generate(
        &self,
        prompt_name: &str,
        structure: &ExpectedStructure,
        user_text: String,
        files: Vec<FileContext>,
    ) -> Result<String> {
        let template = load_prompt(prompt_name).map_err(Error::Prompt)?;
        let system_prompt = render_prompt(&template, &[("structure", &structure.render())]);
        let context = Context::new(system_prompt).with_files(files);
        let query = Query::new(user_text)
            .with_generation(GenerationConfig::deterministic(self.temperature));

        let response = self.provider.generate(&query, &context).await?;
        tracing::debug!(
            caller = structure.caller.as_str(),
            provider = %response.provider,
            latency_ms = response.latency_ms,
            tokens = response.tokens_used.total(),
            "Generation finished"
        );
        if response.finish_reason.as_deref() == Some("length") {
            tracing::warn!(
                caller = structure.caller.as_str(),
                "Response hit the token limit and may be truncated"
            );
        }
        Ok(response.text)
    }
}
