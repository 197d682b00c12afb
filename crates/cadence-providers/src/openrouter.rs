use std::iter;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};

use cadence_core::{
    Context, Error, ModelProvider, ProviderConfig, Query, Response, Result, TokenUsage,
};

/// Env var key for `OpenRouter` API key.
const ENV_OPENROUTER_API_KEY: &str = "OPENROUTER_API_KEY";

/// Provider implementation for `OpenRouter` and other OpenAI-compatible chat endpoints.
pub struct OpenRouterProvider {
    /// HTTP client for API requests.
    client: Client,
    /// API key sent as a bearer token.
    api_key: String,
    /// Model name to use.
    model: String,
    /// Chat completions endpoint.
    base_url: String,
    /// Completion token cap used when the query sets none.
    max_tokens: u32,
}

impl OpenRouterProvider {
    /// Creates a provider from the `[provider]` config section and a resolved API key.
    ///
    /// # Errors
    /// Returns an error if the API key is missing or empty, or the HTTP client cannot be built.
    pub fn from_config(config: &ProviderConfig, api_key: Option<String>) -> Result<Self> {
        let api_key = api_key
            .filter(|key| !key.is_empty())
            .ok_or_else(|| {
                Error::MissingApiKey(format!(
                    "{ENV_OPENROUTER_API_KEY} or config.toml provider.api_key"
                ))
            })?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            base_url: config.base_url.clone(),
            max_tokens: config.max_tokens,
        })
    }

    /// Sets the model to use for generation.
    #[must_use]
    pub fn with_model(mut self, model: String) -> Self {
        self.model = model;
        self
    }

    /// System prompt first, then the context files (if any) as a user turn,
    /// then the request itself.
    fn chat_turns(context: &Context, query: &Query) -> Vec<Value> {
        let files = (!context.files.is_empty()).then(|| {
            json!({
                "role": "user",
                "content": format!("Context:\n{}", context.files_to_string()),
            })
        });
        iter::once(json!({ "role": "system", "content": context.system_prompt }))
            .chain(files)
            .chain(iter::once(json!({ "role": "user", "content": query.text })))
            .collect()
    }

    /// Builds the request body, applying the query's sampling settings.
    fn build_body(&self, context: &Context, query: &Query) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": Self::chat_turns(context, query),
            "max_tokens": query.generation.max_tokens.unwrap_or(self.max_tokens),
        });
        if let Some(temperature) = query.generation.temperature {
            body["temperature"] = json!(temperature);
        }
        body
    }
}

/// Body of a chat completion reply; unknown fields are ignored.
#[derive(Deserialize)]
struct ChatResponse {
    /// Only the first entry is read.
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: Message,
    /// `stop`, `length`, ...
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct Message {
    /// Null when the model produced only tool calls.
    #[serde(default)]
    content: Option<String>,
}

/// Billed token counts.
#[derive(Deserialize)]
struct Usage {
    /// Includes cached tokens.
    prompt_tokens: u64,
    completion_tokens: u64,
    #[serde(default)]
    prompt_tokens_details: Option<PromptTokensDetails>,
}

#[derive(Deserialize)]
struct PromptTokensDetails {
    #[serde(default)]
    cached_tokens: u64,
}

#[async_trait]
impl ModelProvider for OpenRouterProvider {
    fn name(&self) -> &'static str {
        "openrouter"
    }

    async fn is_available(&self) -> bool {
        !self.api_key.is_empty()
    }

    async fn generate(&self, query: &Query, context: &Context) -> Result<Response> {
        let start = Instant::now();
        let request_body = self.build_body(context, query);

        tracing::debug!(
            "Sending request to {} (model {}, temperature {:?})",
            self.base_url,
            self.model,
            query.generation.temperature
        );

        let response = self
            .client
            .post(&self.base_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .header("X-Title", "cadence")
            .json(&request_body)
            .send()
            .await
            .map_err(|err| Error::Provider(format!("Request failed: {err}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(Error::Provider(format!(
                "Chat completion request failed with status {status}: {error_text}"
            )));
        }

        let api_response: ChatResponse = response
            .json()
            .await
            .map_err(|err| Error::InvalidResponse(format!("Failed to parse response: {err}")))?;

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::InvalidResponse("Response contained no choices".to_owned()))?;

        let tokens_used = if let Some(usage) = api_response.usage {
            let cache_read = usage
                .prompt_tokens_details
                .as_ref()
                .map_or(0, |details| details.cached_tokens);

            TokenUsage {
                input: usage.prompt_tokens.saturating_sub(cache_read),
                output: usage.completion_tokens,
                cache_read,
                cache_write: 0,
            }
        } else {
            TokenUsage::default()
        };

        Ok(Response {
            text: choice.message.content.unwrap_or_default(),
            confidence: 1.0,
            tokens_used,
            provider: self.name().to_owned(),
            latency_ms: start.elapsed().as_millis() as u64,
            finish_reason: choice.finish_reason,
        })
    }

    fn estimate_cost(&self, context: &Context) -> f64 {
        let tokens = context.token_estimate() as f64;
        tokens * 3.0 / 1_000_000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::{FileContext, GenerationConfig};
    use std::path::PathBuf;

    fn provider() -> OpenRouterProvider {
        match OpenRouterProvider::from_config(
            &ProviderConfig::default(),
            Some("test_key".to_owned()),
        ) {
            Ok(provider) => provider,
            Err(error) => panic!("provider should build: {error}"),
        }
    }

    #[test]
    fn test_missing_api_key() {
        for key in [None, Some(String::new())] {
            let result = OpenRouterProvider::from_config(&ProviderConfig::default(), key);
            assert!(matches!(result, Err(Error::MissingApiKey(_))));
        }
    }

    #[test]
    fn test_config_values_applied() {
        let provider = provider().with_model("custom-model".to_owned());
        assert_eq!(provider.model, "custom-model");
        assert_eq!(provider.max_tokens, 4096);
        assert!(provider.base_url.contains("chat/completions"));
        assert_eq!(provider.name(), "openrouter");
    }

    #[test]
    fn test_cost_estimation_scaling() {
        let provider = provider();
        let small = provider.estimate_cost(&Context::new("small"));
        let large = provider.estimate_cost(&Context::new("large ".repeat(100)));
        assert!(large > small);
    }

    #[test]
    fn test_context_files_become_their_own_turn() {
        let query = Query::new("user question");

        let bare = OpenRouterProvider::chat_turns(&Context::new("system text"), &query);
        let roles: Vec<_> = bare.iter().filter_map(|turn| turn["role"].as_str()).collect();
        assert_eq!(roles, ["system", "user"]);

        let context = Context::new("system text").with_files(vec![FileContext::new(
            PathBuf::from("src/lib.rs"),
            "pub mod app;".to_owned(),
        )]);
        let turns = OpenRouterProvider::chat_turns(&context, &query);
        assert_eq!(turns.len(), 3);
        let files = turns[1]["content"].as_str().unwrap_or_default();
        assert!(files.starts_with("Context:\n"));
        assert!(files.contains("pub mod app;"));
        assert_eq!(turns[2]["content"].as_str(), Some("user question"));
    }

    #[test]
    fn test_body_carries_sampling_settings() {
        let provider = provider();
        let query = Query::new("fix").with_generation(GenerationConfig {
            temperature: Some(0.1),
            max_tokens: Some(256),
        });

        let body = provider.build_body(&Context::new("system"), &query);
        assert_eq!(body["max_tokens"], 256);
        let temperature = body["temperature"].as_f64().unwrap_or_default();
        assert!((temperature - 0.1).abs() < 1e-6);

        let plain = provider.build_body(&Context::new("system"), &Query::new("plain"));
        assert_eq!(plain["max_tokens"], 4096);
        assert!(plain.get("temperature").is_none());
    }
}
