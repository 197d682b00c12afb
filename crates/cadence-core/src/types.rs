use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Sampling parameters forwarded to the model provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Sampling temperature; `None` leaves the provider default in place
    pub temperature: Option<f32>,
    /// Upper bound on generated tokens
    pub max_tokens: Option<u32>,
}

impl GenerationConfig {
    /// Near-deterministic sampling used for structural repair requests.
    #[must_use]
    pub const fn deterministic(temperature: f32) -> Self {
        Self {
            temperature: Some(temperature),
            max_tokens: None,
        }
    }
}

/// The user turn of a chat request together with how it should be sampled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub text: String,
    #[serde(default)]
    pub generation: GenerationConfig,
}

impl Query {
    /// A query that keeps the provider's sampling defaults.
    pub fn new<T: Into<String>>(text: T) -> Self {
        Self {
            text: text.into(),
            generation: GenerationConfig::default(),
        }
    }

    #[must_use]
    pub fn with_generation(mut self, generation: GenerationConfig) -> Self {
        self.generation = generation;
        self
    }
}

/// One completion as returned by a provider, before any interpretation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub text: String,
    pub confidence: f64,
    pub tokens_used: TokenUsage,
    pub provider: String,
    pub latency_ms: u64,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Token counts billed for one completion. Cached prompt tokens are kept out
/// of `input`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
    pub cache_read: u64,
    pub cache_write: u64,
}

impl TokenUsage {
    #[must_use]
    pub fn total(&self) -> u64 {
        self.input + self.output + self.cache_read + self.cache_write
    }
}

/// System prompt plus the workspace files shown to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Context {
    pub files: Vec<FileContext>,
    pub system_prompt: String,
}

impl Context {
    pub fn new<T: Into<String>>(system_prompt: T) -> Self {
        Self {
            files: Vec::new(),
            system_prompt: system_prompt.into(),
        }
    }

    #[must_use]
    pub fn with_files(mut self, files: Vec<FileContext>) -> Self {
        self.files = files;
        self
    }

    /// Each file under a `// File: <path>` banner, blank-line separated.
    #[must_use]
    pub fn files_to_string(&self) -> String {
        self.files
            .iter()
            .map(|file| format!("// File: {}\n{}\n", file.path.display(), file.content))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Four bytes per token.
    #[must_use]
    pub fn token_estimate(&self) -> usize {
        let files_len: usize = self.files.iter().map(|file| file.content.len()).sum();
        (self.system_prompt.len() + files_len) / 4
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileContext {
    pub path: PathBuf,
    pub content: String,
}

impl FileContext {
    #[must_use]
    pub fn new(path: PathBuf, content: String) -> Self {
        Self { path, content }
    }
}
