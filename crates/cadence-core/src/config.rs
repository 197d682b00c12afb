//! Configuration types for the provider, extraction pipeline, execution, and workspace.

use crate::{Error, Result};
use dirs::home_dir;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Env var consulted when no API key is configured.
pub const ENV_API_KEY: &str = "OPENROUTER_API_KEY";

/// Complete cadence configuration.
#[derive(Default, Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CadenceConfig {
    /// Language-model provider settings
    pub provider: ProviderConfig,
    /// Extraction pipeline settings
    pub pipeline: PipelineConfig,
    /// Plan execution settings
    pub execution: ExecutionConfig,
    /// Context assembly limits
    pub context: ContextConfig,
    /// Workspace configuration
    pub workspace: WorkspaceConfig,
}

/// Provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Model identifier sent with each request
    pub model: String,
    /// API key; falls back to `OPENROUTER_API_KEY`
    pub api_key: Option<String>,
    /// Chat completions endpoint
    pub base_url: String,
    /// Maximum tokens per completion
    pub max_tokens: u32,
    /// Request timeout in seconds
    pub timeout_seconds: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            model: "anthropic/claude-sonnet-4".to_owned(),
            api_key: None,
            base_url: "https://openrouter.ai/api/v1/chat/completions".to_owned(),
            max_tokens: 4096,
            timeout_seconds: 120,
        }
    }
}

/// Extraction pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Temperature for the initial generation call
    pub generation_temperature: f32,
    /// Whether the repair tier is attempted at all
    pub repair_enabled: bool,
    /// Temperature for repair calls
    pub repair_temperature: f32,
    /// Confidence attached to deterministic fallback records (at most 0.5)
    pub fallback_confidence: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            generation_temperature: 0.2,
            repair_enabled: true,
            repair_temperature: 0.1,
            fallback_confidence: 0.3,
        }
    }
}

/// Execution configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Timeout for each terminal step in milliseconds; 0 disables the timeout
    pub command_timeout_ms: u64,
    /// Ceiling on how long a pending approval waits for a human
    pub approval_timeout_seconds: u64,
    /// Require approval for every terminal step, even ones the plan marks as safe
    pub require_approval: bool,
    /// Maximum execute/recover rounds after the primary plan
    pub max_recovery_rounds: usize,
    /// Stop executing a plan at the first failed terminal step
    pub stop_on_failure: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            command_timeout_ms: 120_000,
            approval_timeout_seconds: 300,
            require_approval: true,
            max_recovery_rounds: 2,
            stop_on_failure: true,
        }
    }
}

impl ExecutionConfig {
    /// Command timeout as a `Duration`, `None` when disabled.
    #[must_use]
    pub fn command_timeout(&self) -> Option<Duration> {
        (self.command_timeout_ms > 0).then(|| Duration::from_millis(self.command_timeout_ms))
    }

    /// Approval wait ceiling as a `Duration`.
    #[must_use]
    pub fn approval_timeout(&self) -> Duration {
        Duration::from_secs(self.approval_timeout_seconds)
    }
}

/// Context assembly limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Characters kept from each context file before truncation
    pub max_file_chars: usize,
    /// Maximum number of context files attached to a prompt
    pub max_context_files: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_file_chars: 4000,
            max_context_files: 8,
        }
    }
}

/// Workspace configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Root path of the workspace
    pub root_path: PathBuf,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root_path: PathBuf::from("."),
        }
    }
}

impl CadenceConfig {
    /// Get the default config directory path (`~/.cadence`)
    ///
    /// # Errors
    /// Returns an error if the home directory cannot be determined
    pub fn config_dir() -> Result<PathBuf> {
        let home = home_dir()
            .ok_or_else(|| Error::Config("Could not determine home directory".to_owned()))?;
        Ok(home.join(".cadence"))
    }

    /// Get the default config file path (`~/.cadence/config.toml`)
    ///
    /// # Errors
    /// Returns an error if the home directory cannot be determined
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load config from the default location (`~/.cadence/config.toml`)
    /// If the config doesn't exist, creates it with default values
    ///
    /// # Errors
    /// Returns an error if the config cannot be read or created
    pub fn load_or_create() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            Self::load_from_file(&config_path)
        } else {
            let config = Self::default();
            config.save_to_file(&config_path)?;
            Ok(config)
        }
    }

    /// Load config from a specific file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed, or fails validation
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|error| Error::Config(format!("Failed to read config: {error}")))?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;

        tracing::debug!(
            "Loaded config from {:?}: model={}, api_key={}",
            path,
            config.provider.model,
            if config.provider.api_key.is_some() {
                "present"
            } else {
                "missing"
            }
        );

        Ok(config)
    }

    /// Save config to a specific file
    ///
    /// # Errors
    /// Returns an error if the file cannot be written
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|error| {
                Error::Config(format!("Failed to create config directory: {error}"))
            })?;
        }

        let contents = toml::to_string_pretty(self)?;

        let header = "# Cadence Configuration File\n\
                      # This file is automatically generated on first run\n\
                      # Edit this file to customize your settings\n\n";

        fs::write(path, format!("{header}{contents}"))
            .map_err(|error| Error::Config(format!("Failed to write config: {error}")))?;

        Ok(())
    }

    /// Checks value ranges that serde cannot express.
    ///
    /// # Errors
    /// Returns a configuration error describing the first invalid value
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=0.5).contains(&self.pipeline.fallback_confidence) {
            return Err(Error::Config(format!(
                "pipeline.fallback_confidence must be within [0, 0.5], got {}",
                self.pipeline.fallback_confidence
            )));
        }
        if !(0.0..=2.0).contains(&self.pipeline.repair_temperature) {
            return Err(Error::Config(format!(
                "pipeline.repair_temperature must be within [0, 2], got {}",
                self.pipeline.repair_temperature
            )));
        }
        Ok(())
    }

    /// API key from config, then from the environment.
    pub fn api_key(&self) -> Option<String> {
        self.provider
            .api_key
            .clone()
            .or_else(|| env::var(ENV_API_KEY).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{from_str, to_string};

    #[test]
    fn test_default_config() {
        let config = CadenceConfig::default();
        assert!(config.pipeline.repair_enabled);
        assert!(config.execution.require_approval);
        assert_eq!(config.execution.max_recovery_rounds, 2);
        config.validate().unwrap();
    }

    #[test]
    fn test_serialization() {
        let config = CadenceConfig::default();
        let json = match to_string(&config) {
            Ok(serialized_json) => serialized_json,
            Err(error) => panic!("serialize failed: {error}"),
        };
        let deserialized: CadenceConfig = match from_str(&json) {
            Ok(value) => value,
            Err(error) => panic!("deserialize failed: {error}"),
        };
        assert_eq!(config.provider.model, deserialized.provider.model);
    }

    #[test]
    fn test_command_timeout_zero_disables() {
        let mut execution = ExecutionConfig::default();
        assert_eq!(
            execution.command_timeout(),
            Some(Duration::from_millis(120_000))
        );
        execution.command_timeout_ms = 0;
        assert!(execution.command_timeout().is_none());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        use std::io::Write as _;
        use tempfile::NamedTempFile;

        let toml_content = r#"
[provider]
model = "openai/gpt-4o-mini"
api_key = "test_key_123"

[execution]
command_timeout_ms = 500
"#;

        let mut temp_file = NamedTempFile::new().expect("Failed to create temp file");
        temp_file
            .write_all(toml_content.as_bytes())
            .expect("Failed to write to temp file");

        let config = CadenceConfig::load_from_file(temp_file.path())
            .expect("Failed to load config from temp file");

        assert_eq!(config.provider.model, "openai/gpt-4o-mini");
        assert_eq!(config.api_key(), Some("test_key_123".to_owned()));
        assert_eq!(config.execution.command_timeout_ms, 500);
        assert_eq!(config.context.max_file_chars, 4000);
        assert!((config.pipeline.repair_temperature - 0.1).abs() < f32::EPSILON);
    }

    #[test]
    fn test_invalid_fallback_confidence_rejected() {
        use std::io::Write as _;
        use tempfile::NamedTempFile;

        let mut temp_file = NamedTempFile::new().expect("Failed to create temp file");
        temp_file
            .write_all(b"[pipeline]\nfallback_confidence = 0.9\n")
            .expect("Failed to write to temp file");

        let error = CadenceConfig::load_from_file(temp_file.path()).unwrap_err();
        assert!(error.to_string().contains("fallback_confidence"));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        let path = dir.path().join("nested").join("config.toml");

        let mut config = CadenceConfig::default();
        config.execution.max_recovery_rounds = 5;
        config.save_to_file(&path).expect("save config");

        let reloaded = CadenceConfig::load_from_file(&path).expect("reload config");
        assert_eq!(reloaded.execution.max_recovery_rounds, 5);
    }
}
