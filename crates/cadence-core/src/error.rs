use core::result::Result as CoreResult;
use std::io::Error as IoError;

use reqwest::Error as ReqwestError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;
use toml::de::Error as TomlReadError;
use toml::ser::Error as TomlWriteError;

/// Result type used across the cadence crates.
pub type Result<T> = CoreResult<T, Error>;

/// Failures surfaced to callers of cadence.
///
/// Malformed model output never appears here: the extraction pipeline absorbs
/// it tier by tier. What remains is infrastructure failure, bad configuration,
/// workspace violations and the one pipeline-level outcome, [`Error::PlanEmpty`].
#[derive(Debug, Error)]
pub enum Error {
    /// Filesystem or process I/O failed.
    #[error("I/O failure: {0}")]
    Io(#[from] IoError),

    /// The HTTP transport to a collaborator failed.
    #[error("request to model endpoint failed: {0}")]
    Request(#[from] ReqwestError),

    /// A JSON body could not be encoded or decoded.
    #[error("malformed JSON: {0}")]
    Json(#[from] SerdeJsonError),

    /// `config.toml` could not be parsed.
    #[error("unreadable config file: {0}")]
    ConfigRead(#[from] TomlReadError),

    /// Config could not be rendered back to TOML.
    #[error("config could not be written as TOML: {0}")]
    ConfigWrite(#[from] TomlWriteError),

    /// A config value is missing or out of range.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The collaborator reported an error or was unreachable.
    #[error("model provider failed: {0}")]
    Provider(String),

    /// No API key in config or environment.
    #[error("no API key configured; set {0}")]
    MissingApiKey(String),

    /// The collaborator answered with a body that is not a chat completion.
    #[error("unexpected provider response: {0}")]
    InvalidResponse(String),

    /// An embedded prompt template is missing or has no `## Prompt` section.
    #[error("prompt template: {0}")]
    Prompt(String),

    /// A file step or context read was refused or failed inside the workspace.
    #[error("workspace: {0}")]
    Workspace(String),

    /// Every extraction tier, the deterministic fallback included, produced no usable steps.
    #[error("No usable plan could be produced: {0}")]
    PlanEmpty(String),

    /// Anything else.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True for failures that may clear up on their own: transport errors and
    /// provider-side errors.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Request(_) | Self::Provider(_))
    }
}
