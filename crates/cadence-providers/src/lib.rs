//! Provider adapters for language-model services.
#![cfg_attr(
    test,
    allow(
        clippy::expect_used,
        clippy::unwrap_used,
        clippy::panic,
        clippy::missing_panics_doc,
        clippy::assertions_on_result_states,
        reason = "Allow for tests"
    )
)]

/// Scriptable provider for tests.
pub mod mock;
/// `OpenRouter` (OpenAI-compatible chat completions) implementation.
pub mod openrouter;

pub use mock::{MockProvider, RecordedCall};
pub use openrouter::OpenRouterProvider;
