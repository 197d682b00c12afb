use async_trait::async_trait;

use crate::{Context, Query, Response, Result};

/// A language-model collaborator: system prompt, context files and a user
/// message in, free text out.
///
/// Nothing about the returned text is trusted. The extraction pipeline treats a
/// failed call as a hard failure of the tier that issued it, and providers do
/// not retry on their own.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Stable identifier used in logs and `Response::provider`.
    fn name(&self) -> &'static str;

    /// Cheap readiness probe, e.g. "is an API key configured".
    async fn is_available(&self) -> bool;

    /// Sends one chat turn built from `context` (system prompt and files) and
    /// `query` (user text and sampling parameters).
    ///
    /// # Errors
    /// Returns an error when the transport fails, the endpoint reports an error,
    /// or the body is not a usable completion.
    async fn generate(&self, query: &Query, context: &Context) -> Result<Response>;

    /// Rough USD cost of sending `context`, from its estimated token count.
    fn estimate_cost(&self, context: &Context) -> f64;
}
