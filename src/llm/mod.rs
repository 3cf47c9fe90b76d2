// src/llm/mod.rs
// Generative capability seam. Everything that needs natural-language
// reasoning goes through the TextModel trait so the Gemini client can be
// swapped for a scripted fake in tests.

use async_trait::async_trait;
use thiserror::Error;

pub mod gemini;
pub mod parse;
pub mod retry;

pub use gemini::GeminiClient;
pub use retry::Backoff;

/// Errors surfaced by a generative model call.
///
/// `RateLimited` is the only retryable variant; the `Backoff` wrapper keys
/// off it. Every other variant is a stage-local failure for the caller to
/// convert into session state.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("no API key configured")]
    MissingApiKey,
    #[error("rate limited by upstream: {0}")]
    RateLimited(String),
    #[error("model call timed out after {0}s")]
    Timeout(u64),
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("malformed completion: {0}")]
    Malformed(String),
}

/// Stateless text-completion capability: prompt in, text out.
#[async_trait]
pub trait TextModel: Send + Sync {
    /// Model name for logging/debugging
    fn name(&self) -> &'static str;

    async fn complete(&self, prompt: &str) -> Result<String, LlmError>;
}
