// src/llm/retry.rs

use async_trait::async_trait;
use rand::Rng;
use std::time::Duration;
use tracing::warn;

use super::{LlmError, TextModel};

const BASE_DELAY_SECS: f64 = 2.0;

/// Wraps a model with exponential backoff plus jitter on rate-limit errors.
///
/// Only `RateLimited` is retried; every other error is returned to the
/// caller immediately. The wrapped model keeps its own per-call timeout, so
/// total latency stays bounded.
pub struct Backoff<M> {
    inner: M,
    max_retries: u32,
}

impl<M> Backoff<M> {
    pub fn new(inner: M, max_retries: u32) -> Self {
        Self {
            inner,
            max_retries: max_retries.max(1),
        }
    }
}

#[async_trait]
impl<M: TextModel> TextModel for Backoff<M> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        let mut attempt = 0;
        loop {
            match self.inner.complete(prompt).await {
                Err(LlmError::RateLimited(detail)) if attempt + 1 < self.max_retries => {
                    let jitter: f64 = rand::rng().random_range(0.0..1.0);
                    let delay = BASE_DELAY_SECS * 2f64.powi(attempt as i32) + jitter;
                    warn!(
                        model = self.inner.name(),
                        attempt,
                        delay_secs = format!("{delay:.2}"),
                        "rate limited, backing off: {detail}"
                    );
                    tokio::time::sleep(Duration::from_secs_f64(delay)).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}
