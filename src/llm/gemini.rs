// src/llm/gemini.rs

use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

use super::{LlmError, TextModel};

/// Gemini REST client for text completion.
///
/// Every call is bounded by a wall-clock timeout so a stalled upstream can
/// never hang a session; the retry ceiling in the agent is not relied on for
/// liveness.
#[derive(Clone)]
pub struct GeminiClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    timeout_secs: u64,
}

impl GeminiClient {
    pub fn new(api_key: String, base_url: String, model: String, timeout_secs: u64) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url,
            model,
            timeout_secs,
        }
    }

    async fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        if self.api_key.is_empty() {
            return Err(LlmError::MissingApiKey);
        }

        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url.trim_end_matches('/'),
            self.model,
            self.api_key
        );

        let body = json!({
            "contents": [{
                "parts": [{"text": prompt}]
            }],
            "generationConfig": {
                "temperature": 0.0
            }
        });

        let response = self.client.post(&url).json(&body).send().await?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let detail = response.text().await.unwrap_or_default();
            return Err(LlmError::RateLimited(detail));
        }
        let response = response.error_for_status()?;

        let parsed: serde_json::Value = response.json().await?;
        let text = parsed["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .ok_or_else(|| LlmError::Malformed("no text in Gemini response".to_string()))?;

        Ok(text.to_string())
    }
}

#[async_trait]
impl TextModel for GeminiClient {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        let deadline = Duration::from_secs(self.timeout_secs);
        match tokio::time::timeout(deadline, self.generate(prompt)).await {
            Ok(result) => result,
            Err(_) => Err(LlmError::Timeout(self.timeout_secs)),
        }
    }
}
