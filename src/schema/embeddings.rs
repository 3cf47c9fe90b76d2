// src/schema/embeddings.rs
// Optional similarity index over per-table schema fragments. Built once at
// startup when an embedding endpoint is configured; the provider falls back
// to keyword/model ranking whenever the index is missing or a query-time
// embedding call fails.

use anyhow::{Context, Result};
use serde_json::json;
use tracing::debug;

/// Gemini embedContent client.
#[derive(Clone)]
pub struct EmbeddingClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl EmbeddingClient {
    pub fn new(api_key: String, base_url: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url,
            model,
        }
    }

    pub fn is_available(&self) -> bool {
        !self.api_key.is_empty()
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!(
            "{}/models/{}:embedContent?key={}",
            self.base_url.trim_end_matches('/'),
            self.model,
            self.api_key
        );

        let body = json!({
            "content": { "parts": [{ "text": text }] }
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        let parsed: serde_json::Value = response.json().await?;
        let values = parsed["embedding"]["values"]
            .as_array()
            .context("no embedding values in response")?;

        Ok(values
            .iter()
            .filter_map(|v| v.as_f64().map(|f| f as f32))
            .collect())
    }
}

/// Calculate cosine similarity between two embeddings
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

struct IndexEntry {
    fragment: String,
    embedding: Vec<f32>,
}

/// In-memory top-K index: one entry per table fragment.
///
/// Read-only after construction, safe to share across sessions.
pub struct SchemaIndex {
    embedder: EmbeddingClient,
    entries: Vec<IndexEntry>,
    top_k: usize,
}

impl SchemaIndex {
    pub async fn build(
        embedder: EmbeddingClient,
        fragments: &[String],
        top_k: usize,
    ) -> Result<Self> {
        let mut entries = Vec::with_capacity(fragments.len());
        for fragment in fragments {
            let embedding = embedder.embed(fragment).await?;
            entries.push(IndexEntry {
                fragment: fragment.clone(),
                embedding,
            });
        }
        debug!(entries = entries.len(), "schema index built");
        Ok(Self {
            embedder,
            entries,
            top_k,
        })
    }

    /// Top-K fragments ranked by similarity to the question.
    pub async fn search(&self, question: &str) -> Result<Vec<String>> {
        let query = self.embedder.embed(question).await?;

        let mut scored: Vec<(f32, &IndexEntry)> = self
            .entries
            .iter()
            .map(|e| (cosine_similarity(&query, &e.embedding), e))
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));

        Ok(scored
            .into_iter()
            .take(self.top_k)
            .map(|(_, e)| e.fragment.clone())
            .collect())
    }
}
