//! OpenAI embeddings client and vector math.
//!
//! A thin wrapper over `POST {base_url}/embeddings`: one request per batch,
//! a hard timeout, and no retries. A provider failure surfaces immediately
//! so the caller (index build or chat request) can fail fast instead of
//! stalling behind backoff.

use anyhow::{bail, Context, Result};
use std::time::Duration;

use crate::config::Config;

/// Batched embeddings client. Construction fails when no API key was
/// found in the environment; callers that can run without embeddings
/// check [`Config::secrets`] before constructing one.
pub struct EmbeddingClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    dims: usize,
}

impl EmbeddingClient {
    pub fn new(config: &Config) -> Result<Self> {
        let api_key = config
            .secrets
            .openai_api_key
            .clone()
            .context("OPENAI_API_KEY not set")?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.embedding.timeout_secs))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: config.embedding.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.embedding.model.clone(),
            dims: config.embedding.dims,
        })
    }

    /// Embed a batch of texts, returning one vector per input in input
    /// order. Any provider error or timeout fails the whole batch.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .context("embeddings request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("embeddings API error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response
            .json()
            .await
            .context("embeddings response was not JSON")?;
        let embeddings = parse_embeddings(&json, texts.len())?;

        for vec in &embeddings {
            if vec.len() != self.dims {
                bail!(
                    "embedding has {} dims, expected {} (check embedding.dims)",
                    vec.len(),
                    self.dims
                );
            }
        }

        Ok(embeddings)
    }

    /// Embed a single query string.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let results = self.embed_batch(&[text.to_string()]).await?;
        results
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("empty embedding response"))
    }
}

/// Extract `data[].embedding` vectors, placed by each item's `index`
/// field so the output always matches input order.
fn parse_embeddings(json: &serde_json::Value, expected: usize) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("invalid embeddings response: missing data array"))?;

    if data.len() != expected {
        bail!(
            "embeddings response has {} items, expected {}",
            data.len(),
            expected
        );
    }

    let mut embeddings = vec![Vec::new(); expected];

    for item in data {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .ok_or_else(|| anyhow::anyhow!("invalid embeddings response: missing index"))?
            as usize;
        if index >= expected {
            bail!("invalid embeddings response: index {} out of range", index);
        }

        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("invalid embeddings response: missing embedding"))?;

        embeddings[index] = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
    }

    Ok(embeddings)
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty vectors, vectors
/// of different lengths, or a near-zero denominator.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
