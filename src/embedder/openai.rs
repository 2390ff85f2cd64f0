//! OpenAI-based embedding client implementation.

use anyhow::{anyhow, Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::Embedder;
use crate::config::Config;

/// Embeddings client that talks to OpenAI-compatible endpoints, one input per request.
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    dimensions: Option<usize>,
}

impl OpenAiEmbedder {
    /// Builds a new OpenAI embeddings client.
    pub fn new(
        api_key: &str,
        base_url: &str,
        model: impl Into<String>,
        dimensions: Option<usize>,
    ) -> Result<Self> {
        let model = model.into();
        anyhow::ensure!(!api_key.trim().is_empty(), "missing OpenAI API key");
        anyhow::ensure!(!model.trim().is_empty(), "missing OpenAI model name");
        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth).context("invalid OpenAI API key")?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .default_headers(headers)
            .build()
            .context("failed to build OpenAI HTTP client")?;
        let endpoint = format!("{}/embeddings", base_url.trim_end_matches('/'));
        Ok(Self {
            client,
            endpoint,
            model,
            dimensions,
        })
    }

    /// Builds a client from validated configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            &config.openai_api_key,
            &config.openai_base_url,
            config.openai_model.clone(),
            config.openai_dimensions,
        )
    }

    /// Model identifier sent with each request.
    pub fn model(&self) -> &str {
        &self.model
    }
}

impl Embedder for OpenAiEmbedder {
    async fn embed(&self, input: &str) -> Result<Vec<f32>> {
        let inputs = [input];
        let request = EmbeddingRequest {
            model: &self.model,
            input: &inputs,
            dimensions: self.dimensions,
        };
        tracing::debug!(model = %self.model, chars = input.chars().count(), "requesting embedding");
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .context("failed to call OpenAI embeddings endpoint")?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            anyhow::bail!("OpenAI embeddings request failed ({}): {}", status, body);
        }
        let mut parsed: EmbeddingResponse = resp
            .json()
            .await
            .context("failed to parse OpenAI embedding response")?;
        parsed.data.sort_by_key(|entry| entry.index);
        parsed
            .data
            .into_iter()
            .next()
            .map(|entry| entry.embedding)
            .ok_or_else(|| anyhow!("OpenAI response contained no embeddings"))
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}
