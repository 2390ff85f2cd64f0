//! Embedding providers.

use anyhow::Result;

pub mod openai;

pub use openai::OpenAiEmbedder;

/// Turns one piece of text into one embedding vector.
///
/// Any failure is reported as a single opaque error; callers do not retry.
#[allow(async_fn_in_trait)]
pub trait Embedder {
    /// Sends `input` to the provider as-is.
    async fn embed(&self, input: &str) -> Result<Vec<f32>>;
}

/// Normalizes `text` and requests its embedding.
pub async fn compute_embedding<E: Embedder>(embedder: &E, text: &str) -> Result<Vec<f32>> {
    embedder.embed(&normalize_newlines(text)).await
}

/// Replaces each newline with a single space. Character count is unchanged.
pub fn normalize_newlines(text: &str) -> String {
    text.replace('\n', " ")
}
