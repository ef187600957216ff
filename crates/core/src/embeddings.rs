use crate::chunking::truncate_chars;
use crate::error::ProviderError;
use crate::models::Embedding;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 128;

/// Turns text into a fixed-length embedding. Calls are independent and may run concurrently;
/// callers bound the input length before calling.
#[async_trait]
pub trait VectorProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn embed(&self, text: &str) -> Result<Embedding, ProviderError>;
}

#[async_trait]
impl<P> VectorProvider for Arc<P>
where
    P: VectorProvider + ?Sized,
{
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn embed(&self, text: &str) -> Result<Embedding, ProviderError> {
        (**self).embed(text).await
    }
}

/// Truncates `text` to `max_chars` characters and embeds it under `timeout`. An elapsed timeout
/// and an empty vector are both reported as provider failures.
pub async fn embed_bounded<P>(
    provider: &P,
    text: &str,
    max_chars: usize,
    timeout: Duration,
) -> Result<Embedding, ProviderError>
where
    P: VectorProvider + ?Sized,
{
    let input = truncate_chars(text, max_chars);
    let embedding = tokio::time::timeout(timeout, provider.embed(input))
        .await
        .map_err(|_| ProviderError::Timeout(timeout))??;

    if embedding.is_empty() {
        return Err(ProviderError::BackendResponse {
            backend: provider.name().to_string(),
            details: "embedding has zero dimensions".to_string(),
        });
    }

    Ok(embedding)
}

#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn encode(&self, text: &str) -> Embedding {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.iter().all(|ch| ch.is_whitespace()) {
            return vector;
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl VectorProvider for CharacterNgramEmbedder {
    fn name(&self) -> &str {
        "ngram"
    }

    async fn embed(&self, text: &str) -> Result<Embedding, ProviderError> {
        Ok(self.encode(text))
    }
}
