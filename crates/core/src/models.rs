use crate::error::ConfigError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub type Embedding = Vec<f32>;

/// A character window of a document. `start_offset` counts characters, not bytes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chunk {
    pub index: usize,
    pub text: String,
    pub start_offset: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexSummary {
    pub document_id: String,
    pub total_chunks: usize,
    pub indexed_chunks: usize,
    pub failed_chunks: usize,
    pub skipped_blank: usize,
    pub dimension: Option<usize>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum FallbackReason {
    NoIndex,
    BlankQuery,
    QueryEmbeddingFailed,
    DimensionMismatch,
    EmptyIndex,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Retrieval {
    pub hits: Vec<ScoredChunk>,
    pub fallback: Option<FallbackReason>,
}

impl Retrieval {
    pub fn fallback(reason: FallbackReason) -> Self {
        Self {
            hits: Vec::new(),
            fallback: Some(reason),
        }
    }

    pub fn texts(self) -> Vec<String> {
        self.hits.into_iter().map(|hit| hit.chunk.text).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub document_id: String,
    pub filename: String,
    pub text: String,
    pub checksum: String,
    pub file_size: usize,
    pub uploaded_at: DateTime<Utc>,
    pub chunk_count: usize,
}

#[derive(Debug, Clone)]
pub struct RetrievalOptions {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub top_k: usize,
    pub max_concurrent_embeddings: usize,
    pub embed_timeout: Duration,
    pub max_input_chars: usize,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            chunk_size: 1_000,
            chunk_overlap: 200,
            top_k: 3,
            max_concurrent_embeddings: 4,
            embed_timeout: Duration::from_secs(30),
            max_input_chars: 8_000,
        }
    }
}

impl RetrievalOptions {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::InvalidChunkConfig(
                "chunk size must be greater than zero".to_string(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(ConfigError::InvalidChunkConfig(format!(
                "overlap {} must be smaller than chunk size {}",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.max_concurrent_embeddings == 0 {
            return Err(ConfigError::InvalidArgument(
                "max_concurrent_embeddings must be at least 1".to_string(),
            ));
        }
        if self.max_input_chars == 0 {
            return Err(ConfigError::InvalidArgument(
                "max_input_chars must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct AssistantOptions {
    pub max_context_chars: usize,
    pub summary_input_chars: usize,
    pub min_document_chars: usize,
    pub preview_chars: usize,
    pub min_question_chars: usize,
    pub max_file_bytes: usize,
    pub min_interest_chars: usize,
    pub recommendation_context_chars: usize,
}

impl Default for AssistantOptions {
    fn default() -> Self {
        Self {
            max_context_chars: 3_000,
            summary_input_chars: 4_000,
            min_document_chars: 100,
            preview_chars: 500,
            min_question_chars: 3,
            max_file_bytes: 10 * 1024 * 1024,
            min_interest_chars: 3,
            recommendation_context_chars: 2_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_are_valid() {
        assert_eq!(RetrievalOptions::default().validate(), Ok(()));
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let options = RetrievalOptions {
            chunk_size: 0,
            chunk_overlap: 0,
            ..Default::default()
        };
        assert!(matches!(
            options.validate(),
            Err(ConfigError::InvalidChunkConfig(_))
        ));
    }

    #[test]
    fn overlap_equal_to_size_is_rejected() {
        let options = RetrievalOptions {
            chunk_size: 10,
            chunk_overlap: 10,
            ..Default::default()
        };
        assert!(matches!(
            options.validate(),
            Err(ConfigError::InvalidChunkConfig(_))
        ));
    }

    #[test]
    fn zero_fan_out_is_rejected() {
        let options = RetrievalOptions {
            max_concurrent_embeddings: 0,
            ..Default::default()
        };
        assert!(matches!(
            options.validate(),
            Err(ConfigError::InvalidArgument(_))
        ));
    }
}
