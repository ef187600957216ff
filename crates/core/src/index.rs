use crate::embeddings::{embed_bounded, VectorProvider};
use crate::error::ConfigError;
use crate::models::{Chunk, Embedding, RetrievalOptions, ScoredChunk};
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
struct IndexedChunk {
    chunk: Chunk,
    embedding: Embedding,
    magnitude: f32,
}

#[derive(Debug, Clone, Default)]
pub struct DocumentIndex {
    entries: Vec<IndexedChunk>,
}

#[derive(Debug)]
pub struct BuiltIndex {
    pub index: DocumentIndex,
    pub total_chunks: usize,
    pub failed_chunks: usize,
    pub skipped_blank: usize,
}

impl DocumentIndex {
    pub fn from_parts(pairs: Vec<(Chunk, Embedding)>) -> Result<Self, ConfigError> {
        let mut entries = Vec::with_capacity(pairs.len());
        let mut dimension = None;

        for (chunk, embedding) in pairs {
            match dimension {
                None => dimension = Some(embedding.len()),
                Some(expected) if expected != embedding.len() => {
                    return Err(ConfigError::DimensionMismatch {
                        expected,
                        found: embedding.len(),
                    });
                }
                Some(_) => {}
            }

            let magnitude = magnitude(&embedding);
            entries.push(IndexedChunk {
                chunk,
                embedding,
                magnitude,
            });
        }

        entries.sort_by_key(|entry| entry.chunk.index);
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dimension(&self) -> Option<usize> {
        self.entries.first().map(|entry| entry.embedding.len())
    }

    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.entries.iter().map(|entry| &entry.chunk)
    }

    pub fn rank(&self, query: &[f32], top_k: usize) -> Vec<Chunk> {
        self.rank_scored(query, top_k)
            .into_iter()
            .map(|scored| scored.chunk)
            .collect()
    }

    /// Exact scan: cosine similarity against every entry, best first, ties broken by the lower
    /// chunk index.
    pub fn rank_scored(&self, query: &[f32], top_k: usize) -> Vec<ScoredChunk> {
        if top_k == 0 || self.entries.is_empty() {
            return Vec::new();
        }

        let query_magnitude = magnitude(query);
        let mut scored: Vec<(f32, &IndexedChunk)> = self
            .entries
            .iter()
            .map(|entry| {
                let score = similarity_with_magnitudes(
                    query,
                    query_magnitude,
                    &entry.embedding,
                    entry.magnitude,
                );
                (score, entry)
            })
            .collect();

        scored.sort_by(|(left_score, left), (right_score, right)| {
            right_score
                .total_cmp(left_score)
                .then_with(|| left.chunk.index.cmp(&right.chunk.index))
        });

        scored
            .into_iter()
            .take(top_k)
            .map(|(score, entry)| ScoredChunk {
                chunk: entry.chunk.clone(),
                score,
            })
            .collect()
    }
}

pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f32 {
    similarity_with_magnitudes(left, magnitude(left), right, magnitude(right))
}

fn magnitude(vector: &[f32]) -> f32 {
    vector.iter().map(|value| value * value).sum::<f32>().sqrt()
}

fn similarity_with_magnitudes(left: &[f32], left_mag: f32, right: &[f32], right_mag: f32) -> f32 {
    if left.len() != right.len() || left_mag == 0.0 || right_mag == 0.0 {
        return 0.0;
    }

    let dot = left
        .iter()
        .zip(right.iter())
        .map(|(a, b)| a * b)
        .sum::<f32>();
    let similarity = dot / (left_mag * right_mag);

    if similarity.is_finite() {
        similarity
    } else {
        0.0
    }
}

/// Embeds every non-blank chunk with at most `max_concurrent_embeddings` calls in flight.
/// Chunks whose embedding fails or times out are logged and left out of the index; if all of
/// them fail the index is empty.
pub async fn build_index<P>(
    document_id: &str,
    chunks: Vec<Chunk>,
    provider: &P,
    options: &RetrievalOptions,
) -> Result<BuiltIndex, ConfigError>
where
    P: VectorProvider + ?Sized,
{
    options.validate()?;

    let total_chunks = chunks.len();
    let (candidates, blank): (Vec<Chunk>, Vec<Chunk>) = chunks
        .into_iter()
        .partition(|chunk| !chunk.text.trim().is_empty());
    let skipped_blank = blank.len();

    debug!(
        document_id,
        provider = provider.name(),
        chunk_count = candidates.len(),
        fan_out = options.max_concurrent_embeddings,
        "embedding chunks"
    );

    let outcomes = stream::iter(candidates)
        .map(|chunk| async move {
            let result = embed_bounded(
                provider,
                &chunk.text,
                options.max_input_chars,
                options.embed_timeout,
            )
            .await;
            (chunk, result)
        })
        .buffer_unordered(options.max_concurrent_embeddings)
        .collect::<Vec<_>>()
        .await;

    let mut pairs = Vec::with_capacity(outcomes.len());
    let mut failed_chunks = 0;
    for (chunk, result) in outcomes {
        match result {
            Ok(embedding) => pairs.push((chunk, embedding)),
            Err(error) => {
                failed_chunks += 1;
                warn!(
                    document_id,
                    chunk_index = chunk.index,
                    %error,
                    "dropping chunk whose embedding failed"
                );
            }
        }
    }

    let index = DocumentIndex::from_parts(pairs)?;
    info!(
        document_id,
        indexed = index.len(),
        failed = failed_chunks,
        skipped_blank,
        "document index built"
    );

    Ok(BuiltIndex {
        index,
        total_chunks,
        failed_chunks,
        skipped_blank,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use async_trait::async_trait;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn chunk(index: usize, text: &str) -> Chunk {
        Chunk {
            index,
            text: text.to_string(),
            start_offset: index * 10,
        }
    }

    #[derive(Default)]
    struct ScriptedProvider {
        vectors: HashMap<String, Embedding>,
        failing: HashSet<String>,
        delays: HashMap<String, Duration>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn with_vectors(pairs: &[(&str, Embedding)]) -> Self {
            Self {
                vectors: pairs
                    .iter()
                    .map(|(text, vector)| (text.to_string(), vector.clone()))
                    .collect(),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl VectorProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn embed(&self, text: &str) -> Result<Embedding, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(current, Ordering::SeqCst);

            if let Some(delay) = self.delays.get(text) {
                tokio::time::sleep(*delay).await;
            } else {
                tokio::task::yield_now().await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.failing.contains(text) {
                return Err(ProviderError::Request(format!("scripted failure for {text}")));
            }
            Ok(self
                .vectors
                .get(text)
                .cloned()
                .unwrap_or_else(|| vec![text.len() as f32, 1.0]))
        }
    }

    fn three_way_index() -> DocumentIndex {
        DocumentIndex::from_parts(vec![
            (chunk(0, "antiparallel"), vec![-1.0, 0.0]),
            (chunk(1, "orthogonal"), vec![0.0, 1.0]),
            (chunk(2, "identical"), vec![1.0, 0.0]),
        ])
        .expect("uniform dimensions")
    }

    #[test]
    fn cosine_of_known_vectors() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-2.0, 0.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn zero_vector_similarity_is_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[0.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[0.0, 0.0]), 0.0);
    }

    #[test]
    fn ranking_prefers_identical_then_orthogonal() {
        let index = three_way_index();
        let ranked = index.rank(&[1.0, 0.0], 2);
        let texts: Vec<&str> = ranked.iter().map(|chunk| chunk.text.as_str()).collect();
        assert_eq!(texts, vec!["identical", "orthogonal"]);
    }

    #[test]
    fn scores_are_exposed_by_rank_scored() {
        let index = three_way_index();
        let scored = index.rank_scored(&[1.0, 0.0], 3);
        let scores: Vec<f32> = scored.iter().map(|hit| hit.score).collect();
        assert_eq!(scores, vec![1.0, 0.0, -1.0]);
    }

    #[test]
    fn ties_are_broken_by_chunk_index() {
        let index = DocumentIndex::from_parts(vec![
            (chunk(3, "third"), vec![1.0, 0.0]),
            (chunk(1, "first"), vec![2.0, 0.0]),
            (chunk(2, "second"), vec![0.5, 0.0]),
        ])
        .expect("uniform dimensions");

        let first = index.rank(&[4.0, 0.0], 3);
        let second = index.rank(&[4.0, 0.0], 3);
        let order: Vec<usize> = first.iter().map(|chunk| chunk.index).collect();
        assert_eq!(order, vec![1, 2, 3]);
        assert_eq!(first, second);
    }

    #[test]
    fn zero_embedding_in_index_ranks_without_error() {
        let index = DocumentIndex::from_parts(vec![
            (chunk(0, "zero"), vec![0.0, 0.0]),
            (chunk(1, "aligned"), vec![0.0, 3.0]),
        ])
        .expect("uniform dimensions");
        let scored = index.rank_scored(&[0.0, 1.0], 2);
        assert_eq!(scored[0].chunk.text, "aligned");
        assert_eq!(scored[1].score, 0.0);

        let zero_query = index.rank_scored(&[0.0, 0.0], 2);
        assert!(zero_query.iter().all(|hit| hit.score == 0.0));
    }

    #[test]
    fn top_k_bounds() {
        let index = three_way_index();
        assert!(index.rank(&[1.0, 0.0], 0).is_empty());
        assert_eq!(index.rank(&[1.0, 0.0], 1000).len(), 3);
        assert!(DocumentIndex::default().rank(&[1.0, 0.0], 3).is_empty());
    }

    #[test]
    fn mixed_dimensions_are_rejected() {
        let result = DocumentIndex::from_parts(vec![
            (chunk(0, "a"), vec![1.0, 0.0]),
            (chunk(1, "b"), vec![1.0, 0.0, 0.0]),
        ]);
        assert_eq!(
            result.err(),
            Some(ConfigError::DimensionMismatch {
                expected: 2,
                found: 3
            })
        );
    }

    #[tokio::test]
    async fn partial_failures_are_dropped_from_the_index() -> Result<(), ConfigError> {
        let mut provider = ScriptedProvider::with_vectors(&[
            ("alpha", vec![1.0, 0.0]),
            ("gamma", vec![0.0, 1.0]),
            ("epsilon", vec![0.7, 0.7]),
        ]);
        provider.failing = ["beta", "delta"].iter().map(|text| text.to_string()).collect();

        let chunks = ["alpha", "beta", "gamma", "delta", "epsilon"]
            .iter()
            .enumerate()
            .map(|(position, text)| chunk(position, text))
            .collect();
        let built = build_index("doc", chunks, &provider, &RetrievalOptions::default()).await?;

        assert_eq!(built.index.len(), 3);
        assert_eq!(built.failed_chunks, 2);
        assert_eq!(built.total_chunks, 5);
        let indices: Vec<usize> = built.index.chunks().map(|chunk| chunk.index).collect();
        assert_eq!(indices, vec![0, 2, 4]);

        let ranked = built.index.rank(&[1.0, 0.0], 10);
        let texts: Vec<&str> = ranked.iter().map(|chunk| chunk.text.as_str()).collect();
        assert_eq!(texts, vec!["alpha", "epsilon", "gamma"]);
        Ok(())
    }

    #[tokio::test]
    async fn all_failures_yield_an_empty_index() -> Result<(), ConfigError> {
        let mut provider = ScriptedProvider::default();
        provider.failing = ["one", "two"].iter().map(|text| text.to_string()).collect();

        let built = build_index(
            "doc",
            vec![chunk(0, "one"), chunk(1, "two")],
            &provider,
            &RetrievalOptions::default(),
        )
        .await?;

        assert!(built.index.is_empty());
        assert_eq!(built.failed_chunks, 2);
        assert_eq!(built.index.dimension(), None);
        Ok(())
    }

    #[tokio::test]
    async fn blank_chunks_are_skipped_without_calls() -> Result<(), ConfigError> {
        let provider = ScriptedProvider::default();
        let built = build_index(
            "doc",
            vec![chunk(0, "text"), chunk(1, "   "), chunk(2, "")],
            &provider,
            &RetrievalOptions::default(),
        )
        .await?;

        assert_eq!(built.index.len(), 1);
        assert_eq!(built.skipped_blank, 2);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn results_stay_attached_to_their_chunks() -> Result<(), ConfigError> {
        let texts = ["a", "bb", "ccc", "dddd", "eeeee", "ffffff"];
        let mut provider = ScriptedProvider::default();
        provider.delays = texts
            .iter()
            .enumerate()
            .map(|(position, text)| {
                (text.to_string(), Duration::from_millis(100 * (6 - position as u64)))
            })
            .collect();

        let chunks = texts
            .iter()
            .enumerate()
            .map(|(position, text)| chunk(position, text))
            .collect();
        let built = build_index("doc", chunks, &provider, &RetrievalOptions::default()).await?;

        for entry in &built.index.entries {
            assert_eq!(entry.embedding[0], entry.chunk.text.len() as f32);
        }
        let indices: Vec<usize> = built.index.chunks().map(|chunk| chunk.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4, 5]);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn fan_out_is_bounded() -> Result<(), ConfigError> {
        let texts: Vec<String> = (0..12).map(|position| format!("chunk {position}")).collect();
        let mut provider = ScriptedProvider::default();
        provider.delays = texts
            .iter()
            .map(|text| (text.clone(), Duration::from_millis(50)))
            .collect();

        let options = RetrievalOptions {
            max_concurrent_embeddings: 3,
            ..Default::default()
        };
        let chunks = texts
            .iter()
            .enumerate()
            .map(|(position, text)| chunk(position, text))
            .collect();
        let built = build_index("doc", chunks, &provider, &options).await?;

        assert_eq!(built.index.len(), 12);
        assert_eq!(provider.max_in_flight.load(Ordering::SeqCst), 3);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_chunks_are_treated_as_failures() -> Result<(), ConfigError> {
        let mut provider = ScriptedProvider::default();
        provider
            .delays
            .insert("slow".to_string(), Duration::from_secs(600));

        let options = RetrievalOptions {
            embed_timeout: Duration::from_secs(2),
            ..Default::default()
        };
        let built = build_index(
            "doc",
            vec![chunk(0, "fast"), chunk(1, "slow")],
            &provider,
            &options,
        )
        .await?;

        assert_eq!(built.index.len(), 1);
        assert_eq!(built.failed_chunks, 1);
        Ok(())
    }

    #[tokio::test]
    async fn invalid_options_fail_fast() {
        let provider = ScriptedProvider::default();
        let options = RetrievalOptions {
            chunk_size: 10,
            chunk_overlap: 10,
            ..Default::default()
        };
        let result = build_index("doc", vec![chunk(0, "x")], &provider, &options).await;
        assert!(matches!(result, Err(ConfigError::InvalidChunkConfig(_))));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn provider_dimension_drift_fails_the_build() {
        let provider = ScriptedProvider::with_vectors(&[
            ("short", vec![1.0, 0.0]),
            ("long", vec![1.0, 0.0, 0.0]),
        ]);
        let result = build_index(
            "doc",
            vec![chunk(0, "short"), chunk(1, "long")],
            &provider,
            &RetrievalOptions::default(),
        )
        .await;
        assert!(matches!(result, Err(ConfigError::DimensionMismatch { .. })));
    }
}
