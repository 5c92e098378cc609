//! In-memory retrieval index over document chunks
//!
//! Chunks are stored in insertion order and scored by exact cosine
//! similarity, so repeated queries over unchanged content always return the
//! same ranking. Approximate structures would trade that determinism away
//! for recall speed the pipeline does not need at this scale.

mod chunk;

pub use chunk::{split_into_chunks, Chunk};

use crate::gateways::EmbeddingGateway;
use std::sync::{Arc, RwLock};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("Invalid dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    #[error("Invalid query: {0}")]
    InvalidQuery(String),
}

/// A chunk paired with its similarity to a query
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    /// Cosine similarity, higher is more similar
    pub score: f32,
}

struct IndexInner {
    /// Pinned at first successful ingestion
    dimension: Option<usize>,
    chunks: Vec<Chunk>,
    next_id: u64,
}

/// Shared retrieval index
///
/// Ingestion embeds outside the write lock and appends a whole batch under
/// one lock acquisition, so readers observe either none or all of a
/// document's chunks, never a partial batch.
pub struct RetrievalIndex {
    embedder: Arc<dyn EmbeddingGateway>,
    chunk_size: usize,
    inner: RwLock<IndexInner>,
}

impl RetrievalIndex {
    pub fn new(embedder: Arc<dyn EmbeddingGateway>, chunk_size: usize) -> Self {
        Self {
            embedder,
            chunk_size,
            inner: RwLock::new(IndexInner {
                dimension: None,
                chunks: Vec::new(),
                next_id: 0,
            }),
        }
    }

    /// Ingest a document: split, embed every segment, append all-or-nothing
    ///
    /// Returns the number of chunks appended. Any embedding failure discards
    /// the whole batch so the index never holds a chunk without its
    /// embedding. The index is not snapshot-isolated: a query running
    /// concurrently with this call sees either none or all of the batch.
    pub async fn ingest(&self, text: &str, source_doc_id: &str) -> Result<usize, IndexError> {
        let segments = split_into_chunks(text, self.chunk_size);
        if segments.is_empty() {
            return Ok(0);
        }

        // Stage embeddings before touching the index
        let mut staged: Vec<(String, Vec<f32>)> = Vec::with_capacity(segments.len());
        for segment in &segments {
            let embedding = self
                .embedder
                .embed(segment)
                .await
                .map_err(|e| IndexError::EmbeddingUnavailable(e.to_string()))?;
            if let Some((_, first)) = staged.first() {
                if embedding.len() != first.len() {
                    return Err(IndexError::InvalidDimension {
                        expected: first.len(),
                        actual: embedding.len(),
                    });
                }
            }
            staged.push((segment.to_string(), embedding));
        }

        let batch_dimension = staged[0].1.len();

        let mut inner = self.inner.write().unwrap();
        match inner.dimension {
            Some(expected) if expected != batch_dimension => {
                return Err(IndexError::InvalidDimension {
                    expected,
                    actual: batch_dimension,
                });
            }
            None => inner.dimension = Some(batch_dimension),
            _ => {}
        }

        let appended = staged.len();
        for (text, embedding) in staged {
            let id = inner.next_id;
            inner.next_id += 1;
            inner.chunks.push(Chunk {
                id,
                text,
                embedding,
                source_doc_id: source_doc_id.to_string(),
            });
        }

        tracing::info!(
            "Indexed {} chunks from document {} ({} total)",
            appended,
            source_doc_id,
            inner.chunks.len()
        );

        Ok(appended)
    }

    /// Return the top `k` chunks by descending cosine similarity
    ///
    /// Ties keep insertion order (earlier chunk wins). `k` is clamped to the
    /// index size; an empty index yields an empty result, not an error.
    pub async fn query(&self, question: &str, k: usize) -> Result<Vec<ScoredChunk>, IndexError> {
        if question.is_empty() {
            return Err(IndexError::InvalidQuery(
                "Question text cannot be empty".to_string(),
            ));
        }
        if self.is_empty() {
            return Ok(Vec::new());
        }

        let query_embedding = self
            .embedder
            .embed(question)
            .await
            .map_err(|e| IndexError::EmbeddingUnavailable(e.to_string()))?;

        let inner = self.inner.read().unwrap();
        if let Some(expected) = inner.dimension {
            if query_embedding.len() != expected {
                return Err(IndexError::InvalidDimension {
                    expected,
                    actual: query_embedding.len(),
                });
            }
        }

        let mut scored: Vec<ScoredChunk> = inner
            .chunks
            .iter()
            .map(|chunk| ScoredChunk {
                chunk: chunk.clone(),
                score: cosine_similarity(&query_embedding, &chunk.embedding),
            })
            .collect();

        // Stable sort preserves insertion order on equal scores
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k.min(scored.len()));

        Ok(scored)
    }

    /// Number of chunks in the index
    pub fn len(&self) -> usize {
        self.inner.read().unwrap().chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every chunk and unpin the dimension
    pub fn reset(&self) {
        let mut inner = self.inner.write().unwrap();
        inner.chunks.clear();
        inner.dimension = None;
        inner.next_id = 0;
    }
}

/// Cosine similarity; zero-magnitude vectors score 0.0 rather than NaN
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    dot / (mag_a * mag_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateways::stubs::{FailingEmbedder, HashedBagEmbedder};

    fn test_index() -> RetrievalIndex {
        RetrievalIndex::new(Arc::new(HashedBagEmbedder::new(64)), 1000)
    }

    #[tokio::test]
    async fn test_empty_input_ingests_nothing() {
        let index = test_index();
        let count = index.ingest("", "doc1").await.unwrap();
        assert_eq!(count, 0);
        assert!(index.is_empty());
    }

    #[tokio::test]
    async fn test_ingest_counts_chunks() {
        let index = test_index();
        let text = "A cat sat on a mat. ".repeat(100); // 2000 chars
        let count = index.ingest(&text, "doc1").await.unwrap();
        assert_eq!(count, 2);
        assert_eq!(index.len(), 2);
    }

    #[tokio::test]
    async fn test_query_empty_index_returns_empty() {
        let index = test_index();
        let results = index.query("anything", 3).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_self_similarity_ranks_own_chunk_first() {
        let index = test_index();
        index.ingest("the quick brown fox jumps", "doc1").await.unwrap();
        index.ingest("payment settlement ledger chain", "doc2").await.unwrap();
        index.ingest("retrieval augmented generation", "doc3").await.unwrap();

        let results = index.query("the quick brown fox jumps", 3).await.unwrap();
        assert_eq!(results[0].chunk.source_doc_id, "doc1");
        assert!((results[0].score - 1.0).abs() < 1e-5);
        assert!(results[0].score >= results[1].score);
    }

    #[tokio::test]
    async fn test_query_clamps_k_and_filters_by_score_order() {
        let index = test_index();
        let text = "A cat sat on a mat. ".repeat(100);
        index.ingest(&text, "doc1").await.unwrap();

        let results = index.query("Where did the cat sit?", 3).await.unwrap();
        assert!(results.len() <= 3);
        assert!(!results.is_empty());
        assert!(results.iter().all(|r| r.chunk.source_doc_id == "doc1"));
    }

    #[tokio::test]
    async fn test_ties_keep_insertion_order() {
        let index = test_index();
        // Identical text in both documents: identical embeddings, tied scores
        index.ingest("same words here", "first").await.unwrap();
        index.ingest("same words here", "second").await.unwrap();

        let results = index.query("same words here", 2).await.unwrap();
        assert_eq!(results[0].chunk.source_doc_id, "first");
        assert_eq!(results[1].chunk.source_doc_id, "second");
        assert_eq!(results[0].score, results[1].score);
    }

    #[tokio::test]
    async fn test_failed_ingest_discards_whole_batch() {
        // Three chunks to embed but only one embed call will succeed
        let index = RetrievalIndex::new(Arc::new(FailingEmbedder::new(64, 1)), 10);
        let text = "x".repeat(25);

        let result = index.ingest(&text, "doc1").await;
        assert!(matches!(result, Err(IndexError::EmbeddingUnavailable(_))));
        assert!(index.is_empty());
    }

    #[tokio::test]
    async fn test_repeated_query_is_deterministic() {
        let index = test_index();
        index.ingest("alpha beta gamma", "doc1").await.unwrap();
        index.ingest("delta epsilon zeta", "doc2").await.unwrap();

        let first = index.query("beta gamma", 2).await.unwrap();
        let second = index.query("beta gamma", 2).await.unwrap();
        let ids_first: Vec<u64> = first.iter().map(|r| r.chunk.id).collect();
        let ids_second: Vec<u64> = second.iter().map(|r| r.chunk.id).collect();
        assert_eq!(ids_first, ids_second);
    }

    #[tokio::test]
    async fn test_reset_clears_and_unpins_dimension() {
        let index = test_index();
        index.ingest("some text", "doc1").await.unwrap();
        assert_eq!(index.len(), 1);

        index.reset();
        assert!(index.is_empty());

        // Reingestion after reset repins the dimension
        index.ingest("more text", "doc2").await.unwrap();
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_cosine_similarity_guards_zero_vectors() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
    }
}
