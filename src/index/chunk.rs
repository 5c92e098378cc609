//! Document chunks and fixed-size text splitting

use serde::{Deserialize, Serialize};

/// A bounded-length contiguous slice of a document's text plus its embedding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Unique within the index, assigned in insertion order
    pub id: u64,
    /// Chunk text, non-empty
    pub text: String,
    /// Embedding vector; same dimensionality as every other chunk in the index
    pub embedding: Vec<f32>,
    /// Originating upload, kept for provenance
    pub source_doc_id: String,
}

/// Split text into fixed-size, non-overlapping segments
///
/// Segments target `chunk_size` characters; the last one may be shorter.
/// Splits on character boundaries, never inside a UTF-8 sequence. Empty
/// input yields no segments.
pub fn split_into_chunks(text: &str, chunk_size: usize) -> Vec<&str> {
    debug_assert!(chunk_size > 0);
    let mut segments = Vec::new();
    let mut start = 0;
    let mut count = 0;

    for (offset, _) in text.char_indices() {
        if count == chunk_size {
            segments.push(&text[start..offset]);
            start = offset;
            count = 0;
        }
        count += 1;
    }

    if start < text.len() {
        segments.push(&text[start..]);
    }

    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input_yields_no_chunks() {
        assert!(split_into_chunks("", 1000).is_empty());
    }

    #[test]
    fn test_short_input_is_one_chunk() {
        let chunks = split_into_chunks("hello", 1000);
        assert_eq!(chunks, vec!["hello"]);
    }

    #[test]
    fn test_exact_multiple_has_no_trailing_chunk() {
        let text = "ab".repeat(10); // 20 chars
        let chunks = split_into_chunks(&text, 10);
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.chars().count() == 10));
    }

    #[test]
    fn test_remainder_becomes_shorter_last_chunk() {
        let text = "x".repeat(25);
        let chunks = split_into_chunks(&text, 10);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].len(), 5);
    }

    #[test]
    fn test_multibyte_boundaries() {
        // 'é' is 2 bytes; splitting must count characters, not bytes
        let text = "é".repeat(15);
        let chunks = split_into_chunks(&text, 10);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].chars().count(), 10);
        assert_eq!(chunks[1].chars().count(), 5);
    }

    #[test]
    fn test_chunk_count_matches_ceiling() {
        let text = "A cat sat on a mat. ".repeat(100); // 2000 chars
        let chunks = split_into_chunks(&text, 1000);
        assert_eq!(chunks.len(), text.chars().count().div_ceil(1000));
        assert_eq!(chunks.len(), 2);
    }
}
