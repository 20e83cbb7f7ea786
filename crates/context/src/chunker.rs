//! Text chunking module
//!
//! Fixed-width slicing on chars: every chunk except possibly the last holds
//! exactly `chunk_size` chars, and concatenating the chunks reproduces the
//! input.

use memctx_common::errors::{AppError, Result};
use tracing::debug;

/// A text chunk with its position in the source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    /// The chunk content
    pub content: String,
    /// 0-based index of this chunk in the document
    pub ordinal: usize,
    /// Start char position in original text
    pub start: usize,
    /// End char position (exclusive)
    pub end: usize,
}

/// Split text into chunks of at most `chunk_size` chars
pub fn chunk_text(text: &str, chunk_size: usize) -> Result<Vec<TextChunk>> {
    if chunk_size == 0 {
        return Err(AppError::invalid_field("chunk_size", "chunk size must be at least 1"));
    }

    let mut chunks = Vec::new();
    let mut content = String::new();
    let mut start = 0;
    let mut position = 0;

    for ch in text.chars() {
        content.push(ch);
        position += 1;

        if position - start == chunk_size {
            chunks.push(TextChunk {
                content: std::mem::take(&mut content),
                ordinal: chunks.len(),
                start,
                end: position,
            });
            start = position;
        }
    }

    if !content.is_empty() {
        chunks.push(TextChunk {
            content,
            ordinal: chunks.len(),
            start,
            end: position,
        });
    }

    debug!(
        input_chars = position,
        chunk_count = chunks.len(),
        chunk_size = chunk_size,
        "Text chunked"
    );

    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(chunks: &[TextChunk]) -> Vec<&str> {
        chunks.iter().map(|c| c.content.as_str()).collect()
    }

    #[test]
    fn test_fixed_width_slices() {
        let chunks = chunk_text("AAAA BBBB", 4).unwrap();
        assert_eq!(texts(&chunks), vec!["AAAA", " BBB", "B"]);
        assert_eq!((chunks[1].start, chunks[1].end), (4, 8));
        assert_eq!(chunks[2].ordinal, 2);
    }

    #[test]
    fn test_round_trip_and_count() {
        let text = "The quick brown fox jumps over the lazy dog. ünïcödé ✓ 数据";
        for size in 1..=17 {
            let chunks = chunk_text(text, size).unwrap();
            let joined: String = chunks.iter().map(|c| c.content.as_str()).collect();
            assert_eq!(joined, text);

            let chars = text.chars().count();
            assert_eq!(chunks.len(), chars.div_ceil(size));
            assert!(chunks.iter().all(|c| c.content.chars().count() <= size));
        }
    }

    #[test]
    fn test_multibyte_chars_not_split() {
        let chunks = chunk_text("ééé", 2).unwrap();
        assert_eq!(texts(&chunks), vec!["éé", "é"]);
    }

    #[test]
    fn test_empty_content_yields_no_chunks() {
        assert!(chunk_text("", 10).unwrap().is_empty());
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let err = chunk_text("abc", 0).unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
    }
}
