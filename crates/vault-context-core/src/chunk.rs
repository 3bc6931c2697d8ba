//! Sliding-window text chunker.
//!
//! Splits a document's text into overlapping [`Chunk`]s sized for
//! embedding. All sizes are measured in characters, never bytes, so
//! multi-byte text is split on `char` boundaries and chunk offsets map
//! directly back into the source text.
//!
//! # Algorithm
//!
//! 1. Open a window of `chunk_size` characters at `start`.
//! 2. If the window does not reach the end of the text, pull its end back
//!    to the last paragraph break (`\n\n`), then line break, then space
//!    found in the second half of the window.
//! 3. Emit the window as a chunk; the next window starts `chunk_overlap`
//!    characters before this one ended.
//! 4. A final window shorter than `min_chunk_size` is dropped unless it is
//!    the only chunk.
//!
//! Chunk ids are UUIDv5 values derived from the document id, the chunk
//! index and the chunk hash, so re-chunking identical text produces
//! identical chunks.
//!
//! # Example
//!
//! ```rust
//! use vault_context_core::chunk::{chunk_text, ChunkerConfig};
//!
//! let chunks = chunk_text("notes/a.md", "Hello world.", &ChunkerConfig::default());
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].text, "Hello world.");
//! ```

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{content_hash, Chunk};

/// Chunker configuration, in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkerConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub min_chunk_size: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            min_chunk_size: 50,
        }
    }
}

impl ChunkerConfig {
    /// Check that the window always advances.
    pub fn validate(&self) -> Result<(), String> {
        if self.chunk_size == 0 {
            return Err("chunk_size must be > 0".to_string());
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            ));
        }
        Ok(())
    }
}

/// Split `text` into overlapping chunks.
///
/// Returns an empty vector for empty text. Text no longer than
/// `chunk_size` yields exactly one chunk equal to the whole text.
/// An invalid config is clamped so the window always advances.
pub fn chunk_text(document_id: &str, text: &str, config: &ChunkerConfig) -> Vec<Chunk> {
    if text.is_empty() {
        return Vec::new();
    }

    let size = config.chunk_size.max(1);
    let overlap = config.chunk_overlap.min(size - 1);

    // Byte offset of every char, plus the end of the string.
    let mut boundaries: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    boundaries.push(text.len());
    let chars: Vec<char> = text.chars().collect();
    let total = chars.len();

    let mut chunks = Vec::new();
    let mut start = 0usize;

    loop {
        let mut end = (start + size).min(total);
        if end < total {
            // Never back off so far that the next window fails to advance.
            let floor = start + (size / 2).max(overlap + 1);
            if let Some(cut) = find_break(&chars, floor, end) {
                end = cut;
            }
        }

        let is_last = end >= total;
        let len = end - start;
        if is_last && len < config.min_chunk_size && !chunks.is_empty() {
            break;
        }

        let slice = &text[boundaries[start]..boundaries[end]];
        chunks.push(make_chunk(document_id, chunks.len(), slice, start, end));

        if is_last {
            break;
        }
        start = end - overlap;
    }

    chunks
}

/// Find the char index just after the best natural break in `chars[floor..end]`.
fn find_break(chars: &[char], floor: usize, end: usize) -> Option<usize> {
    if floor >= end {
        return None;
    }
    let window = &chars[floor..end];

    let paragraph = window
        .windows(2)
        .rposition(|pair| pair[0] == '\n' && pair[1] == '\n')
        .map(|i| floor + i + 2);
    if paragraph.is_some() {
        return paragraph;
    }

    let line = window.iter().rposition(|&c| c == '\n').map(|i| floor + i + 1);
    if line.is_some() {
        return line;
    }

    window.iter().rposition(|&c| c == ' ').map(|i| floor + i + 1)
}

fn make_chunk(document_id: &str, index: usize, text: &str, start: usize, end: usize) -> Chunk {
    let hash = content_hash(text);
    let name = format!("{}\u{0}{}\u{0}{}", document_id, index, hash);

    Chunk {
        id: Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes()).to_string(),
        document_id: document_id.to_string(),
        index,
        text: text.to_string(),
        char_start: start,
        char_end: end,
        hash,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(size: usize, overlap: usize, min: usize) -> ChunkerConfig {
        ChunkerConfig {
            chunk_size: size,
            chunk_overlap: overlap,
            min_chunk_size: min,
        }
    }

    #[test]
    fn test_empty_text() {
        assert!(chunk_text("doc1", "", &ChunkerConfig::default()).is_empty());
    }

    #[test]
    fn test_short_text_single_chunk() {
        let chunks = chunk_text("doc1", "Hello, world!", &cfg(100, 10, 50));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Hello, world!");
        assert_eq!(chunks[0].char_start, 0);
        assert_eq!(chunks[0].char_end, 13);
    }

    #[test]
    fn test_fixed_windows_without_breaks() {
        let text = "x".repeat(2000);
        let chunks = chunk_text("doc1", &text, &cfg(800, 100, 50));
        let spans: Vec<(usize, usize)> = chunks.iter().map(|c| (c.char_start, c.char_end)).collect();
        assert_eq!(spans, vec![(0, 800), (700, 1500), (1400, 2000)]);
    }

    #[test]
    fn test_prefers_paragraph_break() {
        let text = format!("{}\n\n{}", "a".repeat(70), "b".repeat(70));
        let chunks = chunk_text("doc1", &text, &cfg(100, 10, 5));
        assert_eq!(chunks[0].text, format!("{}\n\n", "a".repeat(70)));
        assert!(chunks[1].text.ends_with('b'));
    }

    #[test]
    fn test_offsets_map_back_to_text() {
        let text = "Ünïcödé wörds ñ ".repeat(40);
        let chunks = chunk_text("doc1", &text, &cfg(64, 16, 8));
        let chars: Vec<char> = text.chars().collect();
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.index, i);
            let span: String = chars[c.char_start..c.char_end].iter().collect();
            assert_eq!(span, c.text);
            assert!(c.text.chars().count() <= 64);
        }
    }

    #[test]
    fn test_windows_overlap() {
        let text = "word ".repeat(100);
        let chunks = chunk_text("doc1", &text, &cfg(60, 20, 5));
        for pair in chunks.windows(2) {
            assert!(pair[1].char_start < pair[0].char_end);
            assert!(pair[1].char_start > pair[0].char_start);
        }
        assert_eq!(chunks.last().unwrap().char_end, text.chars().count());
    }

    #[test]
    fn test_trailing_fragment_dropped() {
        // 3 windows of 100 with no overlap leave a 5-char tail.
        let text = "y".repeat(305);
        let chunks = chunk_text("doc1", &text, &cfg(100, 0, 10));
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].char_end, 300);
    }

    #[test]
    fn test_only_chunk_kept_even_if_small() {
        let chunks = chunk_text("doc1", "tiny", &cfg(100, 0, 10));
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn test_deterministic() {
        let text = "Alpha beta gamma.\n\nDelta epsilon.\nZeta eta theta. ".repeat(30);
        let c1 = chunk_text("doc1", &text, &cfg(120, 30, 10));
        let c2 = chunk_text("doc1", &text, &cfg(120, 30, 10));
        assert_eq!(c1, c2);
    }

    #[test]
    fn test_ids_depend_on_document() {
        let a = chunk_text("a.md", "same text", &ChunkerConfig::default());
        let b = chunk_text("b.md", "same text", &ChunkerConfig::default());
        assert_eq!(a[0].hash, b[0].hash);
        assert_ne!(a[0].id, b[0].id);
    }

    #[test]
    fn test_validate() {
        assert!(cfg(100, 20, 5).validate().is_ok());
        assert!(cfg(0, 0, 0).validate().is_err());
        assert!(cfg(100, 100, 5).validate().is_err());
    }
}
