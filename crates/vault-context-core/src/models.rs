//! Core data models shared by the engine and the application crate.
//!
//! | Type | Lifetime |
//! |------|----------|
//! | [`Document`] | Loaded on demand from the corpus, never persisted by the engine |
//! | [`Chunk`] | Derived from a document by the chunker |
//! | [`IndexEntry`] | A chunk plus its vector, owned by the vector index |
//! | [`IndexedDocument`] | Per-document summary owned by the vector index |
//! | [`ScoredEntry`] | A query hit |

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Open key/value metadata attached to documents and index entries.
///
/// The keys in [`RESERVED_METADATA_KEYS`] are always populated by the
/// engine and take precedence over user-supplied front-matter.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Metadata keys the engine writes itself.
pub const RESERVED_METADATA_KEYS: [&str; 3] = ["path", "title", "modified_at"];

/// A single note in the vault.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Stable identifier: the path relative to the vault root with `/` separators.
    pub id: String,
    pub title: String,
    pub text: String,
    pub modified_at: DateTime<Utc>,
    /// SHA-256 hex of `text`.
    pub content_hash: String,
    pub metadata: Metadata,
}

impl Document {
    /// Build a document, computing its content hash and reserved metadata.
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        text: impl Into<String>,
        modified_at: DateTime<Utc>,
        extra: Metadata,
    ) -> Self {
        let id = id.into();
        let title = title.into();
        let text = text.into();
        let content_hash = content_hash(&text);

        let mut metadata = extra;
        metadata.insert("path".to_string(), serde_json::Value::String(id.clone()));
        metadata.insert("title".to_string(), serde_json::Value::String(title.clone()));
        metadata.insert(
            "modified_at".to_string(),
            serde_json::Value::String(modified_at.to_rfc3339()),
        );

        Self {
            id,
            title,
            text,
            modified_at,
            content_hash,
            metadata,
        }
    }

    /// The file name without its extension (`Daily/2026-10-16.md` → `2026-10-16`).
    pub fn file_stem(&self) -> &str {
        file_stem(&self.id)
    }
}

/// A contiguous span of a document's text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Deterministic UUID derived from document id, index and text hash.
    pub id: String,
    pub document_id: String,
    pub index: usize,
    pub text: String,
    /// Character offset (not byte offset) of the first character.
    pub char_start: usize,
    /// Character offset one past the last character.
    pub char_end: usize,
    /// SHA-256 hex of `text`.
    pub hash: String,
}

impl Chunk {
    /// True when this chunk's span lies entirely inside `other`'s span of the same document.
    pub fn is_contained_in(&self, other: &Chunk) -> bool {
        self.document_id == other.document_id
            && other.char_start <= self.char_start
            && self.char_end <= other.char_end
    }
}

/// The unit stored in the vector index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
    /// Content hash of the document at the time the chunk was embedded.
    pub document_hash: String,
    pub modified_at: DateTime<Utc>,
    pub metadata: Metadata,
}

/// What the vector index knows about a document as a whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedDocument {
    pub id: String,
    pub title: String,
    pub content_hash: String,
    pub modified_at: DateTime<Utc>,
    pub metadata: Metadata,
    pub chunk_count: usize,
}

impl IndexedDocument {
    pub fn from_document(doc: &Document, chunk_count: usize) -> Self {
        Self {
            id: doc.id.clone(),
            title: doc.title.clone(),
            content_hash: doc.content_hash.clone(),
            modified_at: doc.modified_at,
            metadata: doc.metadata.clone(),
            chunk_count,
        }
    }
}

/// An index entry returned from a similarity query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredEntry {
    pub chunk: Chunk,
    /// Cosine similarity in `[-1.0, 1.0]`.
    pub score: f32,
    pub title: String,
    pub modified_at: DateTime<Utc>,
    pub metadata: Metadata,
}

/// SHA-256 hex digest of a string.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// File stem of a `/`-separated document id.
pub fn file_stem(id: &str) -> &str {
    let name = id.rsplit('/').next().unwrap_or(id);
    match name.rfind('.') {
        Some(0) | None => name,
        Some(dot) => &name[..dot],
    }
}
