//! Vector index contract.
//!
//! The [`VectorIndex`] trait is the only way the engine touches stored
//! embeddings. Backends (in-memory here, SQLite in the app crate) must
//! uphold the same guarantees:
//!
//! | Method | Guarantee |
//! |--------|-----------|
//! | [`upsert`](VectorIndex::upsert) | Replaces every entry of the document atomically; readers never see old and new entries together |
//! | [`delete`](VectorIndex::delete) | Removes every entry of the document; unknown ids are a no-op |
//! | [`query`](VectorIndex::query) | At most `k` entries, cosine similarity descending, ties by document recency |
//! | [`count`](VectorIndex::count) | Number of entries |
//! | [`list_document_ids`](VectorIndex::list_document_ids) | Ids of indexed documents, sorted |
//!
//! Failures are reported, never papered over with partial results.

pub mod memory;

use std::cmp::Ordering;
use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::IndexResult;
use crate::models::{IndexEntry, IndexedDocument, ScoredEntry};

/// Optional restrictions applied to a similarity query.
#[derive(Debug, Clone, Default)]
pub struct QueryFilter {
    /// Documents that must not appear in the results.
    pub exclude_documents: HashSet<String>,
    /// Only documents whose id starts with this prefix.
    pub path_prefix: Option<String>,
    /// Only documents modified at or after this instant.
    pub modified_since: Option<DateTime<Utc>>,
}

impl QueryFilter {
    pub fn is_empty(&self) -> bool {
        self.exclude_documents.is_empty()
            && self.path_prefix.is_none()
            && self.modified_since.is_none()
    }

    /// Whether a document passes this filter.
    pub fn admits(&self, document_id: &str, modified_at: DateTime<Utc>) -> bool {
        if self.exclude_documents.contains(document_id) {
            return false;
        }
        if let Some(prefix) = &self.path_prefix {
            if !document_id.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if let Some(since) = self.modified_since {
            if modified_at < since {
                return false;
            }
        }
        true
    }
}

/// Storage and nearest-neighbour search over chunk embeddings.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Replace all entries of `document` with `entries`.
    async fn upsert(&self, document: &IndexedDocument, entries: Vec<IndexEntry>)
        -> IndexResult<()>;

    /// Remove all entries of a document. Returns whether anything was removed.
    async fn delete(&self, document_id: &str) -> IndexResult<bool>;

    /// Top-`k` entries by cosine similarity to `vector`.
    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: &QueryFilter,
    ) -> IndexResult<Vec<ScoredEntry>>;

    /// Total number of entries.
    async fn count(&self) -> IndexResult<usize>;

    /// Ids of all indexed documents, sorted ascending.
    async fn list_document_ids(&self) -> IndexResult<Vec<String>>;

    /// Summaries of all indexed documents, sorted by id.
    async fn list_documents(&self) -> IndexResult<Vec<IndexedDocument>>;

    /// Summary of one indexed document.
    async fn document(&self, document_id: &str) -> IndexResult<Option<IndexedDocument>>;
}

/// Result ordering shared by every backend.
///
/// Score descending, then document `modified_at` descending (more recent
/// wins a tie), then document id and chunk index ascending so the order is
/// total and stable.
pub fn compare_scored(a: &ScoredEntry, b: &ScoredEntry) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.modified_at.cmp(&a.modified_at))
        .then_with(|| a.chunk.document_id.cmp(&b.chunk.document_id))
        .then_with(|| a.chunk.index.cmp(&b.chunk.index))
}

/// Sort hits with [`compare_scored`] and keep the first `k`.
pub fn rank_and_truncate(mut hits: Vec<ScoredEntry>, k: usize) -> Vec<ScoredEntry> {
    hits.sort_by(compare_scored);
    hits.truncate(k);
    hits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, Metadata};
    use chrono::TimeZone;

    fn hit(doc: &str, index: usize, score: f32, day: u32) -> ScoredEntry {
        ScoredEntry {
            chunk: Chunk {
                id: format!("{doc}-{index}"),
                document_id: doc.to_string(),
                index,
                text: String::new(),
                char_start: 0,
                char_end: 0,
                hash: String::new(),
            },
            score,
            title: doc.to_string(),
            modified_at: Utc.with_ymd_and_hms(2026, 1, day, 0, 0, 0).unwrap(),
            metadata: Metadata::new(),
        }
    }

    #[test]
    fn test_ranking_ties_prefer_recent() {
        let hits = vec![
            hit("old.md", 0, 0.5, 1),
            hit("new.md", 0, 0.5, 9),
            hit("best.md", 0, 0.9, 1),
        ];
        let ranked = rank_and_truncate(hits, 10);
        let order: Vec<&str> = ranked.iter().map(|h| h.chunk.document_id.as_str()).collect();
        assert_eq!(order, vec!["best.md", "new.md", "old.md"]);
    }

    #[test]
    fn test_truncate_to_k() {
        let hits = (0..5).map(|i| hit("a.md", i, 0.1 * i as f32, 1)).collect();
        let ranked = rank_and_truncate(hits, 2);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].chunk.index, 4);
    }

    #[test]
    fn test_filter() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let mut filter = QueryFilter {
            path_prefix: Some("Daily/".into()),
            ..Default::default()
        };
        assert!(filter.admits("Daily/x.md", ts));
        assert!(!filter.admits("Projects/x.md", ts));

        filter.exclude_documents.insert("Daily/x.md".into());
        assert!(!filter.admits("Daily/x.md", ts));

        filter.modified_since = Some(Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap());
        assert!(!filter.admits("Daily/y.md", ts));
    }
}
