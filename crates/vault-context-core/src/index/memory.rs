//! In-memory [`VectorIndex`] implementation.
//!
//! Each document's entries live in one slot of a `HashMap` behind a single
//! `std::sync::RwLock`. An upsert swaps the whole slot under the write
//! lock, so a concurrent query sees either the old slot or the new one.
//! Search is brute-force cosine similarity.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::error::{IndexError, IndexResult};
use crate::models::{IndexEntry, IndexedDocument, ScoredEntry};

use super::{rank_and_truncate, QueryFilter, VectorIndex};

struct Slot {
    document: IndexedDocument,
    entries: Vec<IndexEntry>,
}

/// In-memory vector index for tests and embedded use.
#[derive(Default)]
pub struct InMemoryIndex {
    slots: RwLock<HashMap<String, Slot>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned() -> IndexError {
        IndexError::Unavailable("in-memory index lock poisoned".to_string())
    }

    /// Dimensionality of stored vectors, if any are stored.
    fn stored_dims(slots: &HashMap<String, Slot>) -> Option<usize> {
        slots
            .values()
            .flat_map(|s| s.entries.first())
            .map(|e| e.vector.len())
            .next()
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn upsert(
        &self,
        document: &IndexedDocument,
        entries: Vec<IndexEntry>,
    ) -> IndexResult<()> {
        let mut slots = self.slots.write().map_err(|_| Self::poisoned())?;

        let expected = slots
            .iter()
            .filter(|(id, _)| **id != document.id)
            .flat_map(|(_, s)| s.entries.first())
            .map(|e| e.vector.len())
            .next()
            .or_else(|| entries.first().map(|e| e.vector.len()));
        if let Some(expected) = expected {
            if let Some(bad) = entries.iter().find(|e| e.vector.len() != expected) {
                return Err(IndexError::DimensionMismatch {
                    expected,
                    actual: bad.vector.len(),
                });
            }
        }

        let mut document = document.clone();
        document.chunk_count = entries.len();
        slots.insert(document.id.clone(), Slot { document, entries });
        Ok(())
    }

    async fn delete(&self, document_id: &str) -> IndexResult<bool> {
        let mut slots = self.slots.write().map_err(|_| Self::poisoned())?;
        Ok(slots.remove(document_id).is_some())
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: &QueryFilter,
    ) -> IndexResult<Vec<ScoredEntry>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let slots = self.slots.read().map_err(|_| Self::poisoned())?;

        if let Some(expected) = Self::stored_dims(&slots) {
            if expected != vector.len() {
                return Err(IndexError::DimensionMismatch {
                    expected,
                    actual: vector.len(),
                });
            }
        }

        let hits: Vec<ScoredEntry> = slots
            .values()
            .filter(|s| filter.admits(&s.document.id, s.document.modified_at))
            .flat_map(|s| {
                s.entries.iter().map(move |e| ScoredEntry {
                    chunk: e.chunk.clone(),
                    score: cosine_similarity(vector, &e.vector),
                    title: s.document.title.clone(),
                    modified_at: e.modified_at,
                    metadata: e.metadata.clone(),
                })
            })
            .collect();

        Ok(rank_and_truncate(hits, k))
    }

    async fn count(&self) -> IndexResult<usize> {
        let slots = self.slots.read().map_err(|_| Self::poisoned())?;
        Ok(slots.values().map(|s| s.entries.len()).sum())
    }

    async fn list_document_ids(&self) -> IndexResult<Vec<String>> {
        let slots = self.slots.read().map_err(|_| Self::poisoned())?;
        let mut ids: Vec<String> = slots.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    async fn list_documents(&self) -> IndexResult<Vec<IndexedDocument>> {
        let slots = self.slots.read().map_err(|_| Self::poisoned())?;
        let mut docs: Vec<IndexedDocument> = slots.values().map(|s| s.document.clone()).collect();
        docs.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(docs)
    }

    async fn document(&self, document_id: &str) -> IndexResult<Option<IndexedDocument>> {
        let slots = self.slots.read().map_err(|_| Self::poisoned())?;
        Ok(slots.get(document_id).map(|s| s.document.clone()))
    }
}
