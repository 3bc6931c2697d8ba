#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use vault_context::coordinator::{Coordinator, CoordinatorSettings};
use vault_context::corpus::{Corpus, MemoryCorpus};
use vault_context_core::chunk::ChunkerConfig;
use vault_context_core::embedding::{Embedder, HashingEmbedder};
use vault_context_core::error::{EmbedError, EmbedResult, IndexError, IndexResult};
use vault_context_core::index::memory::InMemoryIndex;
use vault_context_core::index::{QueryFilter, VectorIndex};
use vault_context_core::models::{IndexEntry, IndexedDocument, ScoredEntry};

pub const DIMS: usize = 128;

/// Records every upsert and can be switched into a failing state.
#[derive(Default)]
pub struct RecordingIndex {
    inner: InMemoryIndex,
    upserts: Mutex<Vec<(String, Vec<String>)>>,
    pub unavailable: AtomicBool,
}

impl RecordingIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_count(&self) -> usize {
        self.upserts.lock().unwrap().len()
    }

    pub fn upserts_for(&self, id: &str) -> Vec<Vec<String>> {
        self.upserts
            .lock()
            .unwrap()
            .iter()
            .filter(|(doc, _)| doc == id)
            .map(|(_, texts)| texts.clone())
            .collect()
    }

    fn check(&self) -> IndexResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(IndexError::Unavailable("switched off".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for RecordingIndex {
    async fn upsert(&self, document: &IndexedDocument, entries: Vec<IndexEntry>) -> IndexResult<()> {
        self.check()?;
        let texts = entries.iter().map(|e| e.chunk.text.clone()).collect();
        self.upserts
            .lock()
            .unwrap()
            .push((document.id.clone(), texts));
        self.inner.upsert(document, entries).await
    }

    async fn delete(&self, document_id: &str) -> IndexResult<bool> {
        self.check()?;
        self.inner.delete(document_id).await
    }

    async fn query(&self, vector: &[f32], k: usize, filter: &QueryFilter) -> IndexResult<Vec<ScoredEntry>> {
        self.check()?;
        self.inner.query(vector, k, filter).await
    }

    async fn count(&self) -> IndexResult<usize> {
        self.check()?;
        self.inner.count().await
    }

    async fn list_document_ids(&self) -> IndexResult<Vec<String>> {
        self.check()?;
        self.inner.list_document_ids().await
    }

    async fn list_documents(&self) -> IndexResult<Vec<IndexedDocument>> {
        self.check()?;
        self.inner.list_documents().await
    }

    async fn document(&self, document_id: &str) -> IndexResult<Option<IndexedDocument>> {
        self.check()?;
        self.inner.document(document_id).await
    }
}

/// Hashing embedder with injectable latency and failures.
pub struct TestEmbedder {
    inner: HashingEmbedder,
    pub delay: Duration,
    /// Texts containing this marker fail to embed.
    pub poison: Option<String>,
    /// The next `n` calls fail.
    pub fail_next: AtomicUsize,
    pub calls: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl TestEmbedder {
    pub fn new() -> Self {
        Self {
            inner: HashingEmbedder::new(DIMS),
            delay: Duration::ZERO,
            poison: None,
            fail_next: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_poison(mut self, marker: &str) -> Self {
        self.poison = Some(marker.to_string());
        self
    }
}

#[async_trait]
impl Embedder for TestEmbedder {
    fn model_name(&self) -> &str {
        "test"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed(&self, text: &str) -> EmbedResult<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let failing = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(EmbedError::Unavailable("injected failure".into()));
        }
        if let Some(marker) = &self.poison {
            if text.contains(marker.as_str()) {
                return Err(EmbedError::Unavailable("poisoned text".into()));
            }
        }
        self.inner.embed(text).await
    }
}

pub fn fast_settings() -> CoordinatorSettings {
    CoordinatorSettings {
        chunker: ChunkerConfig {
            chunk_size: 800,
            chunk_overlap: 100,
            min_chunk_size: 20,
        },
        debounce: Duration::from_millis(20),
        max_debounce: Duration::from_millis(200),
        workers: 4,
        retry_base: Duration::from_millis(10),
        retry_max: Duration::from_millis(40),
        max_attempts: 3,
        embed_timeout: Duration::from_secs(5),
        index_timeout: Duration::from_secs(5),
        batch_size: 8,
    }
}

pub struct Harness {
    pub corpus: Arc<MemoryCorpus>,
    pub index: Arc<RecordingIndex>,
    pub embedder: Arc<TestEmbedder>,
    pub coordinator: Coordinator,
}

impl Harness {
    pub fn new(embedder: TestEmbedder, settings: CoordinatorSettings) -> Self {
        let corpus = Arc::new(MemoryCorpus::new());
        let index = Arc::new(RecordingIndex::new());
        let embedder = Arc::new(embedder);
        let coordinator = Coordinator::new(
            corpus.clone() as Arc<dyn Corpus>,
            index.clone() as Arc<dyn VectorIndex>,
            embedder.clone() as Arc<dyn Embedder>,
            settings,
        );
        Self {
            corpus,
            index,
            embedder,
            coordinator,
        }
    }

    pub fn fast() -> Self {
        Self::new(TestEmbedder::new(), fast_settings())
    }

    pub async fn settle(&self) {
        tokio::time::timeout(Duration::from_secs(10), self.coordinator.wait_idle())
            .await
            .expect("coordinator did not become idle");
    }
}

/// Deterministic filler text of `n` characters with no paragraph breaks.
pub fn filler(n: usize, word: &str) -> String {
    let mut out = String::with_capacity(n);
    while out.len() < n {
        out.push_str(word);
        out.push(' ');
    }
    out.truncate(n);
    out
}
