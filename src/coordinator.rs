//! Indexing coordinator.
//!
//! Consumes [`CorpusEvent`]s and keeps the vector index in step with the
//! corpus. Work is keyed by document id:
//!
//! - each document has at most one *driver* task, so passes for the same
//!   document are strictly serialized;
//! - drivers for different documents run concurrently, bounded by a
//!   semaphore of `workers` permits;
//! - every event (re)arms a per-document debounce deadline, capped at
//!   `max_debounce` after the first event of a burst;
//! - an event that arrives while a pass is running is picked up by the
//!   same driver once the pass finishes, re-loading and re-hashing the
//!   document.
//!
//! # Document lifecycle
//!
//! ```text
//! Unindexed ──► Indexing ──► Indexed ──► Stale ──► Indexing ──► …
//!                  │                       ▲
//!                  └──── failure ──────────┘ (retry with backoff)
//! any ──► Removed ──► (untracked once the delete lands)
//! ```
//!
//! A document whose index entries no longer match the corpus (`Stale`,
//! `Indexing` or `Removed` while old entries remain) is listed by
//! [`Coordinator::stale_documents`] so retrieval can skip it.
//!
//! Shutdown cancels pending debounces and retries. A pass that is already
//! running completes; its `upsert` is atomic, so the index never holds a
//! half-replaced document.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, Notify, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use vault_context_core::chunk::{chunk_text, ChunkerConfig};
use vault_context_core::embedding::{check_dims, Embedder};
use vault_context_core::error::{EmbedError, IndexError};
use vault_context_core::index::VectorIndex;
use vault_context_core::models::{IndexEntry, IndexedDocument};

use crate::config::Config;
use crate::corpus::Corpus;
use crate::timeout;
use crate::watcher::CorpusEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentState {
    Unindexed,
    Indexing,
    Indexed,
    Stale,
    Removed,
}

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub chunker: ChunkerConfig,
    pub debounce: Duration,
    pub max_debounce: Duration,
    pub workers: usize,
    pub retry_base: Duration,
    pub retry_max: Duration,
    pub max_attempts: u32,
    pub embed_timeout: Duration,
    pub index_timeout: Duration,
    pub batch_size: usize,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            chunker: ChunkerConfig::default(),
            debounce: Duration::from_millis(400),
            max_debounce: Duration::from_millis(2000),
            workers: 4,
            retry_base: Duration::from_secs(1),
            retry_max: Duration::from_secs(60),
            max_attempts: 8,
            embed_timeout: Duration::from_secs(30),
            index_timeout: Duration::from_secs(10),
            batch_size: 32,
        }
    }
}

impl CoordinatorSettings {
    pub fn from_config(config: &Config) -> Self {
        let indexing = &config.indexing;
        Self {
            chunker: config.chunking.chunker(),
            debounce: indexing.debounce(),
            max_debounce: indexing.max_debounce(),
            workers: indexing.workers.max(1),
            retry_base: Duration::from_millis(indexing.retry_base_ms),
            retry_max: Duration::from_millis(indexing.retry_max_ms),
            max_attempts: indexing.max_attempts.max(1),
            embed_timeout: config.embedding.timeout(),
            index_timeout: indexing.index_timeout(),
            batch_size: config.embedding.batch_size.max(1),
        }
    }

    /// Delay before retry number `attempt` (1-based).
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.retry_base.saturating_mul(factor).min(self.retry_max)
    }
}

/// Counters since the coordinator started.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CoordinatorStats {
    pub events: u64,
    pub passes: u64,
    pub indexed: u64,
    pub unchanged: u64,
    pub removed: u64,
    pub failed: u64,
}

#[derive(Default)]
struct Counters {
    events: AtomicU64,
    passes: AtomicU64,
    indexed: AtomicU64,
    unchanged: AtomicU64,
    removed: AtomicU64,
    failed: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CoordinatorStats {
        CoordinatorStats {
            events: self.events.load(Ordering::Relaxed),
            passes: self.passes.load(Ordering::Relaxed),
            indexed: self.indexed.load(Ordering::Relaxed),
            unchanged: self.unchanged.load(Ordering::Relaxed),
            removed: self.removed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// What a reconciliation pass found.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub added: usize,
    pub changed: usize,
    pub removed: usize,
    pub unchanged: usize,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.added == 0 && self.changed == 0 && self.removed == 0
    }
}

struct Slot {
    state: DocumentState,
    /// Content hash of what the index currently holds for this document.
    indexed_hash: Option<String>,
    deadline: Option<Instant>,
    burst_start: Option<Instant>,
    attempts: u32,
    driver: bool,
    wake: Arc<Notify>,
}

impl Slot {
    fn new() -> Self {
        Self {
            state: DocumentState::Unindexed,
            indexed_hash: None,
            deadline: None,
            burst_start: None,
            attempts: 0,
            driver: false,
            wake: Arc::new(Notify::new()),
        }
    }
}

enum Outcome {
    Indexed { hash: String, chunks: usize },
    Unchanged { hash: String },
    Removed { existed: bool },
}

#[derive(Debug, Error)]
enum PassError {
    #[error("corpus read failed: {0:#}")]
    Corpus(anyhow::Error),

    #[error(transparent)]
    Embed(#[from] EmbedError),

    #[error(transparent)]
    Index(#[from] IndexError),
}

impl PassError {
    fn retryable(&self) -> bool {
        !matches!(self, PassError::Embed(EmbedError::Disabled))
    }
}

struct Inner {
    corpus: Arc<dyn Corpus>,
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    settings: CoordinatorSettings,
    slots: Mutex<HashMap<String, Slot>>,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    cancel: CancellationToken,
    idle: Notify,
    counters: Counters,
    last_reconciled: Mutex<Option<DateTime<Utc>>>,
}

impl Inner {
    fn slots(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Keyed, debounced indexing queue. Cheap to clone.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

impl Coordinator {
    pub fn new(
        corpus: Arc<dyn Corpus>,
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        settings: CoordinatorSettings,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(settings.workers.max(1)));
        Self {
            inner: Arc::new(Inner {
                corpus,
                index,
                embedder,
                settings,
                slots: Mutex::new(HashMap::new()),
                permits,
                tracker: TaskTracker::new(),
                cancel: CancellationToken::new(),
                idle: Notify::new(),
                counters: Counters::default(),
                last_reconciled: Mutex::new(None),
            }),
        }
    }

    /// Queue an event behind the document's debounce window.
    pub fn submit(&self, event: CorpusEvent) {
        let now = Instant::now();
        self.schedule(event, |slot, settings| {
            let burst_start = *slot.burst_start.get_or_insert(now);
            (now + settings.debounce).min(burst_start + settings.max_debounce)
        });
    }

    /// Queue an event for immediate processing (no debounce).
    pub fn submit_now(&self, event: CorpusEvent) {
        let now = Instant::now();
        self.schedule(event, |_, _| now);
    }

    fn schedule<F>(&self, event: CorpusEvent, deadline: F)
    where
        F: FnOnce(&mut Slot, &CoordinatorSettings) -> Instant,
    {
        if self.inner.cancel.is_cancelled() {
            return;
        }
        Counters::bump(&self.inner.counters.events);
        let id = event.document_id().to_string();
        tracing::debug!(id = %id, kind = event.kind(), "event queued");

        let mut slots = self.inner.slots();
        let slot = slots.entry(id.clone()).or_insert_with(Slot::new);
        slot.state = match (&event, slot.state) {
            (CorpusEvent::Removed(_), _) => DocumentState::Removed,
            (_, DocumentState::Indexed) => DocumentState::Stale,
            (_, DocumentState::Removed) if slot.indexed_hash.is_some() => DocumentState::Stale,
            (_, DocumentState::Removed) => DocumentState::Unindexed,
            (_, other) => other,
        };
        slot.attempts = 0;
        let at = deadline(slot, &self.inner.settings);
        slot.deadline = Some(at);

        if slot.driver {
            slot.wake.notify_one();
        } else {
            slot.driver = true;
            let wake = slot.wake.clone();
            drop(slots);
            self.inner.tracker.spawn(drive(self.inner.clone(), id, wake));
        }
    }

    /// Forward events from the watcher until shutdown or channel close.
    pub async fn run(&self, mut events: mpsc::UnboundedReceiver<CorpusEvent>) {
        loop {
            tokio::select! {
                _ = self.inner.cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => self.submit(event),
                    None => break,
                },
            }
        }
    }

    /// Compare the corpus with the index and queue whatever differs.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let inner = &self.inner;
        let indexed = timeout::index(inner.settings.index_timeout, inner.index.list_documents())
            .await
            .context("Failed to list indexed documents")?;
        let mut known: HashMap<String, String> = indexed
            .into_iter()
            .map(|d| (d.id, d.content_hash))
            .collect();

        let refs = inner.corpus.list().await.context("Failed to list vault")?;
        let mut report = ReconcileReport::default();
        let mut events = Vec::new();

        for doc_ref in refs {
            let indexed_hash = known.remove(&doc_ref.id);
            let current = match inner.corpus.load(&doc_ref.id).await {
                Ok(Some(doc)) => Some(doc.content_hash),
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(id = %doc_ref.id, error = %e, "could not read document during reconcile");
                    None
                }
            };

            match (&indexed_hash, &current) {
                (None, _) => {
                    report.added += 1;
                    events.push(CorpusEvent::Added(doc_ref.id.clone()));
                }
                (Some(old), Some(new)) if old == new => report.unchanged += 1,
                _ => {
                    report.changed += 1;
                    events.push(CorpusEvent::Changed(doc_ref.id.clone()));
                }
            }

            if let Some(hash) = indexed_hash {
                self.remember_indexed(doc_ref.id, hash);
            }
        }

        for (id, hash) in known {
            report.removed += 1;
            self.remember_indexed(id.clone(), hash);
            events.push(CorpusEvent::Removed(id));
        }

        for event in events {
            self.submit_now(event);
        }

        *inner
            .last_reconciled
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(Utc::now());
        tracing::info!(
            added = report.added,
            changed = report.changed,
            removed = report.removed,
            unchanged = report.unchanged,
            "reconciliation complete"
        );
        Ok(report)
    }

    /// Record what the index holds for a document this coordinator has not
    /// worked on yet, so later events mark its entries stale.
    fn remember_indexed(&self, id: String, hash: String) {
        let mut slots = self.inner.slots();
        let slot = slots.entry(id).or_insert_with(Slot::new);
        if slot.indexed_hash.is_none() && !slot.driver {
            slot.indexed_hash = Some(hash);
            if slot.state == DocumentState::Unindexed {
                slot.state = DocumentState::Indexed;
            }
        }
    }

    /// Resolve once no document has queued or running work.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Stop accepting work, drop pending debounces and wait for running
    /// passes to finish.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        tracing::info!("indexing coordinator stopped");
    }

    pub fn stats(&self) -> CoordinatorStats {
        self.inner.counters.snapshot()
    }

    /// Current lifecycle state; untracked documents are `Unindexed`.
    pub fn document_state(&self, id: &str) -> DocumentState {
        self.inner
            .slots()
            .get(id)
            .map(|s| s.state)
            .unwrap_or(DocumentState::Unindexed)
    }

    /// Documents whose indexed vectors no longer match the corpus.
    pub fn stale_documents(&self) -> HashSet<String> {
        self.inner
            .slots()
            .iter()
            .filter(|(_, s)| {
                matches!(
                    s.state,
                    DocumentState::Stale | DocumentState::Indexing | DocumentState::Removed
                ) && s.indexed_hash.is_some()
            })
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Documents with tracking state.
    pub fn tracked(&self) -> usize {
        self.inner.slots().len()
    }

    /// Documents with queued or running work.
    pub fn pending(&self) -> usize {
        self.inner.slots().values().filter(|s| s.driver).count()
    }

    pub fn last_reconciled_at(&self) -> Option<DateTime<Utc>> {
        *self
            .inner
            .last_reconciled
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }
}

/// The per-document driver: waits out the debounce, runs passes one at a
/// time and exits when no work is left.
async fn drive(inner: Arc<Inner>, id: String, wake: Arc<Notify>) {
    loop {
        let deadline = {
            let mut slots = inner.slots();
            let Some(slot) = slots.get_mut(&id) else {
                break;
            };
            match slot.deadline {
                Some(deadline) => deadline,
                None => {
                    slot.driver = false;
                    break;
                }
            }
        };

        if Instant::now() < deadline {
            tokio::select! {
                _ = inner.cancel.cancelled() => {
                    release(&inner, &id);
                    break;
                }
                _ = tokio::time::sleep_until(deadline) => {}
                _ = wake.notified() => {}
            }
            // The deadline may have moved while we slept.
            continue;
        }

        if let Some(slot) = inner.slots().get_mut(&id) {
            slot.deadline = None;
            slot.burst_start = None;
        }

        let permit = tokio::select! {
            _ = inner.cancel.cancelled() => None,
            permit = inner.permits.clone().acquire_owned() => permit.ok(),
        };
        let Some(permit) = permit else {
            release(&inner, &id);
            break;
        };

        Counters::bump(&inner.counters.passes);
        let result = index_pass(&inner, &id).await;
        drop(permit);
        if !settle(&inner, &id, result) {
            break;
        }
    }
    inner.idle.notify_waiters();
}

fn release(inner: &Inner, id: &str) {
    if let Some(slot) = inner.slots().get_mut(id) {
        slot.driver = false;
    }
}

/// Record the outcome of a pass and schedule a retry if it failed.
///
/// Returns `false` when the document's tracking state was dropped; the
/// driver must then exit without touching the slot map again.
fn settle(inner: &Inner, id: &str, result: Result<Outcome, PassError>) -> bool {
    let settings = &inner.settings;
    let mut slots = inner.slots();
    let Some(slot) = slots.get_mut(id) else {
        return false;
    };
    let requeued = slot.deadline.is_some();

    match result {
        Ok(Outcome::Indexed { hash, chunks }) => {
            Counters::bump(&inner.counters.indexed);
            tracing::info!(id = %id, chunks, "document indexed");
            slot.indexed_hash = Some(hash);
            slot.attempts = 0;
            slot.state = settled_state(requeued);
        }
        Ok(Outcome::Unchanged { hash }) => {
            Counters::bump(&inner.counters.unchanged);
            tracing::debug!(id = %id, "content unchanged, skipping");
            slot.indexed_hash = Some(hash);
            slot.attempts = 0;
            slot.state = settled_state(requeued);
        }
        Ok(Outcome::Removed { existed }) => {
            Counters::bump(&inner.counters.removed);
            if existed {
                tracing::info!(id = %id, "document removed from index");
            }
            if !requeued {
                slots.remove(id);
                return false;
            }
            slot.indexed_hash = None;
            slot.attempts = 0;
            slot.state = DocumentState::Unindexed;
        }
        Err(e) => {
            Counters::bump(&inner.counters.failed);
            slot.attempts += 1;
            slot.state = DocumentState::Stale;
            if requeued {
                tracing::warn!(id = %id, error = %e, "index pass failed, newer event queued");
            } else if e.retryable() && slot.attempts < settings.max_attempts {
                let delay = settings.backoff(slot.attempts);
                tracing::warn!(
                    id = %id,
                    error = %e,
                    attempt = slot.attempts,
                    retry_in_ms = delay.as_millis() as u64,
                    "index pass failed, will retry"
                );
                slot.deadline = Some(Instant::now() + delay);
            } else if e.retryable() {
                tracing::error!(id = %id, error = %e, attempts = slot.attempts, "giving up on document");
            } else {
                tracing::debug!(id = %id, error = %e, "document not indexed");
            }
        }
    }
    true
}

fn settled_state(requeued: bool) -> DocumentState {
    if requeued {
        DocumentState::Stale
    } else {
        DocumentState::Indexed
    }
}

/// One pass over a document: load, compare hashes, chunk, embed, upsert.
async fn index_pass(inner: &Inner, id: &str) -> Result<Outcome, PassError> {
    let settings = &inner.settings;

    let Some(doc) = inner.corpus.load(id).await.map_err(PassError::Corpus)? else {
        let existed = timeout::index(settings.index_timeout, inner.index.delete(id)).await?;
        return Ok(Outcome::Removed { existed });
    };

    let known = inner.slots().get(id).and_then(|s| s.indexed_hash.clone());
    let known = match known {
        Some(hash) => Some(hash),
        None => timeout::index(settings.index_timeout, inner.index.document(id))
            .await?
            .map(|d| d.content_hash),
    };
    if known.as_deref() == Some(doc.content_hash.as_str()) {
        return Ok(Outcome::Unchanged {
            hash: doc.content_hash,
        });
    }

    if let Some(slot) = inner.slots().get_mut(id) {
        slot.state = DocumentState::Indexing;
    }

    let chunks = chunk_text(&doc.id, &doc.text, &settings.chunker);
    let mut vectors = Vec::with_capacity(chunks.len());
    for batch in chunks.chunks(settings.batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let embedded =
            timeout::embed(settings.embed_timeout, inner.embedder.embed_batch(&texts)).await?;
        if embedded.len() != texts.len() {
            return Err(EmbedError::InvalidResponse(format!(
                "expected {} vectors, got {}",
                texts.len(),
                embedded.len()
            ))
            .into());
        }
        for vector in &embedded {
            check_dims(inner.embedder.dims(), vector)?;
        }
        vectors.extend(embedded);
    }

    let entries: Vec<IndexEntry> = chunks
        .into_iter()
        .zip(vectors)
        .map(|(chunk, vector)| IndexEntry {
            chunk,
            vector,
            document_hash: doc.content_hash.clone(),
            modified_at: doc.modified_at,
            metadata: doc.metadata.clone(),
        })
        .collect();
    let record = IndexedDocument::from_document(&doc, entries.len());
    timeout::index(settings.index_timeout, inner.index.upsert(&record, entries)).await?;

    Ok(Outcome::Indexed {
        hash: doc.content_hash,
        chunks: record.chunk_count,
    })
}
