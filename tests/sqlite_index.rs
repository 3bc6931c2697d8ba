use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use tempfile::TempDir;

use vault_context::sqlite_index::SqliteIndex;
use vault_context_core::chunk::{chunk_text, ChunkerConfig};
use vault_context_core::embedding::HashingEmbedder;
use vault_context_core::error::IndexError;
use vault_context_core::index::{QueryFilter, VectorIndex};
use vault_context_core::models::{Document, IndexEntry, IndexedDocument};

const DIMS: usize = 64;

fn entries_for(doc: &Document, embedder: &HashingEmbedder) -> (IndexedDocument, Vec<IndexEntry>) {
    let config = ChunkerConfig {
        chunk_size: 40,
        chunk_overlap: 5,
        min_chunk_size: 5,
    };
    let entries: Vec<IndexEntry> = chunk_text(&doc.id, &doc.text, &config)
        .into_iter()
        .map(|chunk| IndexEntry {
            vector: embedder.embed_sync(&chunk.text),
            chunk,
            document_hash: doc.content_hash.clone(),
            modified_at: doc.modified_at,
            metadata: doc.metadata.clone(),
        })
        .collect();
    (IndexedDocument::from_document(doc, entries.len()), entries)
}

fn note(id: &str, text: &str, days_ago: i64) -> Document {
    let modified = Utc.with_ymd_and_hms(2026, 10, 1, 12, 0, 0).unwrap() - Duration::days(days_ago);
    Document::new(id, id, text, modified, BTreeMap::new())
}

async fn put(index: &SqliteIndex, doc: &Document) {
    let (record, entries) = entries_for(doc, &HashingEmbedder::new(DIMS));
    index.upsert(&record, entries).await.unwrap();
}

async fn open(dir: &Path) -> SqliteIndex {
    SqliteIndex::open(&dir.join("index.sqlite")).await.unwrap()
}

#[tokio::test]
async fn test_upsert_replaces_all_entries() {
    let tmp = TempDir::new().unwrap();
    let index = open(tmp.path()).await;

    let long = note(
        "a.md",
        "first paragraph about compost bins.\n\nsecond paragraph about worms.\n\nthird about leaves.",
        0,
    );
    put(&index, &long).await;
    let before = index.count().await.unwrap();
    assert!(before >= 3, "expected several chunks, got {}", before);

    put(&index, &note("a.md", "short now", 0)).await;
    assert_eq!(index.count().await.unwrap(), 1);

    let doc = index.document("a.md").await.unwrap().unwrap();
    assert_eq!(doc.chunk_count, 1);
    assert_eq!(doc.content_hash, note("a.md", "short now", 0).content_hash);
}

#[tokio::test]
async fn test_entries_survive_reopen() {
    let tmp = TempDir::new().unwrap();
    {
        let index = open(tmp.path()).await;
        put(&index, &note("a.md", "persistent garden notes", 0)).await;
        put(&index, &note("Projects/b.md", "persistent project notes", 1)).await;
        index.pool().close().await;
    }

    let index = open(tmp.path()).await;
    assert_eq!(index.list_document_ids().await.unwrap(), vec!["Projects/b.md", "a.md"]);
    let docs = index.list_documents().await.unwrap();
    assert_eq!(docs.len(), 2);
    assert_eq!(docs[1].title, "a.md");
    assert_eq!(docs[1].metadata["path"], "a.md");
}

#[tokio::test]
async fn test_query_ranks_by_similarity_then_recency() {
    let tmp = TempDir::new().unwrap();
    let index = open(tmp.path()).await;
    let embedder = HashingEmbedder::new(DIMS);

    put(&index, &note("old.md", "bees and honey", 10)).await;
    put(&index, &note("new.md", "bees and honey", 1)).await;
    put(&index, &note("other.md", "tax forms due", 0)).await;

    let hits = index
        .query(&embedder.embed_sync("bees and honey"), 2, &QueryFilter::default())
        .await
        .unwrap();
    let ids: Vec<&str> = hits.iter().map(|h| h.chunk.document_id.as_str()).collect();
    assert_eq!(ids, vec!["new.md", "old.md"]);
    assert!((hits[0].score - 1.0).abs() < 1e-5);
}

#[tokio::test]
async fn test_query_filter_and_zero_k() {
    let tmp = TempDir::new().unwrap();
    let index = open(tmp.path()).await;
    let embedder = HashingEmbedder::new(DIMS);
    put(&index, &note("Daily/2026-09-30.md", "dentist appointment", 1)).await;
    put(&index, &note("Projects/teeth.md", "dentist appointment", 20)).await;
    let probe = embedder.embed_sync("dentist");

    let filter = QueryFilter {
        path_prefix: Some("Daily/".into()),
        ..QueryFilter::default()
    };
    let hits = index.query(&probe, 10, &filter).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].chunk.document_id, "Daily/2026-09-30.md");

    let mut filter = QueryFilter::default();
    filter.exclude_documents.insert("Daily/2026-09-30.md".into());
    let hits = index.query(&probe, 10, &filter).await.unwrap();
    assert!(hits.iter().all(|h| h.chunk.document_id == "Projects/teeth.md"));

    assert!(index.query(&probe, 0, &QueryFilter::default()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_delete_removes_document() {
    let tmp = TempDir::new().unwrap();
    let index = open(tmp.path()).await;
    let embedder = HashingEmbedder::new(DIMS);
    put(&index, &note("a.md", "unique zebra fact", 0)).await;
    put(&index, &note("b.md", "ordinary fact", 0)).await;

    assert!(index.delete("a.md").await.unwrap());
    assert!(!index.delete("a.md").await.unwrap(), "second delete should be a no-op");

    let hits = index
        .query(&embedder.embed_sync("zebra"), 10, &QueryFilter::default())
        .await
        .unwrap();
    assert!(hits.iter().all(|h| h.chunk.document_id != "a.md"));
    assert_eq!(index.list_document_ids().await.unwrap(), vec!["b.md"]);
    assert!(index.document("a.md").await.unwrap().is_none());
}

#[tokio::test]
async fn test_dimension_mismatch_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let index = open(tmp.path()).await;
    put(&index, &note("a.md", "sixty four dims", 0)).await;

    let doc = note("b.md", "wrong width", 0);
    let (record, entries) = entries_for(&doc, &HashingEmbedder::new(DIMS * 2));
    let err = index.upsert(&record, entries).await.unwrap_err();
    assert!(matches!(
        err,
        IndexError::DimensionMismatch { expected: 64, actual: 128 }
    ));
    assert_eq!(index.list_document_ids().await.unwrap(), vec!["a.md"]);

    let err = index
        .query(&[1.0, 0.0], 5, &QueryFilter::default())
        .await
        .unwrap_err();
    assert!(matches!(err, IndexError::DimensionMismatch { .. }));
}

#[tokio::test]
async fn test_reader_never_sees_mixed_versions() {
    let tmp = TempDir::new().unwrap();
    let index = Arc::new(open(tmp.path()).await);
    let embedder = HashingEmbedder::new(DIMS);

    let old = note("d.md", "oldver one\n\noldver two\n\noldver three\n\noldver four", 0);
    let new = note("d.md", "newver one\n\nnewver two", 0);
    put(&index, &old).await;

    let writer = {
        let index = index.clone();
        tokio::spawn(async move {
            for i in 0..30 {
                let doc = if i % 2 == 0 { &new } else { &old };
                put(&index, doc).await;
            }
        })
    };

    let probe = embedder.embed_sync("one two three four");
    for _ in 0..60 {
        let hits = index.query(&probe, 100, &QueryFilter::default()).await.unwrap();
        let old_hits = hits.iter().filter(|h| h.chunk.text.contains("oldver")).count();
        let new_hits = hits.iter().filter(|h| h.chunk.text.contains("newver")).count();
        assert!(
            old_hits == 0 || new_hits == 0,
            "saw {} old and {} new entries at once",
            old_hits,
            new_hits
        );
        assert!(!hits.is_empty(), "document vanished during replace");
        tokio::task::yield_now().await;
    }
    writer.await.unwrap();
}
