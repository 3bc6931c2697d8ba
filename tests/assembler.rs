mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, TimeZone};

use common::{filler, Harness, TestEmbedder};
use vault_context::assembler::{AnchorResolver, AssemblerSettings, ContextAssembler, ContextRequest};
use vault_context::coordinator::DocumentState;
use vault_context::watcher::CorpusEvent;
use vault_context_core::context::Section;
use vault_context_core::index::VectorIndex;

const LOREM: &str = "lorem ipsum dolor sit amet consectetur adipiscing elit sed do eiusmod tempor";

fn morning() -> DateTime<FixedOffset> {
    FixedOffset::east_opt(2 * 3600)
        .unwrap()
        .with_ymd_and_hms(2026, 10, 16, 9, 30, 0)
        .unwrap()
}

fn settings() -> AssemblerSettings {
    AssemblerSettings {
        top_k: 5,
        budget: 6000,
        preview_chars: 500,
        anchor: Some(AnchorResolver::new("today.md").unwrap()),
        query_timeout: Duration::from_millis(200),
    }
}

fn assembler(h: &Harness, embedder: Arc<TestEmbedder>, settings: AssemblerSettings) -> ContextAssembler {
    ContextAssembler::new(h.corpus.clone(), h.index.clone(), embedder, settings)
}

/// A 50-character anchor note and a 2000-character note whose middle
/// chunk alone mentions quokka marmalade.
async fn indexed_pair() -> Harness {
    let h = Harness::fast();
    h.corpus.put("today.md", &filler(50, "standup at nine then groceries"));
    let notes = format!(
        "{} {} {}",
        filler(899, LOREM),
        filler(441, "quokka marmalade"),
        filler(658, LOREM)
    );
    assert_eq!(notes.chars().count(), 2000);
    h.corpus.put("notes.md", &notes);

    h.coordinator.submit_now(CorpusEvent::Added("today.md".into()));
    h.coordinator.submit_now(CorpusEvent::Added("notes.md".into()));
    h.settle().await;
    h
}

#[tokio::test]
async fn test_unique_phrase_ranks_its_chunk_first() {
    let h = indexed_pair().await;
    assert_eq!(h.index.count().await.unwrap(), 4);

    let assembler = assembler(&h, h.embedder.clone(), settings());
    let payload = assembler
        .assemble_at(&ContextRequest::new("quokka marmalade"), morning())
        .await;

    assert!(payload.degraded.is_empty(), "{:?}", payload.degraded);
    let top = &payload.passages[0];
    assert_eq!(top.document_id, "notes.md");
    assert_eq!(top.chunk_index, 1);
    assert!(top.text.contains("quokka marmalade"));

    assert_eq!(
        payload.time_fact.as_deref(),
        Some("Current time: Friday, 16 October 2026, 09:30 (UTC+02:00)")
    );
    let anchor = payload.anchor.unwrap();
    assert_eq!(anchor.document_id, "today.md");
    assert_eq!(anchor.text.chars().count(), 50);
    assert!(!anchor.truncated);
}

#[tokio::test]
async fn test_slow_embedder_degrades_to_time_and_anchor() {
    let h = indexed_pair().await;
    let slow = Arc::new(TestEmbedder::new().with_delay(Duration::from_millis(1000)));
    let assembler = assembler(&h, slow, settings());

    let payload = tokio::time::timeout(
        Duration::from_secs(2),
        assembler.assemble_at(&ContextRequest::new("quokka marmalade"), morning()),
    )
    .await
    .expect("assembly waited for the embedder");

    assert!(payload.passages.is_empty());
    assert!(payload.time_fact.is_some());
    assert_eq!(payload.anchor.unwrap().document_id, "today.md");
    assert_eq!(payload.degraded.len(), 1);
    assert_eq!(payload.degraded[0].section, Section::Retrieval);
    assert!(payload.degraded[0].reason.contains("timed out"));
}

#[tokio::test]
async fn test_unavailable_index_degrades_retrieval_only() {
    let h = indexed_pair().await;
    h.index.unavailable.store(true, Ordering::SeqCst);
    let assembler = assembler(&h, h.embedder.clone(), settings());

    let payload = assembler
        .assemble_at(&ContextRequest::new("quokka"), morning())
        .await;

    assert!(payload.passages.is_empty());
    assert!(payload.anchor.is_some());
    assert!(payload.is_degraded());
    assert_eq!(payload.degraded[0].section, Section::Retrieval);
}

#[tokio::test]
async fn test_budget_admits_whole_passages_only() {
    let h = indexed_pair().await;
    let budget = 1000;
    let assembler = assembler(
        &h,
        h.embedder.clone(),
        AssemblerSettings {
            budget,
            ..settings()
        },
    );

    let payload = assembler
        .assemble_at(&ContextRequest::new("quokka marmalade"), morning())
        .await;

    assert!(payload.size() <= budget);
    assert!(payload.time_fact.is_some());
    assert!(payload.anchor.is_some());
    assert_eq!(payload.passages[0].chunk_index, 1);
    assert!(payload.dropped_passages >= 1);

    // Every admitted passage is a complete chunk.
    for passage in &payload.passages {
        assert_eq!(passage.text.chars().count(), passage.char_end - passage.char_start);
    }

    let tiny = assembler
        .assemble_at(
            &ContextRequest {
                budget: Some(10),
                ..ContextRequest::new("quokka")
            },
            morning(),
        )
        .await;
    assert!(tiny.size() <= 10);
    assert!(tiny.time_fact.is_none());
    assert!(tiny.passages.is_empty());
}

#[tokio::test]
async fn test_missing_anchor_is_not_degraded() {
    let h = indexed_pair().await;
    let assembler = assembler(
        &h,
        h.embedder.clone(),
        AssemblerSettings {
            anchor: Some(AnchorResolver::new("Daily/%Y-%m-%d.md").unwrap()),
            ..settings()
        },
    );

    let payload = assembler
        .assemble_at(&ContextRequest::new("quokka"), morning())
        .await;
    assert!(payload.anchor.is_none());
    assert!(payload.degraded.is_empty());
    assert!(!payload.passages.is_empty());
}

#[tokio::test]
async fn test_anchor_override_and_preview_truncation() {
    let h = indexed_pair().await;
    let assembler = assembler(
        &h,
        h.embedder.clone(),
        AssemblerSettings {
            preview_chars: 100,
            ..settings()
        },
    );

    let request = ContextRequest {
        anchor: Some("notes.md".into()),
        ..ContextRequest::new("")
    };
    let payload = assembler.assemble_at(&request, morning()).await;

    let anchor = payload.anchor.unwrap();
    assert_eq!(anchor.document_id, "notes.md");
    assert_eq!(anchor.text.chars().count(), 100);
    assert!(anchor.truncated);
    assert!(payload.passages.is_empty(), "an empty query retrieves nothing");
    assert!(payload.degraded.is_empty());
}

#[tokio::test]
async fn test_stale_document_is_not_retrieved() {
    let h = Harness::fast();
    h.corpus.put("a.md", "quokka marmalade on toast");
    h.corpus.put("b.md", "quokka sightings near the lake");
    h.coordinator.submit_now(CorpusEvent::Added("a.md".into()));
    h.coordinator.submit_now(CorpusEvent::Added("b.md".into()));
    h.settle().await;

    // The edit cannot be indexed, so a.md's vectors describe old text.
    h.index.unavailable.store(true, Ordering::SeqCst);
    h.corpus.put("a.md", "we ran out of jam");
    h.coordinator.submit_now(CorpusEvent::Changed("a.md".into()));
    h.settle().await;
    h.index.unavailable.store(false, Ordering::SeqCst);
    assert_eq!(h.coordinator.document_state("a.md"), DocumentState::Stale);

    let plain = assembler(&h, h.embedder.clone(), settings());
    let payload = plain
        .assemble_at(&ContextRequest::new("quokka marmalade"), morning())
        .await;
    assert!(payload.passages.iter().any(|p| p.document_id == "a.md"));

    let guarded = assembler(&h, h.embedder.clone(), settings())
        .with_coordinator(h.coordinator.clone());
    let payload = guarded
        .assemble_at(&ContextRequest::new("quokka marmalade"), morning())
        .await;
    let ids: Vec<&str> = payload.passages.iter().map(|p| p.document_id.as_str()).collect();
    assert_eq!(ids, vec!["b.md"]);
}

#[tokio::test]
async fn test_contained_passages_are_suppressed() {
    let h = Harness::fast();
    let text = filler(1200, "quokka");
    h.corpus.put("q.md", &text);
    h.coordinator.submit_now(CorpusEvent::Added("q.md".into()));
    h.settle().await;

    let payload = assembler(&h, h.embedder.clone(), settings())
        .assemble_at(&ContextRequest::new("quokka"), morning())
        .await;

    for (i, a) in payload.passages.iter().enumerate() {
        for b in payload.passages.iter().skip(i + 1) {
            let contained = a.document_id == b.document_id
                && a.char_start <= b.char_start
                && b.char_end <= a.char_end;
            assert!(!contained, "{:?} inside {:?}", b, a);
        }
    }
}
