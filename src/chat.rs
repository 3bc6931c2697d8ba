//! Query entry point.
//!
//! [`ChatEngine`] answers a user message with vault context: it reads the
//! session's recent turns, assembles a context payload, renders the prompt
//! and calls the generator. The user always gets a reply; when generation
//! fails the reply lists the notes that were found instead, and that
//! exchange is not written to the conversation history.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use vault_context_core::context::{DegradedSection, Section};
use vault_context_core::conversation::{ConversationStore, Turn};
use vault_context_core::embedding::Embedder;
use vault_context_core::error::{EmbedError, IndexError};
use vault_context_core::index::{QueryFilter, VectorIndex};
use vault_context_core::models::IndexedDocument;
use vault_context_core::search::{rerank, SearchHit, SearchMode};

use crate::assembler::{ContextAssembler, ContextRequest};
use crate::config::{Config, RetrievalConfig};
use crate::coordinator::Coordinator;
use crate::generation::{generate_with_timeout, Generator};
use crate::prompt;
use crate::timeout;

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

/// A document that contributed to a reply.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceRef {
    pub document_id: String,
    pub title: String,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub response: String,
    pub session_id: String,
    pub model: String,
    pub sources: Vec<SourceRef>,
    pub degraded: Vec<DegradedSection>,
}

/// Index readiness.
#[derive(Debug, Clone, Serialize)]
pub struct Health {
    /// At least one document is indexed and the index answered.
    pub ready: bool,
    pub documents: usize,
    pub entries: usize,
    pub last_reconciled_at: Option<DateTime<Utc>>,
    pub pending: usize,
    pub stale: usize,
    pub embedding_model: String,
    pub generation_model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error(transparent)]
    Embed(#[from] EmbedError),

    #[error(transparent)]
    Index(#[from] IndexError),
}

pub struct ChatEngine {
    assembler: Arc<ContextAssembler>,
    conversations: Arc<dyn ConversationStore>,
    generator: Arc<dyn Generator>,
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    coordinator: Option<Coordinator>,
    retrieval: RetrievalConfig,
    generation_timeout: Duration,
}

impl ChatEngine {
    pub fn new(
        assembler: Arc<ContextAssembler>,
        conversations: Arc<dyn ConversationStore>,
        generator: Arc<dyn Generator>,
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        config: &Config,
    ) -> Self {
        Self {
            assembler,
            conversations,
            generator,
            index,
            embedder,
            coordinator: None,
            retrieval: config.retrieval.clone(),
            generation_timeout: config.generation.timeout(),
        }
    }

    pub fn with_coordinator(mut self, coordinator: Coordinator) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    pub fn conversations(&self) -> &Arc<dyn ConversationStore> {
        &self.conversations
    }

    pub async fn ask(&self, request: ChatRequest) -> ChatReply {
        let session_id = request
            .session_id
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let history = self
            .conversations
            .recent(&session_id, self.retrieval.history_turns);
        let payload = self
            .assembler
            .assemble(&ContextRequest::new(request.message.clone()))
            .await;
        let prompt = prompt::render(&payload, &history, &request.message);

        let sources = sources_of(&payload.passages);
        let mut degraded = payload.degraded.clone();

        let response = match generate_with_timeout(
            self.generator.as_ref(),
            &prompt,
            self.generation_timeout,
        )
        .await
        {
            Ok(text) => {
                self.conversations
                    .append(&session_id, &request.message, &text, Utc::now());
                text
            }
            Err(e) => {
                tracing::warn!(error = %e, session = %session_id, "generation failed, returning context");
                degraded.push(DegradedSection::new(Section::Generation, e.to_string()));
                prompt::fallback_reply(&payload)
            }
        };

        ChatReply {
            response,
            session_id,
            model: self.generator.model_name().to_string(),
            sources,
            degraded,
        }
    }

    /// Direct passage search.
    pub async fn search(
        &self,
        query: &str,
        limit: Option<usize>,
        mode: Option<SearchMode>,
    ) -> Result<Vec<SearchHit>, RetrievalError> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let mode = mode.unwrap_or_else(|| {
            self.retrieval
                .search_mode
                .parse()
                .unwrap_or_default()
        });
        let params = self
            .retrieval
            .search_params(mode, limit.unwrap_or(self.retrieval.search_limit).max(1));

        let limit_time = self.retrieval.query_timeout();
        let vector = timeout::embed(limit_time, self.embedder.embed(query)).await?;
        let filter = self.filter();
        let hits = timeout::index(
            limit_time,
            self.index.query(&vector, params.candidate_k(), &filter),
        )
        .await?;
        Ok(rerank(query, hits, &params))
    }

    pub async fn documents(&self) -> Result<Vec<IndexedDocument>, IndexError> {
        timeout::index(self.retrieval.query_timeout(), self.index.list_documents()).await
    }

    pub fn session(&self, session_id: &str, n: usize) -> Vec<Turn> {
        self.conversations.recent(session_id, n)
    }

    pub fn clear_session(&self, session_id: &str) {
        self.conversations.clear(session_id);
    }

    pub async fn health(&self) -> Health {
        let limit = self.retrieval.query_timeout();
        let counts = async {
            let documents = timeout::index(limit, self.index.list_document_ids()).await?;
            let entries = timeout::index(limit, self.index.count()).await?;
            Ok::<_, IndexError>((documents.len(), entries))
        }
        .await;

        let (pending, stale, last_reconciled_at) = match &self.coordinator {
            Some(c) => (c.pending(), c.stale_documents().len(), c.last_reconciled_at()),
            None => (0, 0, None),
        };

        let (documents, entries, error) = match counts {
            Ok((documents, entries)) => (documents, entries, None),
            Err(e) => (0, 0, Some(e.to_string())),
        };

        Health {
            ready: error.is_none() && documents > 0,
            documents,
            entries,
            last_reconciled_at,
            pending,
            stale,
            embedding_model: self.embedder.model_name().to_string(),
            generation_model: self.generator.model_name().to_string(),
            error,
        }
    }

    fn filter(&self) -> QueryFilter {
        QueryFilter {
            exclude_documents: self
                .coordinator
                .as_ref()
                .map(Coordinator::stale_documents)
                .unwrap_or_default(),
            ..QueryFilter::default()
        }
    }
}

/// One entry per document, in first-seen (rank) order.
fn sources_of(passages: &[vault_context_core::context::Passage]) -> Vec<SourceRef> {
    let mut sources: Vec<SourceRef> = Vec::new();
    for passage in passages {
        if sources.iter().any(|s| s.document_id == passage.document_id) {
            continue;
        }
        sources.push(SourceRef {
            document_id: passage.document_id.clone(),
            title: passage.title.clone(),
            score: passage.score,
        });
    }
    sources
}

#[cfg(test)]
mod tests {
    use super::*;
    use vault_context_core::context::Passage;

    fn passage(doc: &str, index: usize, score: f32) -> Passage {
        Passage {
            document_id: doc.into(),
            title: doc.into(),
            chunk_index: index,
            text: "t".into(),
            char_start: 0,
            char_end: 1,
            score,
            modified_at: Utc::now(),
        }
    }

    #[test]
    fn test_sources_deduplicated_in_rank_order() {
        let sources = sources_of(&[
            passage("b.md", 0, 0.9),
            passage("a.md", 1, 0.8),
            passage("b.md", 2, 0.7),
        ]);
        let ids: Vec<&str> = sources.iter().map(|s| s.document_id.as_str()).collect();
        assert_eq!(ids, vec!["b.md", "a.md"]);
        assert_eq!(sources[0].score, 0.9);
    }
}
