//! Context assembly for one query.
//!
//! [`ContextAssembler::assemble`] builds a [`ContextPayload`] from three
//! independent sources: the clock, the anchor note and the vector index.
//! A failing source only removes its own section and is reported in
//! [`ContextPayload::degraded`]; assembly itself never fails.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, FixedOffset, Local, TimeZone};

use vault_context_core::context::{
    fit_to_budget, suppress_contained, time_fact, truncate_preview, AnchorPreview,
    ContextPayload, DegradedSection, Passage, Section,
};
use vault_context_core::embedding::Embedder;
use vault_context_core::index::{QueryFilter, VectorIndex};

use crate::config::Config;
use crate::coordinator::Coordinator;
use crate::corpus::Corpus;
use crate::timeout;

/// Resolves the anchor document id for a given day from a `chrono`
/// format pattern such as `Daily/%Y-%m-%d.md`.
#[derive(Debug, Clone)]
pub struct AnchorResolver {
    pattern: String,
}

impl AnchorResolver {
    pub fn new(pattern: &str) -> Result<Self> {
        if StrftimeItems::new(pattern).any(|item| matches!(item, Item::Error)) {
            bail!("Invalid anchor pattern: {}", pattern);
        }
        Ok(Self {
            pattern: pattern.to_string(),
        })
    }

    pub fn resolve<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> String
    where
        Tz::Offset: std::fmt::Display,
    {
        now.format(&self.pattern).to_string()
    }
}

#[derive(Debug, Clone)]
pub struct AssemblerSettings {
    pub top_k: usize,
    pub budget: usize,
    pub preview_chars: usize,
    /// `None` disables the anchor section.
    pub anchor: Option<AnchorResolver>,
    pub query_timeout: Duration,
}

impl Default for AssemblerSettings {
    fn default() -> Self {
        Self {
            top_k: 5,
            budget: 6000,
            preview_chars: 500,
            anchor: AnchorResolver::new("Daily/%Y-%m-%d.md").ok(),
            query_timeout: Duration::from_secs(5),
        }
    }
}

impl AssemblerSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        let anchor = if config.anchor.enabled {
            Some(AnchorResolver::new(&config.anchor.pattern)?)
        } else {
            None
        };
        Ok(Self {
            top_k: config.retrieval.top_k,
            budget: config.retrieval.context_budget_chars,
            preview_chars: config.anchor.preview_chars,
            anchor,
            query_timeout: config.retrieval.query_timeout(),
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct ContextRequest {
    pub query: String,
    /// Overrides the configured budget (characters).
    pub budget: Option<usize>,
    /// Overrides the resolved anchor document id.
    pub anchor: Option<String>,
}

impl ContextRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }
}

pub struct ContextAssembler {
    corpus: Arc<dyn Corpus>,
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    coordinator: Option<Coordinator>,
    settings: AssemblerSettings,
}

impl ContextAssembler {
    pub fn new(
        corpus: Arc<dyn Corpus>,
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        settings: AssemblerSettings,
    ) -> Self {
        Self {
            corpus,
            index,
            embedder,
            coordinator: None,
            settings,
        }
    }

    /// Exclude documents the coordinator reports as stale.
    pub fn with_coordinator(mut self, coordinator: Coordinator) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    pub fn settings(&self) -> &AssemblerSettings {
        &self.settings
    }

    pub async fn assemble(&self, request: &ContextRequest) -> ContextPayload {
        let now = Local::now();
        let now = now.with_timezone(now.offset());
        self.assemble_at(request, now).await
    }

    /// Assemble as if the clock read `now`.
    pub async fn assemble_at(
        &self,
        request: &ContextRequest,
        now: DateTime<FixedOffset>,
    ) -> ContextPayload {
        let mut degraded = Vec::new();

        let anchor = match self.anchor(request, &now).await {
            Ok(anchor) => anchor,
            Err(reason) => {
                tracing::warn!(reason = %reason, "anchor omitted from context");
                degraded.push(DegradedSection::new(Section::Anchor, reason));
                None
            }
        };

        let passages = match self.retrieve(&request.query).await {
            Ok(passages) => passages,
            Err(reason) => {
                tracing::warn!(reason = %reason, "retrieval omitted from context");
                degraded.push(DegradedSection::new(Section::Retrieval, reason));
                Vec::new()
            }
        };

        let budget = request.budget.unwrap_or(self.settings.budget);
        let payload = fit_to_budget(time_fact(&now), anchor, passages, budget, degraded);
        tracing::debug!(
            passages = payload.passages.len(),
            dropped = payload.dropped_passages,
            size = payload.size(),
            budget,
            "context assembled"
        );
        payload
    }

    async fn anchor(
        &self,
        request: &ContextRequest,
        now: &DateTime<FixedOffset>,
    ) -> Result<Option<AnchorPreview>, String> {
        let id = match (&request.anchor, &self.settings.anchor) {
            (Some(id), _) => id.clone(),
            (None, Some(resolver)) => resolver.resolve(now),
            (None, None) => return Ok(None),
        };

        let doc = tokio::time::timeout(self.settings.query_timeout, self.corpus.load(&id))
            .await
            .map_err(|_| format!("loading {} timed out", id))?
            .map_err(|e| format!("{:#}", e))?;

        Ok(doc.map(|doc| {
            let (text, truncated) = truncate_preview(&doc.text, self.settings.preview_chars);
            AnchorPreview {
                document_id: doc.id,
                title: doc.title,
                text,
                truncated,
            }
        }))
    }

    async fn retrieve(&self, query: &str) -> Result<Vec<Passage>, String> {
        if query.trim().is_empty() || self.settings.top_k == 0 {
            return Ok(Vec::new());
        }

        let limit = self.settings.query_timeout;
        let vector = timeout::embed(limit, self.embedder.embed(query))
            .await
            .map_err(|e| e.to_string())?;

        let filter = QueryFilter {
            exclude_documents: self
                .coordinator
                .as_ref()
                .map(Coordinator::stale_documents)
                .unwrap_or_default(),
            ..QueryFilter::default()
        };
        let hits = timeout::index(limit, self.index.query(&vector, self.settings.top_k, &filter))
            .await
            .map_err(|e| e.to_string())?;

        Ok(suppress_contained(
            hits.into_iter().map(Passage::from).collect(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anchor_resolver_formats_date() {
        let resolver = AnchorResolver::new("Daily/%Y-%m-%d.md").unwrap();
        let tz = FixedOffset::east_opt(3600).unwrap();
        let now = tz.with_ymd_and_hms(2026, 10, 16, 9, 0, 0).unwrap();
        assert_eq!(resolver.resolve(&now), "Daily/2026-10-16.md");
    }

    #[test]
    fn test_anchor_resolver_rejects_bad_pattern() {
        assert!(AnchorResolver::new("Daily/%").is_err());
        assert!(AnchorResolver::new("today.md").is_ok());
    }
}
