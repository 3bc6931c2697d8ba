//! Semantic and hybrid re-ranking of vector index hits.
//!
//! The vector index ranks purely by cosine similarity. For direct passage
//! search the engine can re-rank those hits with cheap keyword evidence,
//! which rescues notes whose embeddings are weak but whose file names or
//! text mention the query terms.
//!
//! # Hybrid Scoring
//!
//! 1. Fetch `candidate_multiplier × limit` semantic candidates.
//! 2. Query terms are the whitespace-separated, lower-cased words longer
//!    than two characters.
//! 3. `keyword = filename_boost` if any term occurs in the file stem, plus
//!    `term_boost` for every term occurring in the chunk text.
//! 4. `score = semantic + keyword`.
//! 5. Sort by score (desc), modified_at (desc), document id (asc).
//! 6. If `priority_paths` is non-empty, reserve up to half of `limit` for
//!    hits whose document id contains one of those path segments.
//! 7. Truncate to `limit`.

use std::cmp::Ordering;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{file_stem, ScoredEntry};

/// How hits are scored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Semantic,
    #[default]
    Hybrid,
}

impl FromStr for SearchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "semantic" => Ok(SearchMode::Semantic),
            "hybrid" => Ok(SearchMode::Hybrid),
            other => Err(format!(
                "Unknown search mode: {}. Use semantic or hybrid.",
                other
            )),
        }
    }
}

/// Re-ranking parameters, decoupled from application config.
#[derive(Debug, Clone)]
pub struct SearchParams {
    pub mode: SearchMode,
    /// Maximum results to return.
    pub limit: usize,
    /// Semantic candidates fetched per requested result in hybrid mode.
    pub candidate_multiplier: usize,
    pub filename_boost: f32,
    pub term_boost: f32,
    /// Path segments (e.g. `"/Inventory/"`) whose hits get up to half the slots.
    pub priority_paths: Vec<String>,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            mode: SearchMode::Hybrid,
            limit: 5,
            candidate_multiplier: 10,
            filename_boost: 0.5,
            term_boost: 0.1,
            priority_paths: Vec::new(),
        }
    }
}

impl SearchParams {
    /// How many candidates to request from the vector index.
    pub fn candidate_k(&self) -> usize {
        match self.mode {
            SearchMode::Semantic => self.limit,
            SearchMode::Hybrid => self.limit * self.candidate_multiplier.max(1),
        }
    }
}

/// A passage search result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub document_id: String,
    pub title: String,
    pub chunk_index: usize,
    pub text: String,
    pub score: f32,
    pub semantic_score: f32,
    pub keyword_score: f32,
    pub modified_at: DateTime<Utc>,
}

/// Re-rank semantic hits for `query` according to `params`.
pub fn rerank(query: &str, hits: Vec<ScoredEntry>, params: &SearchParams) -> Vec<SearchHit> {
    let terms = query_terms(query);

    let mut scored: Vec<SearchHit> = hits
        .into_iter()
        .map(|hit| {
            let keyword_score = match params.mode {
                SearchMode::Semantic => 0.0,
                SearchMode::Hybrid => keyword_score(&terms, &hit, params),
            };
            SearchHit {
                document_id: hit.chunk.document_id,
                title: hit.title,
                chunk_index: hit.chunk.index,
                text: hit.chunk.text,
                score: hit.score + keyword_score,
                semantic_score: hit.score,
                keyword_score,
                modified_at: hit.modified_at,
            }
        })
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.modified_at.cmp(&a.modified_at))
            .then_with(|| a.document_id.cmp(&b.document_id))
            .then_with(|| a.chunk_index.cmp(&b.chunk_index))
    });

    if params.priority_paths.is_empty() {
        scored.truncate(params.limit);
        return scored;
    }

    let (priority, other): (Vec<SearchHit>, Vec<SearchHit>) = scored
        .into_iter()
        .partition(|h| is_priority(&h.document_id, &params.priority_paths));
    let reserved = priority.len().min(params.limit / 2);
    let mut out: Vec<SearchHit> = priority.into_iter().take(reserved).collect();
    out.extend(other.into_iter().take(params.limit - reserved));
    out
}

/// Lower-cased query words longer than two characters.
pub fn query_terms(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = query
        .split_whitespace()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| t.chars().count() > 2)
        .collect();
    terms.sort();
    terms.dedup();
    terms
}

fn keyword_score(terms: &[String], hit: &ScoredEntry, params: &SearchParams) -> f32 {
    let stem = file_stem(&hit.chunk.document_id).to_lowercase();
    let content = hit.chunk.text.to_lowercase();

    let mut score = 0.0;
    if terms.iter().any(|t| stem.contains(t.as_str())) {
        score += params.filename_boost;
    }
    for term in terms {
        if content.contains(term.as_str()) {
            score += params.term_boost;
        }
    }
    score
}

fn is_priority(document_id: &str, segments: &[String]) -> bool {
    let rooted = format!("/{}", document_id);
    segments.iter().any(|s| rooted.contains(s.as_str()))
}
