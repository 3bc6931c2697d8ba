//! Context payload and the rules for fitting it into a budget.
//!
//! A [`ContextPayload`] is built per query and never stored. Its sections
//! are ordered: current-time fact, anchor preview, retrieved passages
//! (highest similarity first).
//!
//! The budget is measured in characters over the section texts. Every
//! section is admitted whole or not at all; passages are admitted in rank
//! order and the first one that does not fit ends admission, so the
//! lowest-scoring passages are always the ones dropped.

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;

use crate::models::ScoredEntry;

/// Which part of the payload a degradation applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Section {
    Anchor,
    Retrieval,
    Generation,
}

/// A section that was omitted because a dependency failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DegradedSection {
    pub section: Section,
    pub reason: String,
}

impl DegradedSection {
    pub fn new(section: Section, reason: impl Into<String>) -> Self {
        Self {
            section,
            reason: reason.into(),
        }
    }
}

/// Preview of the anchor ("today") document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnchorPreview {
    pub document_id: String,
    pub title: String,
    pub text: String,
    pub truncated: bool,
}

/// A retrieved chunk as it appears in the payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Passage {
    pub document_id: String,
    pub title: String,
    pub chunk_index: usize,
    pub text: String,
    pub char_start: usize,
    pub char_end: usize,
    pub score: f32,
    pub modified_at: DateTime<Utc>,
}

impl From<ScoredEntry> for Passage {
    fn from(hit: ScoredEntry) -> Self {
        Self {
            document_id: hit.chunk.document_id,
            title: hit.title,
            chunk_index: hit.chunk.index,
            text: hit.chunk.text,
            char_start: hit.chunk.char_start,
            char_end: hit.chunk.char_end,
            score: hit.score,
            modified_at: hit.modified_at,
        }
    }
}

impl Passage {
    fn is_contained_in(&self, other: &Passage) -> bool {
        self.document_id == other.document_id
            && other.char_start <= self.char_start
            && self.char_end <= other.char_end
    }

    fn size(&self) -> usize {
        self.text.chars().count()
    }
}

/// Everything handed to the generation step for one query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextPayload {
    /// Absent only when the budget is too small to hold it.
    pub time_fact: Option<String>,
    pub anchor: Option<AnchorPreview>,
    pub passages: Vec<Passage>,
    /// Passages that were retrieved but did not fit the budget.
    pub dropped_passages: usize,
    pub degraded: Vec<DegradedSection>,
}

impl ContextPayload {
    /// Characters counted against the budget.
    pub fn size(&self) -> usize {
        self.time_fact.as_ref().map_or(0, |t| t.chars().count())
            + self.anchor.as_ref().map_or(0, |a| a.text.chars().count())
            + self.passages.iter().map(Passage::size).sum::<usize>()
    }

    pub fn is_degraded(&self) -> bool {
        !self.degraded.is_empty()
    }
}

/// Drop passages whose span lies entirely inside a higher-ranked passage
/// of the same document. Input must already be in rank order.
pub fn suppress_contained(passages: Vec<Passage>) -> Vec<Passage> {
    let mut kept: Vec<Passage> = Vec::with_capacity(passages.len());
    for passage in passages {
        if kept.iter().any(|k| passage.is_contained_in(k)) {
            continue;
        }
        kept.push(passage);
    }
    kept
}

/// Admit sections whole, in order, until the budget is exhausted.
///
/// The resulting payload's [`size`](ContextPayload::size) never exceeds
/// `budget`.
pub fn fit_to_budget(
    time_fact: String,
    anchor: Option<AnchorPreview>,
    passages: Vec<Passage>,
    budget: usize,
    degraded: Vec<DegradedSection>,
) -> ContextPayload {
    let mut remaining = budget;

    let time_len = time_fact.chars().count();
    let time_fact = if time_len <= remaining {
        remaining -= time_len;
        Some(time_fact)
    } else {
        None
    };

    let anchor = match anchor {
        Some(a) if a.text.chars().count() <= remaining => {
            remaining -= a.text.chars().count();
            Some(a)
        }
        _ => None,
    };

    let total = passages.len();
    let mut admitted = Vec::new();
    for passage in passages {
        let size = passage.size();
        if size > remaining {
            break;
        }
        remaining -= size;
        admitted.push(passage);
    }

    ContextPayload {
        time_fact,
        anchor,
        dropped_passages: total - admitted.len(),
        passages: admitted,
        degraded,
    }
}

/// First `max_chars` characters of `text`, and whether anything was cut.
pub fn truncate_preview(text: &str, max_chars: usize) -> (String, bool) {
    match text.char_indices().nth(max_chars) {
        Some((byte, _)) => (text[..byte].to_string(), true),
        None => (text.to_string(), false),
    }
}

/// Human-readable statement of the current local time.
pub fn time_fact<Tz: TimeZone>(now: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!(
        "Current time: {}",
        now.format("%A, %-d %B %Y, %H:%M (UTC%:z)")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    fn passage(doc: &str, start: usize, end: usize, score: f32) -> Passage {
        Passage {
            document_id: doc.to_string(),
            title: doc.to_string(),
            chunk_index: 0,
            text: "p".repeat(end - start),
            char_start: start,
            char_end: end,
            score,
            modified_at: Utc::now(),
        }
    }

    #[test]
    fn test_suppress_contained() {
        let passages = vec![
            passage("a.md", 0, 100, 0.9),
            passage("a.md", 10, 50, 0.8),
            passage("b.md", 10, 50, 0.7),
            passage("a.md", 90, 150, 0.6),
        ];
        let kept = suppress_contained(passages);
        let spans: Vec<(&str, usize)> = kept
            .iter()
            .map(|p| (p.document_id.as_str(), p.char_start))
            .collect();
        assert_eq!(spans, vec![("a.md", 0), ("b.md", 10), ("a.md", 90)]);
    }

    #[test]
    fn test_budget_whole_chunks_only() {
        let passages = vec![
            passage("a.md", 0, 40, 0.9),
            passage("b.md", 0, 40, 0.8),
            passage("c.md", 0, 10, 0.7),
        ];
        let payload = fit_to_budget("t".repeat(10), None, passages, 70, Vec::new());
        assert_eq!(payload.passages.len(), 1);
        assert_eq!(payload.dropped_passages, 2);
        assert!(payload.size() <= 70);
    }

    #[test]
    fn test_budget_never_exceeded() {
        for budget in 0..120 {
            let anchor = AnchorPreview {
                document_id: "Daily/x.md".into(),
                title: "x".into(),
                text: "a".repeat(25),
                truncated: false,
            };
            let passages = vec![passage("a.md", 0, 30, 0.9), passage("b.md", 0, 20, 0.5)];
            let payload = fit_to_budget("t".repeat(15), Some(anchor), passages, budget, Vec::new());
            assert!(payload.size() <= budget, "budget {budget} exceeded");
            for p in &payload.passages {
                assert_eq!(p.text.len(), p.char_end - p.char_start);
            }
        }
    }

    #[test]
    fn test_truncate_preview_char_safe() {
        assert_eq!(truncate_preview("héllo", 2), ("hé".to_string(), true));
        assert_eq!(truncate_preview("hi", 5), ("hi".to_string(), false));
        assert_eq!(truncate_preview("abc", 3), ("abc".to_string(), false));
    }

    #[test]
    fn test_time_fact_format() {
        let tz = FixedOffset::east_opt(2 * 3600).unwrap();
        let now = tz.with_ymd_and_hms(2026, 10, 16, 14, 5, 0).unwrap();
        assert_eq!(
            time_fact(&now),
            "Current time: Friday, 16 October 2026, 14:05 (UTC+02:00)"
        );
    }
}
