//! Per-session conversation history.
//!
//! A [`ConversationStore`] keeps the recent (human, assistant) exchanges of
//! each chat session so follow-up questions can be answered in context.
//! The bundled [`InMemoryConversationStore`] lives for the life of the
//! process; a persistent backend can implement the same trait.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One completed exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub session_id: String,
    pub human: String,
    pub assistant: String,
    pub timestamp: DateTime<Utc>,
}

/// Append-only turn history keyed by session id.
///
/// Unknown sessions behave as empty: `recent` returns nothing and `clear`
/// is a no-op.
pub trait ConversationStore: Send + Sync {
    fn append(&self, session_id: &str, human: &str, assistant: &str, timestamp: DateTime<Utc>);

    /// Up to `n` most recent turns, oldest first.
    fn recent(&self, session_id: &str, n: usize) -> Vec<Turn>;

    fn clear(&self, session_id: &str);

    fn session_count(&self) -> usize;
}

/// Process-lifetime conversation store.
#[derive(Default)]
pub struct InMemoryConversationStore {
    sessions: RwLock<HashMap<String, Vec<Turn>>>,
    /// Oldest turns are evicted beyond this many per session.
    max_turns: Option<usize>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_turns(max_turns: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_turns: Some(max_turns.max(1)),
        }
    }
}

// Poisoned locks are recovered: every write leaves the map consistent.
impl ConversationStore for InMemoryConversationStore {
    fn append(&self, session_id: &str, human: &str, assistant: &str, timestamp: DateTime<Utc>) {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        let turns = sessions.entry(session_id.to_string()).or_default();
        turns.push(Turn {
            session_id: session_id.to_string(),
            human: human.to_string(),
            assistant: assistant.to_string(),
            timestamp,
        });
        if let Some(max) = self.max_turns {
            if turns.len() > max {
                let excess = turns.len() - max;
                turns.drain(..excess);
            }
        }
    }

    fn recent(&self, session_id: &str, n: usize) -> Vec<Turn> {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        match sessions.get(session_id) {
            Some(turns) => {
                let start = turns.len().saturating_sub(n);
                turns[start..].to_vec()
            }
            None => Vec::new(),
        }
    }

    fn clear(&self, session_id: &str) {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        sessions.remove(session_id);
    }

    fn session_count(&self) -> usize {
        self.sessions.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recent_returns_last_n_in_order() {
        let store = InMemoryConversationStore::new();
        for i in 0..5 {
            store.append("s1", &format!("q{i}"), &format!("a{i}"), Utc::now());
        }
        let recent = store.recent("s1", 3);
        let humans: Vec<&str> = recent.iter().map(|t| t.human.as_str()).collect();
        assert_eq!(humans, vec!["q2", "q3", "q4"]);
        assert_eq!(store.recent("s1", 10).len(), 5);
    }

    #[test]
    fn test_unknown_session_is_empty() {
        let store = InMemoryConversationStore::new();
        assert!(store.recent("nope", 3).is_empty());
        store.clear("nope");
        assert_eq!(store.session_count(), 0);
    }

    #[test]
    fn test_sessions_isolated_and_clearable() {
        let store = InMemoryConversationStore::new();
        store.append("a", "hi", "hello", Utc::now());
        store.append("b", "yo", "hey", Utc::now());
        store.clear("a");
        assert!(store.recent("a", 3).is_empty());
        assert_eq!(store.recent("b", 3)[0].assistant, "hey");
        assert_eq!(store.session_count(), 1);
    }

    #[test]
    fn test_max_turns_evicts_oldest() {
        let store = InMemoryConversationStore::with_max_turns(2);
        store.append("s", "1", "1", Utc::now());
        store.append("s", "2", "2", Utc::now());
        store.append("s", "3", "3", Utc::now());
        let turns = store.recent("s", 10);
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].human, "2");
    }
}
