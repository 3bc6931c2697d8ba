//! Prompt rendering for the generation step.
//!
//! Layout:
//!
//! ```text
//! Current time: …
//!
//! === TODAY'S NOTE: Daily/2026-10-16.md ===
//! …
//!
//! === RELEVANT KNOWLEDGE FROM YOUR VAULT ===
//! 📄 **notes.md** (relevance: 0.83):
//! …
//!
//! === RECENT CONVERSATION ===
//! Human: …
//! Assistant: …
//!
//! RESPONSE GUIDELINES:
//! - …
//!
//! Human: <message>
//! Assistant:
//! ```
//!
//! Passages are rendered whole; the assembler has already fitted them to
//! the budget.

use vault_context_core::context::ContextPayload;
use vault_context_core::conversation::Turn;

const GUIDELINES: &[&str] = &[
    "Use the knowledge from the vault documents above to inform your response",
    "Reference specific documents by file name when relevant",
    "If the question relates to information in the vault, prefer it over general knowledge",
    "Use today's note and the current time to understand what is happening now",
    "Maintain conversation context while incorporating vault knowledge",
];

pub fn render(payload: &ContextPayload, history: &[Turn], message: &str) -> String {
    let mut parts: Vec<String> = Vec::new();

    if let Some(fact) = &payload.time_fact {
        parts.push(fact.clone());
        parts.push(String::new());
    }

    if let Some(anchor) = &payload.anchor {
        parts.push(format!("=== TODAY'S NOTE: {} ===", anchor.document_id));
        parts.push(if anchor.truncated {
            format!("{}...", anchor.text)
        } else {
            anchor.text.clone()
        });
        parts.push(String::new());
    }

    if !payload.passages.is_empty() {
        parts.push("=== RELEVANT KNOWLEDGE FROM YOUR VAULT ===".to_string());
        for passage in &payload.passages {
            parts.push(format!(
                "📄 **{}** (relevance: {:.2}):",
                passage.document_id, passage.score
            ));
            parts.push(passage.text.clone());
            parts.push(String::new());
        }
        parts.push("=".repeat(50));
        parts.push(String::new());
    }

    if !history.is_empty() {
        parts.push("=== RECENT CONVERSATION ===".to_string());
        for turn in history {
            parts.push(format!("Human: {}", turn.human));
            parts.push(format!("Assistant: {}", turn.assistant));
            parts.push(String::new());
        }
        parts.push("=".repeat(30));
        parts.push(String::new());
    }

    parts.push("RESPONSE GUIDELINES:".to_string());
    parts.extend(GUIDELINES.iter().map(|g| format!("- {}", g)));
    parts.push(String::new());

    parts.push(format!("Human: {}", message));
    parts.push("Assistant: ".to_string());
    parts.join("\n")
}

/// Reply used when the generator cannot answer: whatever context was found.
pub fn fallback_reply(payload: &ContextPayload) -> String {
    if payload.passages.is_empty() {
        return "The language model is unavailable and no matching notes were found.".to_string();
    }
    let mut out = String::from("The language model is unavailable. Most relevant notes:\n");
    for passage in &payload.passages {
        out.push_str(&format!(
            "\n- {} (relevance: {:.2})",
            passage.document_id, passage.score
        ));
    }
    out
}
