//! Conversation types: roles, turns, and the shared history
//!
//! `ConversationHistory` is the single source of truth for finalized turns.
//! It is owned by the session wiring and shared by exactly the two turn
//! aggregators; mutation is append-only (finalized turns are never edited
//! or removed) and at most one pending, not-yet-finalized turn per role
//! exists at a time.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Role of a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    System,
    User,
    Assistant,
}

impl TurnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnRole::System => "system",
            TurnRole::User => "user",
            TurnRole::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for TurnRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single finalized turn in the conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    /// Role of the speaker
    pub role: TurnRole,
    /// Content of the turn
    pub content: String,
    /// When the turn was finalized
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    /// Create a new turn
    pub fn new(role: TurnRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    /// Create a system turn
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(TurnRole::System, content)
    }

    /// Create a user turn
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(TurnRole::User, content)
    }

    /// Create an assistant turn
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(TurnRole::Assistant, content)
    }
}

/// Shared handle to a conversation history
///
/// The two aggregators hold clones of the same handle, never independent
/// copies, so the history cannot diverge.
pub type SharedHistory = Arc<Mutex<ConversationHistory>>;

/// Append-only conversation history with per-role pending turns
#[derive(Debug, Default)]
pub struct ConversationHistory {
    turns: Vec<Turn>,
    pending_user: Option<String>,
    pending_assistant: Option<String>,
}

impl ConversationHistory {
    /// Create an empty history
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a history seeded with a system turn
    pub fn with_system(prompt: impl Into<String>) -> Self {
        Self {
            turns: vec![Turn::system(prompt)],
            ..Self::default()
        }
    }

    /// Wrap in a shared handle
    pub fn into_shared(self) -> SharedHistory {
        Arc::new(Mutex::new(self))
    }

    /// Finalized turns, in order
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Owned snapshot of the finalized turns
    pub fn snapshot(&self) -> Vec<Turn> {
        self.turns.clone()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Replace (not append) the pending user text
    ///
    /// Partial transcripts supersede each other; nothing reaches the
    /// finalized history until the final transcript arrives.
    pub fn set_pending_user(&mut self, text: impl Into<String>) {
        self.pending_user = Some(text.into());
    }

    pub fn pending_user(&self) -> Option<&str> {
        self.pending_user.as_deref()
    }

    /// Finalize the user turn with the final transcript text
    ///
    /// The final text is authoritative; earlier partials are discarded.
    pub fn finalize_user(&mut self, text: impl Into<String>) -> &Turn {
        self.pending_user = None;
        self.turns.push(Turn::user(text));
        self.turns.last().expect("just pushed")
    }

    /// Concatenate a streamed token onto the pending assistant buffer
    pub fn push_assistant_delta(&mut self, delta: &str) {
        self.pending_assistant
            .get_or_insert_with(String::new)
            .push_str(delta);
    }

    pub fn pending_assistant(&self) -> Option<&str> {
        self.pending_assistant.as_deref()
    }

    /// Finalize the assistant turn with the complete response text
    ///
    /// Returns `None` if no assistant turn is pending: a completion that
    /// arrives after its turn was abandoned must not resurface it.
    pub fn finalize_assistant(&mut self, text: impl Into<String>) -> Option<&Turn> {
        if self.pending_assistant.take().is_none() {
            tracing::debug!("ignoring assistant completion with no pending turn");
            return None;
        }
        self.turns.push(Turn::assistant(text));
        self.turns.last()
    }

    /// Discard the pending assistant buffer without appending it
    ///
    /// The aggregator's contribution to the interruption protocol: an
    /// interrupted turn is abandoned, not completed.
    pub fn abandon_assistant(&mut self) -> bool {
        self.pending_assistant.take().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turn_builders() {
        let turn = Turn::user("hello there");
        assert_eq!(turn.role, TurnRole::User);
        assert_eq!(turn.content, "hello there");
        assert_eq!(TurnRole::Assistant.to_string(), "assistant");
    }

    #[test]
    fn test_turn_serializes_with_role_tag() {
        let json = serde_json::to_string(&Turn::system("be brief")).unwrap();
        assert!(json.contains("\"role\":\"system\""));
    }

    #[test]
    fn test_partials_replace_not_append() {
        let mut history = ConversationHistory::new();
        history.set_pending_user("hel");
        history.set_pending_user("hello");
        assert_eq!(history.pending_user(), Some("hello"));
        assert!(history.is_empty());

        history.finalize_user("hello there");
        assert_eq!(history.len(), 1);
        assert_eq!(history.turns()[0].content, "hello there");
        assert!(history.pending_user().is_none());
    }

    #[test]
    fn test_final_without_partials_is_accepted() {
        let mut history = ConversationHistory::new();
        history.finalize_user("short utterance");
        assert_eq!(history.len(), 1);
        assert_eq!(history.turns()[0].role, TurnRole::User);
    }

    #[test]
    fn test_assistant_delta_accumulation() {
        let mut history = ConversationHistory::new();
        history.push_assistant_delta("Hi");
        history.push_assistant_delta(" there");
        history.push_assistant_delta("!");
        assert_eq!(history.pending_assistant(), Some("Hi there!"));

        let turn = history.finalize_assistant("Hi there!").unwrap();
        assert_eq!(turn.content, "Hi there!");
        assert!(history.pending_assistant().is_none());
    }

    #[test]
    fn test_abandon_discards_pending_assistant() {
        let mut history = ConversationHistory::new();
        history.push_assistant_delta("Hi there");
        assert!(history.abandon_assistant());
        assert!(history.is_empty());

        // A stale completion after the abandon must not append anything
        assert!(history.finalize_assistant("Hi there!").is_none());
        assert!(history.is_empty());

        // A fresh turn afterwards behaves normally
        history.push_assistant_delta("New answer");
        assert!(history.finalize_assistant("New answer").is_some());
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_with_system_seeds_first_turn() {
        let history = ConversationHistory::with_system("You are terse.");
        assert_eq!(history.len(), 1);
        assert_eq!(history.turns()[0].role, TurnRole::System);
    }

    #[test]
    fn test_shared_handle_sees_same_history() {
        let shared = ConversationHistory::new().into_shared();
        let other = Arc::clone(&shared);
        shared.lock().finalize_user("hi");
        assert_eq!(other.lock().len(), 1);
    }
}
