//! Session state types
//!
//! `SessionState` is the read model a display layer renders: the transient
//! streaming buffer, the two progress flags, the last error, and the
//! append-only message log.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generation number of one prompt/response exchange
///
/// Every `send` allocates a fresh id. Backend notifications carry the id of
/// the exchange they belong to so the controller can drop stale ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Ai,
}

impl fmt::Display for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sender::User => write!(f, "user"),
            Sender::Ai => write!(f, "ai"),
        }
    }
}

/// A finalized chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub sender: Sender,
    pub content: String,
    /// Exchange that produced this message
    pub session: SessionId,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    /// Create an AI-authored message for the given exchange
    pub fn ai(session: SessionId, content: impl Into<String>) -> Self {
        Self::new(Sender::Ai, session, content)
    }

    /// Create a user-authored message for the given exchange
    pub fn user(session: SessionId, content: impl Into<String>) -> Self {
        Self::new(Sender::User, session, content)
    }

    fn new(sender: Sender, session: SessionId, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            sender,
            content: content.into(),
            session,
            created_at: Utc::now(),
        }
    }
}

/// Lifecycle phase of the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// No exchange in flight
    #[default]
    Idle,
    /// Prompt dispatched, waiting for the backend to acknowledge it
    Sending,
    /// Backend acknowledged, text may still be arriving
    Streaming,
    /// Last dispatch failed; left on the next send
    Error,
}

/// Observable state of the streaming session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub phase: Phase,
    pub is_sending: bool,
    pub is_streaming: bool,
    /// Text received so far for the active exchange
    pub buffer: String,
    pub last_error: Option<String>,
    pub messages: Vec<ChatMessage>,
    /// Exchange currently allowed to mutate the buffer
    pub active: Option<SessionId>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recently committed message, if any
    pub fn last_message(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    /// True if `session` is the exchange currently accepting notifications
    pub fn is_active(&self, session: SessionId) -> bool {
        self.active == Some(session)
    }

    /// Reset transient state for a new exchange
    pub(crate) fn begin(&mut self, session: SessionId) {
        self.buffer.clear();
        self.last_error = None;
        self.is_sending = true;
        self.is_streaming = true;
        self.phase = Phase::Sending;
        self.active = Some(session);
    }

    /// Move the buffer into the message log and leave the exchange
    pub(crate) fn commit(&mut self, session: SessionId) -> &ChatMessage {
        let content = std::mem::take(&mut self.buffer);
        self.is_streaming = false;
        self.phase = Phase::Idle;
        self.active = None;
        self.messages.push(ChatMessage::ai(session, content));
        &self.messages[self.messages.len() - 1]
    }

    /// Leave the exchange without a completion notification
    ///
    /// Text that already arrived is committed so that no streamed output
    /// disappears without a matching message. Returns true if a message was
    /// appended.
    pub(crate) fn abandon(&mut self, session: SessionId) -> bool {
        if self.buffer.is_empty() {
            self.is_streaming = false;
            self.phase = Phase::Idle;
            self.active = None;
            false
        } else {
            self.commit(session);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state_is_idle() {
        let state = SessionState::new();
        assert_eq!(state.phase, Phase::Idle);
        assert!(!state.is_sending);
        assert!(!state.is_streaming);
        assert!(state.buffer.is_empty());
        assert!(state.last_error.is_none());
        assert!(state.messages.is_empty());
        assert!(state.active.is_none());
    }

    #[test]
    fn test_begin_clears_buffer_and_error() {
        let mut state = SessionState::new();
        state.buffer = "leftover".to_string();
        state.last_error = Some("boom".to_string());

        state.begin(SessionId(1));

        assert!(state.buffer.is_empty());
        assert!(state.last_error.is_none());
        assert!(state.is_sending);
        assert!(state.is_streaming);
        assert_eq!(state.phase, Phase::Sending);
        assert!(state.is_active(SessionId(1)));
    }

    #[test]
    fn test_commit_appends_ai_message() {
        let mut state = SessionState::new();
        state.begin(SessionId(3));
        state.buffer.push_str("Hello");

        let msg = state.commit(SessionId(3)).clone();

        assert_eq!(msg.sender, Sender::Ai);
        assert_eq!(msg.content, "Hello");
        assert_eq!(msg.session, SessionId(3));
        assert!(state.buffer.is_empty());
        assert!(!state.is_streaming);
        assert_eq!(state.phase, Phase::Idle);
        assert!(state.active.is_none());
    }

    #[test]
    fn test_abandon_with_empty_buffer_appends_nothing() {
        let mut state = SessionState::new();
        state.begin(SessionId(1));

        assert!(!state.abandon(SessionId(1)));
        assert!(state.messages.is_empty());
        assert!(!state.is_streaming);
    }

    #[test]
    fn test_abandon_with_text_commits_it() {
        let mut state = SessionState::new();
        state.begin(SessionId(1));
        state.buffer.push_str("partial answ");

        assert!(state.abandon(SessionId(1)));
        assert_eq!(state.messages.len(), 1);
        assert_eq!(state.messages[0].content, "partial answ");
    }

    #[test]
    fn test_sender_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Sender::Ai).unwrap(), "\"ai\"");
        assert_eq!(serde_json::to_string(&Sender::User).unwrap(), "\"user\"");
    }
}
