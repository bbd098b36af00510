//! Session state and chat transcript
//!
//! The session is a single record owned by the [`Assistant`](crate::Assistant).
//! The listening/processing/speaking flags are views over one [`Phase`], so
//! at most one of them can be true at a time.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where the assistant is in its turn cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Nothing happening
    #[default]
    Idle,
    /// Waiting for the user's utterance
    Listening,
    /// Running search and chat completion
    Processing,
    /// Synthesizing and playing the response
    Speaking,
    /// A failure is being shown; recovers on a timer
    Error,
}

/// Summary of the session for status displays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Inactive,
    Standby,
    Listening,
    Thinking,
    Speaking,
    Error,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Inactive => "Inactive",
            Self::Standby => "Standby",
            Self::Listening => "Listening",
            Self::Thinking => "Thinking",
            Self::Speaking => "Speaking",
            Self::Error => "Error",
        };
        f.write_str(label)
    }
}

/// Mutable session record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    /// Wake word has been heard since activation
    pub wake_active: bool,

    /// Current phase
    pub phase: Phase,

    /// Transcript of the current (or last) turn
    pub last_transcript: Option<String>,

    /// Assistant response of the current (or last) turn
    pub last_response: Option<String>,

    /// Search context used for the current (or last) turn
    pub last_search_result: Option<String>,

    /// User-visible error, set only in [`Phase::Error`]
    pub error: Option<String>,
}

impl SessionState {
    /// Reset per-turn fields and enter [`Phase::Processing`]
    pub fn begin_turn(&mut self, transcript: &str) {
        self.last_transcript = Some(transcript.to_string());
        self.last_response = None;
        self.last_search_result = None;
        self.error = None;
        self.phase = Phase::Processing;
    }

    /// Enter [`Phase::Error`] with a message
    pub fn fail(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
        self.phase = Phase::Error;
    }

    /// Clear the error and move to `next`
    pub fn recover(&mut self, next: Phase) {
        self.error = None;
        self.phase = next;
    }

    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.phase == Phase::Listening
    }

    #[must_use]
    pub fn is_processing(&self) -> bool {
        self.phase == Phase::Processing
    }

    #[must_use]
    pub fn is_speaking(&self) -> bool {
        self.phase == Phase::Speaking
    }

    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Status summary, highest priority first
    #[must_use]
    pub fn status(&self) -> Status {
        if self.error.is_some() || self.phase == Phase::Error {
            return Status::Error;
        }
        match self.phase {
            Phase::Speaking => Status::Speaking,
            Phase::Processing => Status::Thinking,
            Phase::Listening => Status::Listening,
            _ if self.wake_active => Status::Standby,
            _ => Status::Inactive,
        }
    }
}

/// Who wrote a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One entry in the chat transcript
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Unique message ID
    pub id: Uuid,

    /// Author
    pub role: Role,

    /// Message text
    pub text: String,

    /// Creation time
    pub created_at: DateTime<Utc>,

    /// Whether the message came from (or was spoken by) voice
    pub voice: bool,
}

impl ChatMessage {
    /// Create a message stamped with a fresh ID and the current time
    #[must_use]
    pub fn new(role: Role, text: impl Into<String>, voice: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            text: text.into(),
            created_at: Utc::now(),
            voice,
        }
    }
}

/// Append-only chat log for the process lifetime
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    messages: Vec<ChatMessage>,
}

impl Transcript {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            messages: Vec::new(),
        }
    }

    /// Append a message
    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    #[must_use]
    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChatMessage> {
        self.messages.iter()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[ChatMessage] {
        &self.messages
    }
}
