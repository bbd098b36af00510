//! Error types for the Jarvis assistant

use std::time::Duration;

use thiserror::Error;

/// Result type alias for assistant operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the assistant
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Required credentials are missing; activation is blocked
    #[error("missing configuration: {}", .0.join(", "))]
    MissingConfig(Vec<&'static str>),

    /// A capability (microphone, speech recognition) is not available
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Chat completion error
    #[error("chat completion error: {0}")]
    Chat(String),

    /// Web search error
    #[error("search error: {0}")]
    Search(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Synthesis(#[from] SynthesisError),

    /// Audio device or playback error
    #[error("audio error: {0}")]
    Audio(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Wake word detection error
    #[error("wake word error: {0}")]
    WakeWord(String),

    /// An external call exceeded its time budget
    #[error("{step} timed out after {}s", .after.as_secs())]
    Timeout {
        /// Which step timed out
        step: &'static str,
        /// The budget that was exceeded
        after: Duration,
    },

    /// A turn is already running
    #[error("a turn is already in progress")]
    TurnInProgress,

    /// Transcript was blank
    #[error("empty transcript")]
    EmptyTranscript,

    /// Assistant is switched off
    #[error("assistant is inactive")]
    Inactive,

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Speech synthesis failures, split by what the user can do about them
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SynthesisError {
    /// Provider rejected the API key (HTTP 401)
    #[error("invalid API key")]
    InvalidCredential,

    /// Provider rate limit hit (HTTP 429)
    #[error("rate limit exceeded")]
    RateLimited,

    /// Provider-side outage (HTTP 5xx)
    #[error("service temporarily unavailable ({0})")]
    Unavailable(u16),

    /// Anything else
    #[error("{0}")]
    Failed(String),
}

impl SynthesisError {
    /// Classify a failed HTTP response from a TTS provider
    #[must_use]
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        match status.as_u16() {
            401 => Self::InvalidCredential,
            429 => Self::RateLimited,
            code if code >= 500 => Self::Unavailable(code),
            code => Self::Failed(format!("HTTP {code}: {body}")),
        }
    }
}
