//! JARVIS - a voice assistant in the terminal
//!
//! This library provides the building blocks of the assistant:
//! - Session state machine and conversation transcript
//! - Turn orchestration (search, chat completion, speech)
//! - Voice processing (capture, wake word, STT, TTS, playback)
//! - Layered configuration (env, TOML file, defaults)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                    Interfaces                       │
//! │      Typed input (stdin)   │   Microphone loop      │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                    Assistant                        │
//! │   Session  │  Transcript  │  Turns  │  Recovery     │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                 External services                   │
//! │   Search  │  Chat  │  STT  │  TTS  │  Speakers      │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod chat;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod search;
pub mod session;
pub mod voice;

pub use chat::{ChatCompletion, OpenAiChat};
pub use config::Config;
pub use error::{Error, Result, SynthesisError};
pub use orchestrator::{
    Assistant, AssistantEvent, Collaborators, SpeechFailure, TurnOptions, TurnOutcome,
    TurnReport,
};
pub use search::{BraveSearch, SearchResult, SearchTrigger, SerperSearch, WebSearch};
pub use session::{ChatMessage, Phase, Role, SessionState, Status, Transcript};
