//! Configuration management for the assistant
//!
//! Values are resolved env > TOML file > defaults.

pub mod file;

use std::path::Path;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use crate::chat::DEFAULT_SYSTEM_PROMPT;
use crate::search::DEFAULT_TRIGGER_KEYWORDS;
use crate::{Error, Result};

pub use file::ConfigFile;

/// Environment variable holding the chat (and Whisper) API key
pub const OPENAI_KEY_VAR: &str = "OPENAI_API_KEY";
/// Environment variable holding the `ElevenLabs` API key
pub const ELEVENLABS_KEY_VAR: &str = "ELEVENLABS_API_KEY";
/// Environment variable holding the search API key
pub const SEARCH_KEY_VAR: &str = "SEARCH_API_KEY";
/// Environment variable holding the wake word engine key (accepted, unused)
pub const PICOVOICE_KEY_VAR: &str = "PICOVOICE_ACCESS_KEY";

/// Assistant configuration
#[derive(Debug)]
pub struct Config {
    /// Persona settings
    pub assistant: AssistantConfig,

    /// API keys
    pub api_keys: ApiKeys,

    /// Chat completion settings
    pub chat: ChatConfig,

    /// Speech settings
    pub voice: VoiceConfig,

    /// Search settings
    pub search: SearchConfig,

    /// Delays and per-call timeouts
    pub timing: TimingConfig,
}

/// Persona configuration
#[derive(Debug, Clone)]
pub struct AssistantConfig {
    /// Display name
    pub name: String,

    /// Wake phrase listened for on the microphone
    pub wake_word: String,

    /// Persona system prompt
    pub system_prompt: String,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            name: "JARVIS".to_string(),
            wake_word: "jarvis".to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

/// Chat completion configuration
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Model identifier
    pub model: String,

    /// Response token budget
    pub max_tokens: u32,

    /// Sampling temperature
    pub temperature: f32,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            max_tokens: 150,
            temperature: 0.7,
        }
    }
}

/// TTS backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TtsProviderKind {
    #[default]
    ElevenLabs,
    OpenAi,
}

impl std::str::FromStr for TtsProviderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "elevenlabs" => Ok(Self::ElevenLabs),
            "openai" => Ok(Self::OpenAi),
            other => Err(Error::Config(format!("unknown TTS provider: {other}"))),
        }
    }
}

/// Voice processing configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// TTS backend
    pub tts_provider: TtsProviderKind,

    /// Voice identifier
    pub voice_id: String,

    /// TTS model
    pub tts_model: String,

    /// `ElevenLabs` voice stability (0.0 to 1.0)
    pub stability: f32,

    /// `ElevenLabs` similarity boost (0.0 to 1.0)
    pub similarity_boost: f32,

    /// STT model for the microphone loop
    pub stt_model: String,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            tts_provider: TtsProviderKind::ElevenLabs,
            voice_id: "pNInz6obpgDQGcFmaJgB".to_string(),
            tts_model: "eleven_monolingual_v1".to_string(),
            stability: 0.75,
            similarity_boost: 0.75,
            stt_model: "whisper-1".to_string(),
        }
    }
}

/// Search backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SearchProviderKind {
    #[default]
    Serper,
    Brave,
}

impl std::str::FromStr for SearchProviderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "serper" => Ok(Self::Serper),
            "brave" => Ok(Self::Brave),
            other => Err(Error::Config(format!("unknown search provider: {other}"))),
        }
    }
}

/// Search configuration
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Search backend
    pub provider: SearchProviderKind,

    /// Results requested per query
    pub num_results: usize,

    /// Results folded into the prompt context
    pub context_results: usize,

    /// Trigger keywords
    pub keywords: Vec<String>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            provider: SearchProviderKind::Serper,
            num_results: 3,
            context_results: 2,
            keywords: DEFAULT_TRIGGER_KEYWORDS
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

/// Turn delays and external call budgets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingConfig {
    /// Pause between finishing a turn and listening again
    pub resume_listening: Duration,

    /// How long an error stays visible before recovery
    pub error_recovery: Duration,

    pub search_timeout: Duration,
    pub chat_timeout: Duration,
    pub synthesis_timeout: Duration,
    pub playback_timeout: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            resume_listening: Duration::from_secs(1),
            error_recovery: Duration::from_secs(3),
            search_timeout: Duration::from_secs(10),
            chat_timeout: Duration::from_secs(30),
            synthesis_timeout: Duration::from_secs(30),
            playback_timeout: Duration::from_secs(120),
        }
    }
}

/// API keys for external services
#[derive(Debug, Default)]
pub struct ApiKeys {
    /// `OpenAI` API key (chat, Whisper, optional TTS)
    pub openai: Option<SecretString>,

    /// `ElevenLabs` API key (TTS)
    pub elevenlabs: Option<SecretString>,

    /// Search API key (Serper or Brave)
    pub search: Option<SecretString>,

    /// Picovoice access key; carried for a future wake word engine
    pub picovoice: Option<SecretString>,
}

impl Config {
    /// Load configuration from the environment and a TOML file
    ///
    /// Uses `path` when given, otherwise the standard config file location.
    ///
    /// # Errors
    ///
    /// Returns error if an explicit file cannot be read or a value is invalid
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let fc = match path {
            Some(p) => file::read_config_file(p)?,
            None => file::load_config_file(),
        };
        Self::from_sources(fc, |key| std::env::var(key).ok())
    }

    /// Assemble configuration from a parsed file and an env lookup
    ///
    /// # Errors
    ///
    /// Returns error if a provider name is unknown
    pub fn from_sources(fc: ConfigFile, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let secret = |var: &str, fallback: Option<String>| {
            env(var)
                .or(fallback)
                .filter(|k| !k.trim().is_empty())
                .map(SecretString::from)
        };

        let api_keys = ApiKeys {
            openai: secret(OPENAI_KEY_VAR, fc.api_keys.openai),
            elevenlabs: secret(ELEVENLABS_KEY_VAR, fc.api_keys.elevenlabs),
            search: secret(SEARCH_KEY_VAR, fc.api_keys.search),
            picovoice: secret(PICOVOICE_KEY_VAR, fc.api_keys.picovoice),
        };

        let defaults = AssistantConfig::default();
        let assistant = AssistantConfig {
            name: fc.assistant.name.unwrap_or(defaults.name),
            wake_word: env("JARVIS_WAKE_WORD")
                .or(fc.assistant.wake_word)
                .unwrap_or(defaults.wake_word),
            system_prompt: fc.assistant.system_prompt.unwrap_or(defaults.system_prompt),
        };

        let defaults = ChatConfig::default();
        let chat = ChatConfig {
            model: env("JARVIS_CHAT_MODEL")
                .or(fc.chat.model)
                .unwrap_or(defaults.model),
            max_tokens: fc.chat.max_tokens.unwrap_or(defaults.max_tokens),
            temperature: fc.chat.temperature.unwrap_or(defaults.temperature),
        };

        let tts_provider = env("JARVIS_TTS_PROVIDER")
            .or(fc.voice.tts_provider)
            .map(|p| p.parse::<TtsProviderKind>())
            .transpose()?
            .unwrap_or_default();
        let defaults = VoiceConfig::default();
        let (default_voice, default_model) = match tts_provider {
            TtsProviderKind::ElevenLabs => (defaults.voice_id, defaults.tts_model),
            TtsProviderKind::OpenAi => ("alloy".to_string(), "tts-1".to_string()),
        };
        let voice = VoiceConfig {
            tts_provider,
            voice_id: env("JARVIS_VOICE_ID")
                .or(fc.voice.voice_id)
                .unwrap_or(default_voice),
            tts_model: fc.voice.tts_model.unwrap_or(default_model),
            stability: fc.voice.stability.unwrap_or(defaults.stability),
            similarity_boost: fc
                .voice
                .similarity_boost
                .unwrap_or(defaults.similarity_boost),
            stt_model: env("JARVIS_STT_MODEL")
                .or(fc.voice.stt_model)
                .unwrap_or(defaults.stt_model),
        };

        let defaults = SearchConfig::default();
        let search = SearchConfig {
            provider: env("JARVIS_SEARCH_PROVIDER")
                .or(fc.search.provider)
                .map(|p| p.parse::<SearchProviderKind>())
                .transpose()?
                .unwrap_or_default(),
            num_results: fc.search.num_results.unwrap_or(defaults.num_results),
            context_results: fc
                .search
                .context_results
                .unwrap_or(defaults.context_results),
            keywords: fc.search.keywords.unwrap_or(defaults.keywords),
        };

        let defaults = TimingConfig::default();
        let t = fc.timing;
        let timing = TimingConfig {
            resume_listening: t
                .resume_listening_ms
                .map_or(defaults.resume_listening, Duration::from_millis),
            error_recovery: t
                .error_recovery_ms
                .map_or(defaults.error_recovery, Duration::from_millis),
            search_timeout: t
                .search_timeout_secs
                .map_or(defaults.search_timeout, Duration::from_secs),
            chat_timeout: t
                .chat_timeout_secs
                .map_or(defaults.chat_timeout, Duration::from_secs),
            synthesis_timeout: t
                .synthesis_timeout_secs
                .map_or(defaults.synthesis_timeout, Duration::from_secs),
            playback_timeout: t
                .playback_timeout_secs
                .map_or(defaults.playback_timeout, Duration::from_secs),
        };

        Ok(Self {
            assistant,
            api_keys,
            chat,
            voice,
            search,
            timing,
        })
    }

    /// Key used by the configured TTS provider
    #[must_use]
    pub const fn speech_key(&self) -> Option<&SecretString> {
        match self.voice.tts_provider {
            TtsProviderKind::ElevenLabs => self.api_keys.elevenlabs.as_ref(),
            TtsProviderKind::OpenAi => self.api_keys.openai.as_ref(),
        }
    }

    /// Names of the required credentials that are not set
    #[must_use]
    pub fn missing_keys(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.api_keys.openai.is_none() {
            missing.push(OPENAI_KEY_VAR);
        }
        if self.voice.tts_provider == TtsProviderKind::ElevenLabs
            && self.api_keys.elevenlabs.is_none()
        {
            missing.push(ELEVENLABS_KEY_VAR);
        }
        if self.api_keys.search.is_none() {
            missing.push(SEARCH_KEY_VAR);
        }
        missing
    }

    /// Check that every required credential is present
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingConfig`] naming each missing key
    pub fn ensure_ready(&self) -> Result<()> {
        let missing = self.missing_keys();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::MissingConfig(missing))
        }
    }
}

/// Copy a secret for handing to a client
#[must_use]
pub fn clone_secret(secret: &SecretString) -> SecretString {
    SecretString::from(secret.expose_secret().to_string())
}
