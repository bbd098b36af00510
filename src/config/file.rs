//! TOML configuration file loading
//!
//! Supports `~/.config/jarvis/config.toml` as a persistent config source.
//! All fields are optional; the file overlays the defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Result;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct ConfigFile {
    /// Assistant persona
    #[serde(default)]
    pub assistant: AssistantFileConfig,

    /// Chat completion settings
    #[serde(default)]
    pub chat: ChatFileConfig,

    /// Voice/audio configuration
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// Search settings
    #[serde(default)]
    pub search: SearchFileConfig,

    /// Delays and timeouts
    #[serde(default)]
    pub timing: TimingFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,
}

#[derive(Debug, Default, Deserialize)]
pub struct AssistantFileConfig {
    /// Display name (e.g. "JARVIS")
    pub name: Option<String>,

    /// Wake phrase (e.g. "jarvis")
    pub wake_word: Option<String>,

    /// Persona system prompt
    pub system_prompt: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChatFileConfig {
    /// Model identifier (e.g. "gpt-4o-mini")
    pub model: Option<String>,

    /// Response token budget
    pub max_tokens: Option<u32>,

    /// Sampling temperature
    pub temperature: Option<f32>,
}

/// Voice processing configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// TTS provider ("elevenlabs" or "openai")
    pub tts_provider: Option<String>,

    /// Voice identifier (`ElevenLabs` voice ID or `OpenAI` voice name)
    pub voice_id: Option<String>,

    /// TTS model (e.g. "`eleven_monolingual_v1`")
    pub tts_model: Option<String>,

    /// `ElevenLabs` voice stability
    pub stability: Option<f32>,

    /// `ElevenLabs` similarity boost
    pub similarity_boost: Option<f32>,

    /// STT model (e.g. "whisper-1")
    pub stt_model: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchFileConfig {
    /// Provider ("serper" or "brave")
    pub provider: Option<String>,

    /// Results requested per query
    pub num_results: Option<usize>,

    /// Results folded into the prompt context
    pub context_results: Option<usize>,

    /// Replacement trigger keyword list
    pub keywords: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TimingFileConfig {
    pub resume_listening_ms: Option<u64>,
    pub error_recovery_ms: Option<u64>,
    pub search_timeout_secs: Option<u64>,
    pub chat_timeout_secs: Option<u64>,
    pub synthesis_timeout_secs: Option<u64>,
    pub playback_timeout_secs: Option<u64>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub openai: Option<String>,
    pub elevenlabs: Option<String>,
    pub search: Option<String>,
    pub picovoice: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `ConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> ConfigFile {
    let Some(path) = config_file_path() else {
        return ConfigFile::default();
    };

    if !path.exists() {
        return ConfigFile::default();
    }

    match read_config_file(&path) {
        Ok(config) => {
            tracing::info!(path = %path.display(), "loaded config file");
            config
        }
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to load config file, using defaults"
            );
            ConfigFile::default()
        }
    }
}

/// Read and parse a config file from an explicit path
///
/// # Errors
///
/// Returns error if the file cannot be read or is not valid TOML
pub fn read_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

/// Return the config file path: `~/.config/jarvis/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("jarvis").join("config.toml"))
}
