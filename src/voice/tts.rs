//! Text-to-speech (TTS) processing

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use super::AudioClip;
use crate::config::VoiceConfig;
use crate::error::SynthesisError;
use crate::{Error, Result};

/// Turns response text into playable audio
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize `text`
    ///
    /// Provider HTTP failures come back as [`Error::Synthesis`] so callers
    /// can tell a bad key from a rate limit or an outage.
    async fn synthesize(&self, text: &str) -> Result<AudioClip>;
}

/// `ElevenLabs` TTS
pub struct ElevenLabsTts {
    client: reqwest::Client,
    api_key: SecretString,
    voice_id: String,
    model: String,
    stability: f32,
    similarity_boost: f32,
}

#[derive(serde::Serialize)]
struct ElevenLabsRequest<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: VoiceSettings,
}

#[derive(serde::Serialize)]
struct VoiceSettings {
    stability: f32,
    similarity_boost: f32,
}

impl ElevenLabsTts {
    /// Create a new `ElevenLabs` TTS instance
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(api_key: SecretString, config: &VoiceConfig) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config(
                "ElevenLabs API key required for TTS".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            voice_id: config.voice_id.clone(),
            model: config.tts_model.clone(),
            stability: config.stability,
            similarity_boost: config.similarity_boost,
        })
    }

    fn request<'a>(&'a self, text: &'a str) -> ElevenLabsRequest<'a> {
        ElevenLabsRequest {
            text,
            model_id: &self.model,
            voice_settings: VoiceSettings {
                stability: self.stability,
                similarity_boost: self.similarity_boost,
            },
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for ElevenLabsTts {
    async fn synthesize(&self, text: &str) -> Result<AudioClip> {
        tracing::debug!(chars = text.len(), voice = %self.voice_id, "synthesizing speech");

        let url = format!(
            "https://api.elevenlabs.io/v1/text-to-speech/{}",
            self.voice_id
        );

        let response = self
            .client
            .post(&url)
            .header("xi-api-key", self.api_key.expose_secret())
            .header("Accept", "audio/mpeg")
            .header("Content-Type", "application/json")
            .json(&self.request(text))
            .send()
            .await
            .map_err(|e| SynthesisError::Failed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, body = %body, "ElevenLabs TTS error");
            return Err(SynthesisError::from_status(status, &body).into());
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| SynthesisError::Failed(e.to_string()))?;
        tracing::debug!(bytes = audio.len(), "audio received");

        Ok(AudioClip::mp3(audio.to_vec()))
    }
}

/// `OpenAI` TTS
pub struct OpenAiTts {
    client: reqwest::Client,
    api_key: SecretString,
    voice: String,
    model: String,
}

#[derive(serde::Serialize)]
struct OpenAiTtsRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
}

impl OpenAiTts {
    /// Create a new `OpenAI` TTS instance
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(api_key: SecretString, config: &VoiceConfig) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config("OpenAI API key required for TTS".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            voice: config.voice_id.clone(),
            model: config.tts_model.clone(),
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for OpenAiTts {
    async fn synthesize(&self, text: &str) -> Result<AudioClip> {
        let request = OpenAiTtsRequest {
            model: &self.model,
            input: text,
            voice: &self.voice,
        };

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/speech")
            .header(
                "Authorization",
                format!("Bearer {}", self.api_key.expose_secret()),
            )
            .json(&request)
            .send()
            .await
            .map_err(|e| SynthesisError::Failed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, body = %body, "OpenAI TTS error");
            return Err(SynthesisError::from_status(status, &body).into());
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| SynthesisError::Failed(e.to_string()))?;
        Ok(AudioClip::mp3(audio.to_vec()))
    }
}
