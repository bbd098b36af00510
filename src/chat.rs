//! Chat completion
//!
//! The chat call is the one required step of a turn: if it fails the turn
//! is aborted and the error is shown to the user.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::config::ChatConfig;
use crate::{Error, Result};

const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Default persona prompt
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are JARVIS, Tony Stark's AI assistant. \
Respond in a helpful, intelligent, and slightly witty manner. \
Keep responses concise but informative.";

/// Reply used when the model returns no content
pub const EMPTY_RESPONSE_FALLBACK: &str =
    "I apologize, but I encountered an error processing your request.";

/// A language model that answers one user message
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    /// Produce the assistant reply for `message`, optionally grounded in
    /// search `context`
    async fn complete(&self, message: &str, context: Option<&str>) -> Result<String>;
}

/// Build the system prompt, appending search context when there is any
#[must_use]
pub fn build_system_prompt(persona: &str, context: Option<&str>) -> String {
    match context.map(str::trim) {
        Some(ctx) if !ctx.is_empty() => {
            format!("{persona} Use this search context when relevant: {ctx}")
        }
        _ => persona.to_string(),
    }
}

/// `OpenAI` chat completions client
pub struct OpenAiChat {
    client: reqwest::Client,
    api_key: SecretString,
    url: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    system_prompt: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [Message<'a>; 2],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

impl OpenAiChat {
    /// Create a chat client
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(api_key: SecretString, config: &ChatConfig, system_prompt: String) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config(
                "OpenAI API key required for chat".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            url: OPENAI_CHAT_URL.to_string(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            system_prompt,
        })
    }

    /// Point the client at an OpenAI-compatible endpoint
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    fn request<'a>(&'a self, system: &'a str, message: &'a str) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: [
                Message {
                    role: "system",
                    content: system,
                },
                Message {
                    role: "user",
                    content: message,
                },
            ],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        }
    }
}

#[async_trait]
impl ChatCompletion for OpenAiChat {
    async fn complete(&self, message: &str, context: Option<&str>) -> Result<String> {
        let system = build_system_prompt(&self.system_prompt, context);
        let request = self.request(&system, message);

        tracing::debug!(
            model = %self.model,
            with_context = context.is_some_and(|c| !c.is_empty()),
            "requesting chat completion"
        );

        let response = self
            .client
            .post(&self.url)
            .header(
                "Authorization",
                format!("Bearer {}", self.api_key.expose_secret()),
            )
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Chat(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "chat API error");
            return Err(Error::Chat(format!("API error {status}")));
        }

        let result: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::Chat(format!("parse error: {e}")))?;

        Ok(first_content(result))
    }
}

fn first_content(response: ChatResponse) -> String {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|c| !c.trim().is_empty())
        .unwrap_or_else(|| EMPTY_RESPONSE_FALLBACK.to_string())
}
