//! Web search for prompt context
//!
//! Search is best-effort: the orchestrator only asks for it when the
//! transcript looks like a question about current information, and any
//! failure leaves the context empty.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Phrases that suggest the user wants fresh information
pub const DEFAULT_TRIGGER_KEYWORDS: &[&str] = &[
    "what is", "who is", "when is", "where is", "how to", "current", "latest", "news",
    "weather", "price", "stock", "today", "recent", "update", "happening",
];

/// Search result from web search
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Result title
    pub title: String,
    /// Result URL
    pub url: String,
    /// Result snippet/description
    pub snippet: String,
}

/// A web search backend
#[async_trait]
pub trait WebSearch: Send + Sync {
    /// Run a query and return the ranked results
    async fn search(&self, query: &str) -> Result<Vec<SearchResult>>;
}

/// Decides whether a transcript should be enriched with search results
#[derive(Debug, Clone)]
pub struct SearchTrigger {
    keywords: Vec<String>,
}

impl Default for SearchTrigger {
    fn default() -> Self {
        Self::new(DEFAULT_TRIGGER_KEYWORDS.iter().map(ToString::to_string))
    }
}

impl SearchTrigger {
    /// Build a trigger from a keyword list (matched case-insensitively)
    pub fn new(keywords: impl IntoIterator<Item = String>) -> Self {
        let keywords = keywords
            .into_iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        Self { keywords }
    }

    /// Check whether any keyword occurs in the message
    #[must_use]
    pub fn matches(&self, message: &str) -> bool {
        let lower = message.to_lowercase();
        self.keywords.iter().any(|k| lower.contains(k.as_str()))
    }

    #[must_use]
    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }
}

/// Join the top results into a prompt context block
///
/// Returns an empty string when there are no results.
#[must_use]
pub fn format_context(results: &[SearchResult], limit: usize) -> String {
    results
        .iter()
        .take(limit)
        .map(|r| format!("{}: {}", r.title, r.snippet))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Serper (Google) search
pub struct SerperSearch {
    client: reqwest::Client,
    api_key: SecretString,
    num_results: usize,
}

/// Serper API request body
#[derive(Debug, Serialize)]
struct SerperRequest<'a> {
    q: &'a str,
    num: usize,
}

/// Serper API response
#[derive(Debug, Deserialize)]
struct SerperSearchResponse {
    organic: Option<Vec<SerperResult>>,
}

#[derive(Debug, Deserialize)]
struct SerperResult {
    title: String,
    #[serde(default)]
    link: String,
    #[serde(default)]
    snippet: String,
}

impl SerperSearch {
    /// Create a Serper client
    ///
    /// # Errors
    ///
    /// Returns error if API key is empty
    pub fn new(api_key: SecretString, num_results: usize) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config("search API key required".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            num_results,
        })
    }
}

#[async_trait]
impl WebSearch for SerperSearch {
    async fn search(&self, query: &str) -> Result<Vec<SearchResult>> {
        let request_body = SerperRequest {
            q: query,
            num: self.num_results,
        };

        let response = self
            .client
            .post("https://google.serper.dev/search")
            .header("X-API-KEY", self.api_key.expose_secret())
            .header("Content-Type", "application/json")
            .json(&request_body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Search(format!("Serper error {status}: {body}")));
        }

        let serper_response: SerperSearchResponse = response.json().await?;
        Ok(parse_serper(serper_response))
    }
}

fn parse_serper(response: SerperSearchResponse) -> Vec<SearchResult> {
    response
        .organic
        .map(|organic| {
            organic
                .into_iter()
                .map(|r| SearchResult {
                    title: r.title,
                    url: r.link,
                    snippet: r.snippet,
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Brave Search
pub struct BraveSearch {
    client: reqwest::Client,
    api_key: SecretString,
    num_results: usize,
}

/// Brave Search API response
#[derive(Debug, Deserialize)]
struct BraveSearchResponse {
    web: Option<BraveWebResults>,
}

#[derive(Debug, Deserialize)]
struct BraveWebResults {
    results: Vec<BraveResult>,
}

#[derive(Debug, Deserialize)]
struct BraveResult {
    title: String,
    url: String,
    #[serde(default)]
    description: String,
}

impl BraveSearch {
    /// Create a Brave Search client
    ///
    /// # Errors
    ///
    /// Returns error if API key is empty
    pub fn new(api_key: SecretString, num_results: usize) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config("search API key required".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            num_results,
        })
    }
}

#[async_trait]
impl WebSearch for BraveSearch {
    async fn search(&self, query: &str) -> Result<Vec<SearchResult>> {
        let count = self.num_results.to_string();

        let response = self
            .client
            .get("https://api.search.brave.com/res/v1/web/search")
            .header("X-Subscription-Token", self.api_key.expose_secret())
            .query(&[("q", query), ("count", count.as_str())])
            .send()
            .await?;

        let response = response.error_for_status().map_err(Error::Http)?;
        let brave_response: BraveSearchResponse = response.json().await?;

        let results = brave_response
            .web
            .map(|web| {
                web.results
                    .into_iter()
                    .map(|r| SearchResult {
                        title: r.title,
                        url: r.url,
                        snippet: r.description,
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(results)
    }
}
