// Article content fetching. ContentFetcher turns every extraction failure into
// ParsedArticle::Unavailable, so nothing past this module sees an extraction error.

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use common::{ExtractorKind, FetchConfig};
use rand::Rng;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::validation::{ArticleUrl, ValidationError};

/// Outcome of fetching one article. An empty `Content` is a success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedArticle {
    Content(String),
    Unavailable { reason: String },
}

impl ParsedArticle {
    pub fn is_available(&self) -> bool {
        matches!(self, ParsedArticle::Content(_))
    }

    pub fn into_content(self) -> Option<String> {
        match self {
            ParsedArticle::Content(content) => Some(content),
            ParsedArticle::Unavailable { .. } => None,
        }
    }
}

/// What an extraction engine returned. Fields beyond these are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Extraction {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("extraction timed out after {0:?}")]
    Timeout(Duration),

    #[error("article host returned status {0}")]
    Status(u16),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("could not parse extraction result: {0}")]
    Parse(String),
}

impl ExtractionError {
    /// Only timeouts are worth a second attempt; client errors and parse
    /// failures will fail the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExtractionError::Timeout(_))
    }
}

impl From<reqwest::Error> for ExtractionError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ExtractionError::Timeout(Duration::ZERO)
        } else if let Some(status) = e.status() {
            ExtractionError::Status(status.as_u16())
        } else if e.is_decode() {
            ExtractionError::Parse(e.to_string())
        } else {
            ExtractionError::Transport(e.to_string())
        }
    }
}

/// A readability / content-extraction engine.
#[async_trait::async_trait]
pub trait ExtractionProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn extract(&self, url: &ArticleUrl) -> Result<Extraction, ExtractionError>;
}

/// Downloads the page and runs readability on it in-process.
pub struct ReadabilityExtractor {
    client: Client,
}

impl ReadabilityExtractor {
    pub fn new(user_agent: &str) -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .build()
            .context("failed to build reqwest client")?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl ExtractionProvider for ReadabilityExtractor {
    fn name(&self) -> &str {
        "readability"
    }

    async fn extract(&self, url: &ArticleUrl) -> Result<Extraction, ExtractionError> {
        let response = self.client.get(url.as_str()).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExtractionError::Status(status.as_u16()));
        }

        // Readability requires a Reader, so we fetch bytes
        let bytes = response.bytes().await?;
        let mut reader = Cursor::new(bytes);

        let product = readability::extractor::extract(&mut reader, url.as_url())
            .map_err(|e| ExtractionError::Parse(e.to_string()))?;

        debug!(url = %url, bytes = product.content.len(), "readability extracted article body");

        Ok(Extraction {
            content: Some(product.content),
        })
    }
}

/// Calls a hosted parser service: `GET {endpoint}?url=..&contentType=html`.
pub struct ParserServiceExtractor {
    client: Client,
    endpoint: Url,
}

impl ParserServiceExtractor {
    pub fn new(endpoint: &str, user_agent: &str) -> anyhow::Result<Self> {
        let endpoint = Url::parse(endpoint).with_context(|| format!("invalid parser endpoint: {}", endpoint))?;
        let client = Client::builder()
            .user_agent(user_agent)
            .build()
            .context("failed to build reqwest client")?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait::async_trait]
impl ExtractionProvider for ParserServiceExtractor {
    fn name(&self) -> &str {
        "parser_service"
    }

    async fn extract(&self, url: &ArticleUrl) -> Result<Extraction, ExtractionError> {
        let response = self
            .client
            .get(self.endpoint.clone())
            .query(&[("url", url.as_str()), ("contentType", "html")])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExtractionError::Status(status.as_u16()));
        }

        let body = response.text().await?;
        serde_json::from_str::<Extraction>(&body).map_err(|e| ExtractionError::Parse(e.to_string()))
    }
}

/// Fetches article bodies with a bounded timeout and fault isolation.
pub struct ContentFetcher {
    provider: Arc<dyn ExtractionProvider>,
    timeout: Duration,
    retry_on_timeout: bool,
    retry_pause: Duration,
}

impl ContentFetcher {
    pub fn new(provider: Arc<dyn ExtractionProvider>, timeout: Duration) -> Self {
        Self {
            provider,
            timeout,
            retry_on_timeout: true,
            retry_pause: Duration::from_millis(500),
        }
    }

    pub fn with_retry_on_timeout(mut self, retry: bool) -> Self {
        self.retry_on_timeout = retry;
        self
    }

    pub fn with_retry_pause(mut self, pause: Duration) -> Self {
        self.retry_pause = pause;
        self
    }

    /// Build the fetcher and its extraction engine from the `[fetch]` section.
    pub fn from_config(config: &FetchConfig) -> anyhow::Result<Self> {
        let provider: Arc<dyn ExtractionProvider> = match config.extractor {
            ExtractorKind::Readability => Arc::new(ReadabilityExtractor::new(&config.user_agent)?),
            ExtractorKind::ParserService => {
                let endpoint = config
                    .parser_endpoint
                    .as_deref()
                    .context("fetch.parser_endpoint is required for the parser_service extractor")?;
                Arc::new(ParserServiceExtractor::new(endpoint, &config.user_agent)?)
            }
        };
        info!(extractor = provider.name(), timeout_secs = config.timeout_seconds, "content fetcher configured");

        Ok(Self::new(provider, Duration::from_secs(config.timeout_seconds))
            .with_retry_on_timeout(config.retry_on_timeout))
    }

    /// Validate `raw` and fetch it. Invalid input is rejected before any network call.
    pub async fn fetch_str(&self, raw: &str) -> Result<ParsedArticle, ValidationError> {
        let url = ArticleUrl::parse(raw)?;
        Ok(self.fetch(&url).await)
    }

    /// Fetch the readable HTML of `url`. Never fails: errors become `Unavailable`.
    pub async fn fetch(&self, url: &ArticleUrl) -> ParsedArticle {
        let max_attempts = if self.retry_on_timeout { 2 } else { 1 };
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.attempt(url).await {
                Ok(Extraction { content: Some(content) }) => {
                    debug!(url = %url, bytes = content.len(), attempt, "article content fetched");
                    return ParsedArticle::Content(content);
                }
                Ok(Extraction { content: None }) => {
                    warn!(url = %url, extractor = self.provider.name(), "extractor returned no content");
                    return ParsedArticle::Unavailable {
                        reason: "extractor returned no content".to_string(),
                    };
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..=250));
                    let pause = self.retry_pause + jitter;
                    warn!(url = %url, error = %e, attempt, ?pause, "article fetch timed out; retrying once");
                    tokio::time::sleep(pause).await;
                }
                Err(e) => {
                    warn!(url = %url, error = %e, attempt, "article fetch failed; returning null content");
                    return ParsedArticle::Unavailable { reason: e.to_string() };
                }
            }
        }
    }

    async fn attempt(&self, url: &ArticleUrl) -> Result<Extraction, ExtractionError> {
        match tokio::time::timeout(self.timeout, self.provider.extract(url)).await {
            Ok(Err(ExtractionError::Timeout(_))) | Err(_) => Err(ExtractionError::Timeout(self.timeout)),
            Ok(result) => result,
        }
    }
}
