use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use common::SearchConfig;
use feed_rs::model::Feed;
use feed_rs::parser;
use reqwest::Client;
use scraper::Html;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info};

use crate::validation::ArticleUrl;

/// A news/article summary returned by the search provider, before enrichment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub title: String,
    pub url: String,
    pub snippet: String,
    pub published_at: Option<DateTime<Utc>>,
    pub source: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub topic: String,
    pub category: Option<String>,
    pub limit: usize,
}

impl SearchQuery {
    /// Free-text query sent to the provider.
    pub fn text(&self) -> String {
        match &self.category {
            Some(category) => format!("{} {}", self.topic, category),
            None => self.topic.clone(),
        }
    }
}

/// Where candidates come from. Errors here fail the whole request.
#[async_trait::async_trait]
pub trait NewsSource: Send + Sync {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<Candidate>>;
}

/// Searches an RSS/Atom search feed (Google News style) and maps entries to candidates.
pub struct FeedSearchSource {
    client: Client,
    feed_url_template: String,
    max_candidates: usize,
    max_retries: u32,
    backoff_base: Duration,
}

impl FeedSearchSource {
    pub fn new(config: &SearchConfig, user_agent: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(user_agent)
            .build()
            .context("failed to build reqwest client")?;

        Ok(Self {
            client,
            feed_url_template: config.feed_url_template.clone(),
            max_candidates: config.max_candidates,
            max_retries: 3,
            backoff_base: Duration::from_secs(1),
        })
    }

    pub fn with_backoff(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    pub fn feed_url(&self, query: &SearchQuery) -> String {
        let encoded: String = url::form_urlencoded::byte_serialize(query.text().as_bytes()).collect();
        self.feed_url_template.replace("{query}", &encoded)
    }

    /// Fetches the feed, retrying server errors, rate limiting and network errors.
    /// Client errors (4xx) are treated as permanent.
    async fn fetch_feed(&self, url: &str) -> Result<Feed> {
        let mut last_error = None;

        for attempt in 1..=self.max_retries {
            if attempt > 1 {
                let backoff = self.backoff_base * 2u32.pow(attempt - 2); // 1x, 2x, 4x...
                info!("Retrying search feed fetch for {} (attempt {}/{}) after {:?}...", url, attempt, self.max_retries, backoff);
                tokio::time::sleep(backoff).await;
            }

            match self.client.get(url).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let bytes = response.bytes().await.context("failed to read response body")?;
                        let feed = parser::parse(bytes.as_ref()).context("failed to parse search feed")?;
                        return Ok(feed);
                    } else if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                        last_error = Some(anyhow::anyhow!("search provider returned {}", status));
                        continue;
                    } else {
                        return Err(anyhow::anyhow!("search feed fetch failed with status: {}", status));
                    }
                }
                Err(e) => {
                    last_error = Some(anyhow::Error::new(e).context("network error during search"));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("unknown error after retries")))
    }
}

#[async_trait::async_trait]
impl NewsSource for FeedSearchSource {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<Candidate>> {
        let url = self.feed_url(query);
        let feed = self.fetch_feed(&url).await?;

        let limit = query.limit.min(self.max_candidates);
        let candidates = candidates_from_feed(feed, limit);
        info!(topic = %query.topic, count = candidates.len(), "search returned candidates");
        Ok(candidates)
    }
}

/// Map feed entries to candidates, skipping entries without a usable link.
/// Repeated links keep their first entry; `limit` counts distinct links.
pub fn candidates_from_feed(feed: Feed, limit: usize) -> Vec<Candidate> {
    let mut seen = HashSet::new();
    feed.entries
        .into_iter()
        .filter_map(|entry| {
            let link = entry.links.first()?.href.clone();
            let url = match ArticleUrl::parse(&link) {
                Ok(url) => url,
                Err(e) => {
                    debug!(%link, error = %e, "skipping feed entry with unusable link");
                    return None;
                }
            };

            let snippet = entry
                .summary
                .map(|s| s.content)
                .or_else(|| entry.content.and_then(|c| c.body))
                .map(|html| html_to_text(&html))
                .unwrap_or_default();

            Some(Candidate {
                title: entry.title.map(|t| html_to_text(&t.content)).unwrap_or_default(),
                source: Some(url.host().to_string()),
                url: url.to_string(),
                snippet,
                published_at: entry.published.or(entry.updated),
            })
        })
        .filter(|c| seen.insert(c.url.clone()))
        .take(limit)
        .collect()
}

/// Flatten an HTML fragment to whitespace-normalized text.
pub fn html_to_text(fragment: &str) -> String {
    let doc = Html::parse_fragment(fragment);
    let text: Vec<&str> = doc.root_element().text().collect();
    text.join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}
