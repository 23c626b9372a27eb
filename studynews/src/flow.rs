// News brief orchestration: acquire, enrich selectively, summarize, rank.
// Output only ever holds acquired candidates, each at most once.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::llm::planner::EnrichmentPlanner;
use crate::llm::summarizer;
use crate::llm::{LlmProvider, Summary};
use crate::search::{html_to_text, Candidate, NewsSource, SearchQuery};
use crate::tools::{FetchArticleOutput, ToolRegistry, FETCH_ARTICLE_TOOL};

const SUMMARY_MAX_TOKENS: usize = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Enrichment {
    /// Full content was fetched and attached
    Full,
    /// Enrichment was attempted and failed; the snippet stands in
    Snippet,
    /// The planner did not ask for full content
    NotRequested,
}

/// A candidate after the enrichment step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedArticle {
    pub title: String,
    pub url: String,
    pub snippet: String,
    pub published_at: Option<DateTime<Utc>>,
    pub source: Option<String>,
    pub content: Option<String>,
    pub enrichment: Enrichment,
    pub summary: Option<Summary>,
}

impl EnrichedArticle {
    pub fn snippet_only(candidate: Candidate) -> Self {
        Self::build(candidate, None, Enrichment::NotRequested)
    }

    /// Result of an enrichment attempt; `None` content means the fetch failed.
    pub fn enriched(candidate: Candidate, content: Option<String>) -> Self {
        let enrichment = if content.is_some() {
            Enrichment::Full
        } else {
            Enrichment::Snippet
        };
        Self::build(candidate, content, enrichment)
    }

    fn build(candidate: Candidate, content: Option<String>, enrichment: Enrichment) -> Self {
        Self {
            title: candidate.title,
            url: candidate.url,
            snippet: candidate.snippet,
            published_at: candidate.published_at,
            source: candidate.source,
            content,
            enrichment,
            summary: None,
        }
    }

    /// Plain text for summarization: the enriched body when present, else the snippet.
    pub fn body_text(&self) -> String {
        match self.content.as_deref() {
            Some(html) if !html.trim().is_empty() => {
                html2text::from_read(html.as_bytes(), 100).unwrap_or_else(|_| html_to_text(html))
            }
            _ => self.snippet.clone(),
        }
    }
}

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("candidate acquisition failed: {0:#}")]
    Acquisition(anyhow::Error),
}

pub struct NewsFlow {
    source: Arc<dyn NewsSource>,
    tools: ToolRegistry,
    planner: Arc<dyn EnrichmentPlanner>,
    summarizer: Option<Arc<dyn LlmProvider>>,
    max_concurrent: usize,
}

impl NewsFlow {
    pub fn new(source: Arc<dyn NewsSource>, tools: ToolRegistry, planner: Arc<dyn EnrichmentPlanner>) -> Self {
        Self {
            source,
            tools,
            planner,
            summarizer: None,
            max_concurrent: 8,
        }
    }

    pub fn with_summarizer(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.summarizer = Some(provider);
        self
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    pub fn planner_name(&self) -> &str {
        self.planner.name()
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub async fn run(&self, query: &SearchQuery) -> Result<Vec<EnrichedArticle>, FlowError> {
        // 1. Acquire
        let candidates = self.source.search(query).await.map_err(|e| {
            error!(topic = %query.topic, error = %e, "candidate acquisition failed");
            FlowError::Acquisition(e)
        })?;
        let candidates = dedupe_by_url(candidates);
        if candidates.is_empty() {
            info!(topic = %query.topic, "no candidates found");
            return Ok(Vec::new());
        }

        // 2. Selective enrichment
        let selected: HashSet<usize> = match self.planner.select(&query.topic, &candidates).await {
            Ok(indices) => indices.into_iter().filter(|&i| i < candidates.len()).collect(),
            Err(e) => {
                warn!(planner = self.planner.name(), error = %e, "planner selection failed; enriching nothing");
                HashSet::new()
            }
        };
        debug!(selected = selected.len(), candidates = candidates.len(), "enrichment plan ready");

        let mut fetched: HashMap<usize, Option<String>> = stream::iter(selected)
            .map(|i| {
                let url = candidates[i].url.clone();
                async move { (i, self.enrich(&url).await) }
            })
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await;

        // 3. Fallback: a failed fetch keeps the candidate with its snippet
        let mut articles: Vec<EnrichedArticle> = candidates
            .into_iter()
            .enumerate()
            .map(|(i, candidate)| match fetched.remove(&i) {
                Some(content) => EnrichedArticle::enriched(candidate, content),
                None => EnrichedArticle::snippet_only(candidate),
            })
            .collect();

        // 4. Summaries
        if let Some(provider) = &self.summarizer {
            self.summarize_all(provider, &mut articles).await;
        }

        // 5. Assembly
        let order = match self.planner.rank(&query.topic, &articles).await {
            Ok(order) => order,
            Err(e) => {
                warn!(planner = self.planner.name(), error = %e, "ranking failed; keeping acquisition order");
                Vec::new()
            }
        };
        let articles = assemble(articles, &order, query.limit);

        let full = articles.iter().filter(|a| a.enrichment == Enrichment::Full).count();
        let fallback = articles.iter().filter(|a| a.enrichment == Enrichment::Snippet).count();
        info!(topic = %query.topic, articles = articles.len(), full, fallback, "brief assembled");
        Ok(articles)
    }

    /// One enrichment call through the tool registry. Returns `None` on any failure.
    async fn enrich(&self, url: &str) -> Option<String> {
        match self.tools.call(FETCH_ARTICLE_TOOL, json!({ "url": url })).await {
            Ok(value) => match FetchArticleOutput::validate(&value) {
                Ok(output) => output.content,
                Err(reason) => {
                    warn!(%url, %reason, "enrichment output failed shape check; using snippet");
                    None
                }
            },
            Err(e) => {
                warn!(%url, error = %e, "enrichment call rejected; using snippet");
                None
            }
        }
    }

    async fn summarize_all(&self, provider: &Arc<dyn LlmProvider>, articles: &mut [EnrichedArticle]) {
        let texts: Vec<String> = articles.iter().map(|a| a.body_text()).collect();

        let summaries: Vec<Option<Summary>> = stream::iter(texts)
            .map(|text| {
                let provider = provider.clone();
                async move {
                    if text.trim().is_empty() {
                        return None;
                    }
                    Some(summarizer::summarize_article(provider.as_ref(), &text, SUMMARY_MAX_TOKENS).await)
                }
            })
            .buffered(self.max_concurrent)
            .collect()
            .await;

        for (article, summary) in articles.iter_mut().zip(summaries) {
            article.summary = summary;
        }
    }
}

/// Keep the first occurrence of each URL.
fn dedupe_by_url(candidates: Vec<Candidate>) -> Vec<Candidate> {
    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|c| seen.insert(c.url.clone()))
        .collect()
}

/// Apply a proposed order to `articles`.
///
/// Unknown and repeated URLs in `order` are dropped; articles the order leaves
/// out follow in their original order. The result is truncated to `limit`.
pub fn assemble(articles: Vec<EnrichedArticle>, order: &[String], limit: usize) -> Vec<EnrichedArticle> {
    let index: HashMap<String, usize> = articles
        .iter()
        .enumerate()
        .map(|(i, a)| (a.url.clone(), i))
        .collect();
    let mut slots: Vec<Option<EnrichedArticle>> = articles.into_iter().map(Some).collect();

    let mut out = Vec::with_capacity(slots.len());
    for url in order {
        match index.get(url) {
            Some(&i) => {
                if let Some(article) = slots[i].take() {
                    out.push(article);
                }
            }
            None => debug!(%url, "ranking referenced an unknown article; ignoring"),
        }
    }
    out.extend(slots.into_iter().flatten());
    out.truncate(limit);
    out
}
