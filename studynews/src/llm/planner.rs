// Enrichment planning. The flow re-validates whatever a planner returns.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;

use super::{extract_json_from_text, LlmProvider, LlmRequest};
use crate::flow::EnrichedArticle;
use crate::search::Candidate;
use crate::tools::{ToolDefinition, FETCH_ARTICLE_TOOL};

#[async_trait::async_trait]
pub trait EnrichmentPlanner: Send + Sync {
    fn name(&self) -> &str;

    /// Indices into `candidates` that should be enriched with full content.
    async fn select(&self, topic: &str, candidates: &[Candidate]) -> Result<Vec<usize>>;

    /// Article URLs in presentation order. Defaults to the order given.
    async fn rank(&self, _topic: &str, articles: &[EnrichedArticle]) -> Result<Vec<String>> {
        Ok(articles.iter().map(|a| a.url.clone()).collect())
    }
}

/// Enrich every candidate.
pub struct EnrichAll;

#[async_trait::async_trait]
impl EnrichmentPlanner for EnrichAll {
    fn name(&self) -> &str {
        "all"
    }

    async fn select(&self, _topic: &str, candidates: &[Candidate]) -> Result<Vec<usize>> {
        Ok((0..candidates.len()).collect())
    }
}

/// Enrich nothing; the brief is built from snippets only.
pub struct EnrichNone;

#[async_trait::async_trait]
impl EnrichmentPlanner for EnrichNone {
    fn name(&self) -> &str {
        "none"
    }

    async fn select(&self, _topic: &str, _candidates: &[Candidate]) -> Result<Vec<usize>> {
        Ok(Vec::new())
    }
}

/// Enrich candidates whose snippet is too short to stand on its own.
pub struct ShortSnippetPlanner {
    pub min_snippet_chars: usize,
}

#[async_trait::async_trait]
impl EnrichmentPlanner for ShortSnippetPlanner {
    fn name(&self) -> &str {
        "short_snippet"
    }

    async fn select(&self, _topic: &str, candidates: &[Candidate]) -> Result<Vec<usize>> {
        Ok(candidates
            .iter()
            .enumerate()
            .filter(|(_, c)| c.snippet.chars().count() < self.min_snippet_chars)
            .map(|(i, _)| i)
            .collect())
    }
}

/// Lets the model decide which articles to fetch (via tool calls) and how to order them.
pub struct ModelPlanner {
    provider: Arc<dyn LlmProvider>,
    tools: Vec<ToolDefinition>,
}

#[derive(Debug, Deserialize)]
struct PlanJson {
    #[serde(default)]
    tool_calls: Vec<ToolCallJson>,
}

#[derive(Debug, Deserialize)]
struct ToolCallJson {
    name: String,
    #[serde(default)]
    arguments: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct OrderJson {
    order: Vec<String>,
}

impl ModelPlanner {
    pub fn new(provider: Arc<dyn LlmProvider>, tools: Vec<ToolDefinition>) -> Self {
        Self { provider, tools }
    }

    fn select_prompt(&self, topic: &str, candidates: &[Candidate]) -> Result<String> {
        let tools = serde_json::to_string_pretty(&self.tools).context("failed to serialize tool definitions")?;

        let mut prompt = String::new();
        prompt.push_str(&format!("You are curating news for a student studying \"{}\".\n", topic));
        prompt.push_str("You may call these tools:\n");
        prompt.push_str(&tools);
        prompt.push_str("\n\nCandidate articles:\n");
        for (i, c) in candidates.iter().enumerate() {
            prompt.push_str(&format!("{}. {}\n   url: {}\n   snippet: {}\n", i + 1, c.title, c.url, c.snippet));
        }
        prompt.push_str(&format!(
            "\nCall `{}` only for articles whose snippet is too thin to summarize.\n",
            FETCH_ARTICLE_TOOL
        ));
        prompt.push_str("Respond with strict JSON and nothing else:\n");
        prompt.push_str("{\"tool_calls\": [{\"name\": \"<tool name>\", \"arguments\": {\"url\": \"<article url>\"}}]}\n");
        prompt.push_str("Use an empty list when no article needs more content.\n");
        Ok(prompt)
    }

    fn rank_prompt(topic: &str, articles: &[EnrichedArticle]) -> String {
        let mut prompt = String::new();
        prompt.push_str(&format!(
            "Order these articles by how useful they are to a student studying \"{}\" (most useful first).\n\n",
            topic
        ));
        for a in articles {
            let gist = a
                .summary
                .as_ref()
                .map(|s| s.headline.clone())
                .unwrap_or_else(|| a.snippet.chars().take(300).collect());
            prompt.push_str(&format!("- url: {}\n  title: {}\n  gist: {}\n", a.url, a.title, gist));
        }
        prompt.push_str("\nRespond with strict JSON and nothing else: {\"order\": [\"<url>\", ...]}\n");
        prompt
    }
}

#[async_trait::async_trait]
impl EnrichmentPlanner for ModelPlanner {
    fn name(&self) -> &str {
        "model"
    }

    async fn select(&self, topic: &str, candidates: &[Candidate]) -> Result<Vec<usize>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let request = LlmRequest {
            temperature: Some(0.0),
            ..LlmRequest::new(self.select_prompt(topic, candidates)?)
        };
        let response = self.provider.generate(request).await.context("planner model call failed")?;

        let json = extract_json_from_text(&response.content).context("no JSON in planner response")?;
        let plan: PlanJson = serde_json::from_str(&json).context("planner response is not a tool-call plan")?;

        let mut seen = HashSet::new();
        let mut selected = Vec::new();
        for call in plan.tool_calls {
            if call.name != FETCH_ARTICLE_TOOL {
                debug!(tool = %call.name, "planner requested an unknown tool; ignoring");
                continue;
            }
            let Some(url) = call.arguments.get("url").and_then(|u| u.as_str()) else {
                debug!("planner tool call without a url; ignoring");
                continue;
            };
            match candidates.iter().position(|c| c.url == url) {
                Some(i) if seen.insert(i) => selected.push(i),
                Some(_) => {}
                None => debug!(%url, "planner asked for a URL that is not a candidate; ignoring"),
            }
        }
        Ok(selected)
    }

    async fn rank(&self, topic: &str, articles: &[EnrichedArticle]) -> Result<Vec<String>> {
        if articles.len() < 2 {
            return Ok(articles.iter().map(|a| a.url.clone()).collect());
        }

        let request = LlmRequest {
            temperature: Some(0.0),
            ..LlmRequest::new(Self::rank_prompt(topic, articles))
        };
        let response = self.provider.generate(request).await.context("ranking model call failed")?;

        let json = extract_json_from_text(&response.content).context("no JSON in ranking response")?;
        let order: OrderJson = serde_json::from_str(&json).context("ranking response has no `order` list")?;
        Ok(order.order)
    }
}
