// Request boundary used by the HTTP server and the CLI

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use common::{BriefConfig, Config, LlmAdapter, PlannerKind, Readiness};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::flow::{EnrichedArticle, FlowError, NewsFlow};
use crate::llm::planner::{EnrichAll, EnrichNone, EnrichmentPlanner, ModelPlanner, ShortSnippetPlanner};
use crate::llm::remote::RemoteLlmProvider;
use crate::llm::LlmProvider;
use crate::scraping::ContentFetcher;
use crate::search::{FeedSearchSource, SearchQuery};
use crate::tools::{FetchArticleTool, ToolDefinition, ToolError, ToolRegistry};
use crate::validation::ValidationError;

const MAX_TOPIC_CHARS: usize = 200;
const MAX_CATEGORY_CHARS: usize = 64;
const MAX_LIMIT: i64 = 50;

/// Raw brief request as received from a caller.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TopicRequest {
    pub topic: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
}

impl TopicRequest {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            ..Self::default()
        }
    }

    /// Turn the request into a search query, applying `default_limit` when none is given.
    pub fn validate(&self, default_limit: usize) -> Result<SearchQuery, ValidationError> {
        let topic = self.topic.trim();
        let topic_chars = topic.chars().count();
        if topic_chars == 0 {
            return Err(ValidationError::OutOfRange {
                field: "topic",
                reason: "must not be empty".to_string(),
            });
        }
        if topic_chars > MAX_TOPIC_CHARS {
            return Err(ValidationError::OutOfRange {
                field: "topic",
                reason: format!("must be at most {} characters", MAX_TOPIC_CHARS),
            });
        }

        let category = match self.category.as_deref().map(str::trim) {
            None => None,
            Some(c) if c.is_empty() || c.chars().count() > MAX_CATEGORY_CHARS => {
                return Err(ValidationError::OutOfRange {
                    field: "category",
                    reason: format!("must be 1 to {} characters", MAX_CATEGORY_CHARS),
                });
            }
            Some(c) => Some(c.to_string()),
        };

        let limit = match self.limit {
            None => default_limit.min(MAX_LIMIT as usize),
            Some(n) if (1..=MAX_LIMIT).contains(&n) => n as usize,
            Some(_) => {
                return Err(ValidationError::OutOfRange {
                    field: "limit",
                    reason: format!("must be between 1 and {}", MAX_LIMIT),
                });
            }
        };

        Ok(SearchQuery {
            topic: topic.to_string(),
            category,
            limit,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BriefResponse {
    pub topic: String,
    pub category: Option<String>,
    pub generated_at: DateTime<Utc>,
    pub planner: String,
    pub articles: Vec<EnrichedArticle>,
}

impl BriefResponse {
    /// Outgoing shape check.
    pub fn check(&self, limit: usize) -> Result<(), String> {
        if self.articles.len() > limit {
            return Err(format!("{} articles exceed the limit of {}", self.articles.len(), limit));
        }
        let mut seen = HashSet::new();
        for article in &self.articles {
            if article.title.trim().is_empty() {
                return Err(format!("article {} has an empty title", article.url));
            }
            if article.url.trim().is_empty() {
                return Err("article with an empty url".to_string());
            }
            if !seen.insert(article.url.as_str()) {
                return Err(format!("duplicate article {}", article.url));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum ActionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("service is not ready: {}", .0.join("; "))]
    NotReady(Vec<String>),

    #[error(transparent)]
    Acquisition(#[from] FlowError),

    #[error("response failed its shape check: {0}")]
    InvalidResponse(String),

    #[error("unknown tool `{0}`")]
    UnknownTool(String),
}

impl ActionError {
    pub fn kind(&self) -> &'static str {
        match self {
            ActionError::Validation(_) => "validation",
            ActionError::NotReady(_) => "not_ready",
            ActionError::Acquisition(_) => "acquisition",
            ActionError::InvalidResponse(_) => "invalid_response",
            ActionError::UnknownTool(_) => "unknown_tool",
        }
    }
}

impl From<ToolError> for ActionError {
    fn from(e: ToolError) -> Self {
        match e {
            ToolError::Validation(v) => ActionError::Validation(v),
            ToolError::InvalidOutput { name, reason } => ActionError::InvalidResponse(format!("{}: {}", name, reason)),
            ToolError::UnknownTool(name) => ActionError::UnknownTool(name),
        }
    }
}

pub struct NewsActions {
    flow: Option<NewsFlow>,
    readiness: Readiness,
    default_limit: usize,
}

impl NewsActions {
    pub fn new(flow: NewsFlow, readiness: Readiness, default_limit: usize) -> Self {
        Self {
            flow: Some(flow),
            readiness,
            default_limit,
        }
    }

    /// Boundary that refuses every request; used when startup checks failed.
    pub fn not_ready(readiness: Readiness) -> Self {
        Self {
            flow: None,
            readiness,
            default_limit: BriefConfig::default().default_limit,
        }
    }

    /// Wire up providers, tools and the planner from configuration.
    pub fn from_config(config: &Config, readiness: Readiness) -> Result<Self> {
        if !readiness.is_serving() {
            warn!(issues = ?readiness.issues(), "configuration not ready; requests will be refused");
            return Ok(Self::not_ready(readiness));
        }

        let fetcher = ContentFetcher::from_config(&config.fetch)?;
        let tools = ToolRegistry::new().with(Arc::new(FetchArticleTool::new(Arc::new(fetcher))));
        let source = FeedSearchSource::new(&config.search, &config.fetch.user_agent)?;

        let llm: Option<Arc<dyn LlmProvider>> = match config.llm.adapter {
            LlmAdapter::Remote => match RemoteLlmProvider::from_config(&config.llm) {
                Ok(provider) => {
                    info!(model = provider.model(), url = %config.llm.api_url, "LLM provider initialized");
                    Some(Arc::new(provider))
                }
                Err(e) => {
                    warn!(error = %e, "LLM provider unavailable; using heuristic planning");
                    None
                }
            },
            LlmAdapter::None => None,
        };

        let planner = select_planner(&config.brief, llm.as_ref(), tools.definitions());
        info!(planner = planner.name(), "enrichment planner selected");

        let mut flow = NewsFlow::new(Arc::new(source), tools, planner)
            .with_max_concurrent(config.brief.max_concurrent_fetches);
        if config.brief.summarize {
            match llm {
                Some(provider) => flow = flow.with_summarizer(provider),
                None => warn!("brief.summarize is set but no LLM provider is available; summaries disabled"),
            }
        }

        Ok(Self::new(flow, readiness, config.brief.default_limit))
    }

    pub fn readiness(&self) -> &Readiness {
        &self.readiness
    }

    fn ready_flow(&self) -> Result<&NewsFlow, ActionError> {
        match (&self.readiness, &self.flow) {
            (Readiness::NotReady(issues), _) => Err(ActionError::NotReady(issues.clone())),
            (_, None) => Err(ActionError::NotReady(self.readiness.issues().to_vec())),
            (_, Some(flow)) => Ok(flow),
        }
    }

    pub async fn brief(&self, request: TopicRequest) -> Result<BriefResponse, ActionError> {
        let flow = self.ready_flow()?;
        let query = request.validate(self.default_limit)?;

        let span = info_span!("brief", request_id = %Uuid::new_v4(), topic = %query.topic);
        async move {
            let articles = flow.run(&query).await?;

            let response = BriefResponse {
                topic: query.topic.clone(),
                category: query.category.clone(),
                generated_at: Utc::now(),
                planner: flow.planner_name().to_string(),
                articles,
            };
            response.check(query.limit).map_err(ActionError::InvalidResponse)?;
            Ok(response)
        }
        .instrument(span)
        .await
    }

    /// Direct access to the article tool, `{ "url": .. }` in, `{ "content": .. }` out.
    pub async fn fetch_article(&self, args: serde_json::Value) -> Result<serde_json::Value, ActionError> {
        let flow = self.ready_flow()?;
        let span = info_span!("fetch_article", request_id = %Uuid::new_v4());
        flow.tools()
            .call(crate::tools::FETCH_ARTICLE_TOOL, args)
            .instrument(span)
            .await
            .map_err(ActionError::from)
    }

    pub fn tools(&self) -> Vec<ToolDefinition> {
        self.flow
            .as_ref()
            .map(|flow| flow.tools().definitions())
            .unwrap_or_default()
    }
}

fn select_planner(
    brief: &BriefConfig,
    llm: Option<&Arc<dyn LlmProvider>>,
    tools: Vec<ToolDefinition>,
) -> Arc<dyn EnrichmentPlanner> {
    let short = || -> Arc<dyn EnrichmentPlanner> {
        Arc::new(ShortSnippetPlanner {
            min_snippet_chars: brief.min_snippet_chars,
        })
    };

    match (brief.planner, llm) {
        (PlannerKind::Model | PlannerKind::Auto, Some(provider)) => Arc::new(ModelPlanner::new(provider.clone(), tools)),
        (PlannerKind::Model, None) => {
            warn!("model planner requested without an LLM provider; using the short-snippet planner");
            short()
        }
        (PlannerKind::Auto | PlannerKind::ShortSnippet, _) => short(),
        (PlannerKind::All, _) => Arc::new(EnrichAll),
        (PlannerKind::None, _) => Arc::new(EnrichNone),
    }
}
