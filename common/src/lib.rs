/*!
common/src/lib.rs

Shared configuration types for studynews.

This file provides:
- Config data structures (deserialized from TOML, every section optional)
- An async loader that merges a default file with an override file
- The startup readiness check consumed by the request boundary
*/

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// HTTP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub address: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

/// Which engine extracts the readable body of an article page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractorKind {
    /// Download the page and run readability locally
    Readability,
    /// Delegate to a hosted parser service (`parser_endpoint`)
    ParserService,
}

/// Article content fetching configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub extractor: ExtractorKind,
    pub parser_endpoint: Option<String>,
    pub timeout_seconds: u64,
    pub retry_on_timeout: bool,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            extractor: ExtractorKind::Readability,
            parser_endpoint: None,
            timeout_seconds: 10,
            retry_on_timeout: true,
            user_agent: "StudyNews/0.1.0".to_string(),
        }
    }
}

/// Candidate acquisition (news search feed) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Feed URL with a `{query}` placeholder, substituted URL-encoded
    pub feed_url_template: String,
    pub timeout_seconds: u64,
    pub max_candidates: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            feed_url_template: "https://news.google.com/rss/search?q={query}&hl=en-US&gl=US&ceid=US:en"
                .to_string(),
            timeout_seconds: 10,
            max_candidates: 20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmAdapter {
    Remote,
    None,
}

/// Remote LLM configuration (OpenAI-compatible chat completions endpoint)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub adapter: LlmAdapter,
    pub api_url: String,
    /// Name of the environment variable holding the API key
    pub api_key_env: String,
    pub model: String,
    pub timeout_seconds: u64,
    pub max_tokens: usize,
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            adapter: LlmAdapter::None,
            api_url: "http://localhost:11434/v1/chat/completions".to_string(),
            api_key_env: "STUDYNEWS_LLM_API_KEY".to_string(),
            model: "gpt-4o-mini".to_string(),
            timeout_seconds: 30,
            max_tokens: 500,
            temperature: 0.3,
        }
    }
}

impl LlmConfig {
    /// Read the API key from the configured environment variable.
    pub fn resolve_api_key(&self) -> Result<String> {
        std::env::var(&self.api_key_env)
            .with_context(|| format!("LLM API key env var '{}' not set", self.api_key_env))
    }
}

/// How the brief decides which candidates get full-content enrichment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlannerKind {
    /// Model planner when an LLM is available, short-snippet heuristic otherwise
    Auto,
    Model,
    ShortSnippet,
    All,
    None,
}

/// News brief orchestration configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BriefConfig {
    pub default_limit: usize,
    pub max_concurrent_fetches: usize,
    pub min_snippet_chars: usize,
    pub summarize: bool,
    pub planner: PlannerKind,
}

impl Default for BriefConfig {
    fn default() -> Self {
        Self {
            default_limit: 10,
            max_concurrent_fetches: 8,
            min_snippet_chars: 200,
            summarize: false,
            planner: PlannerKind::Auto,
        }
    }
}

/// Top-level application configuration (deserialized from config.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub fetch: FetchConfig,
    pub search: SearchConfig,
    pub llm: LlmConfig,
    pub brief: BriefConfig,
}

impl Config {
    /// Load configuration from a TOML file asynchronously.
    ///
    /// Example:
    ///   let cfg = Config::from_file("config.toml").await?;
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = tokio::fs::read_to_string(path.as_ref())
            .await
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let cfg: Config = toml::from_str(&data).context("Failed to parse TOML configuration")?;
        Ok(cfg)
    }

    /// Load configuration with an optional default file and an optional override file.
    /// If both are present, they are merged (override takes precedence). Missing files
    /// are skipped, so with neither present the built-in defaults are returned.
    pub async fn load_with_defaults(default_path: Option<&Path>, override_path: Option<&Path>) -> Result<Self> {
        let mut config_value = toml::Value::Table(toml::map::Map::new());

        for path in [default_path, override_path].into_iter().flatten() {
            if !path.exists() {
                continue;
            }
            let data = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let val: toml::Value = toml::from_str(&data)
                .with_context(|| format!("Failed to parse configuration: {}", path.display()))?;
            merge_toml(&mut config_value, val);
        }

        let cfg: Config = config_value.try_into().context("Failed to parse merged configuration")?;
        Ok(cfg)
    }

    /// Validate the configuration against the process environment.
    pub fn readiness(&self) -> Readiness {
        self.readiness_with(|name| std::env::var(name).ok())
    }

    /// Validate the configuration, resolving environment variables through `env`.
    ///
    /// Hard problems (the service cannot answer a brief) make the result `NotReady`;
    /// a missing LLM credential only degrades it, since planning and summaries
    /// have non-model fallbacks.
    pub fn readiness_with<F>(&self, env: F) -> Readiness
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut blocking = Vec::new();
        let mut degraded = Vec::new();

        if !self.search.feed_url_template.contains("{query}") {
            blocking.push("search.feed_url_template must contain a {query} placeholder".to_string());
        } else if url::Url::parse(&self.search.feed_url_template.replace("{query}", "probe")).is_err() {
            blocking.push(format!(
                "search.feed_url_template is not a valid URL: {}",
                self.search.feed_url_template
            ));
        }
        if self.search.timeout_seconds == 0 {
            blocking.push("search.timeout_seconds must be greater than zero".to_string());
        }
        if self.fetch.timeout_seconds == 0 {
            blocking.push("fetch.timeout_seconds must be greater than zero".to_string());
        }
        if self.fetch.extractor == ExtractorKind::ParserService {
            match self.fetch.parser_endpoint.as_deref() {
                None => blocking.push("fetch.extractor = \"parser_service\" requires fetch.parser_endpoint".to_string()),
                Some(endpoint) if url::Url::parse(endpoint).is_err() => {
                    blocking.push(format!("fetch.parser_endpoint is not a valid URL: {}", endpoint))
                }
                Some(_) => {}
            }
        }
        if self.brief.max_concurrent_fetches == 0 {
            blocking.push("brief.max_concurrent_fetches must be greater than zero".to_string());
        }
        if self.brief.default_limit == 0 {
            blocking.push("brief.default_limit must be greater than zero".to_string());
        }

        if self.llm.adapter == LlmAdapter::Remote {
            if self.llm.timeout_seconds == 0 {
                blocking.push("llm.timeout_seconds must be greater than zero".to_string());
            }
            if env(&self.llm.api_key_env).map_or(true, |v| v.trim().is_empty()) {
                degraded.push(format!(
                    "LLM API key env var '{}' is not set; model planning and summaries are disabled",
                    self.llm.api_key_env
                ));
            }
        } else if self.brief.planner == PlannerKind::Model {
            degraded.push("brief.planner = \"model\" but llm.adapter is \"none\"; using the short-snippet planner".to_string());
        }

        if !blocking.is_empty() {
            blocking.extend(degraded);
            Readiness::NotReady(blocking)
        } else if !degraded.is_empty() {
            Readiness::Degraded(degraded)
        } else {
            Readiness::Ready
        }
    }
}

/// Outcome of the startup configuration check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "issues", rename_all = "snake_case")]
pub enum Readiness {
    Ready,
    /// Serving, with optional features turned off
    Degraded(Vec<String>),
    /// Requests must be refused
    NotReady(Vec<String>),
}

impl Readiness {
    pub fn is_serving(&self) -> bool {
        !matches!(self, Readiness::NotReady(_))
    }

    pub fn issues(&self) -> &[String] {
        match self {
            Readiness::Ready => &[],
            Readiness::Degraded(issues) | Readiness::NotReady(issues) => issues,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Readiness::Ready => "ready",
            Readiness::Degraded(_) => "degraded",
            Readiness::NotReady(_) => "not_ready",
        }
    }
}

fn merge_toml(a: &mut toml::Value, b: toml::Value) {
    match (a, b) {
        (toml::Value::Table(a_map), toml::Value::Table(b_map)) => {
            for (k, v) in b_map {
                if let Some(a_val) = a_map.get_mut(&k) {
                    merge_toml(a_val, v);
                } else {
                    a_map.insert(k, v);
                }
            }
        }
        (a_val, b_val) => *a_val = b_val,
    }
}
