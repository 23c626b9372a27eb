use anyhow::{Context, Result};
use common::LlmConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{LlmProvider, LlmRequest, LlmResponse, Summary, UsageMetadata};

/// Remote LLM provider using OpenAI-compatible HTTP API
pub struct RemoteLlmProvider {
    base_url: String,
    api_key: String,
    model: String,
    default_timeout: Duration,
    default_max_tokens: usize,
    default_temperature: f32,
    client: reqwest::Client,
}

impl RemoteLlmProvider {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            default_timeout: Duration::from_secs(30),
            default_max_tokens: 500,
            default_temperature: 0.3,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_defaults(
        mut self,
        timeout_secs: u64,
        max_tokens: usize,
        temperature: f32,
    ) -> Self {
        self.default_timeout = Duration::from_secs(timeout_secs);
        self.default_max_tokens = max_tokens;
        self.default_temperature = temperature;
        self
    }

    /// Build from the `[llm]` section, reading the key from its env var.
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let api_key = config.resolve_api_key()?;
        Ok(Self::new(&config.api_url, api_key, &config.model).with_defaults(
            config.timeout_seconds,
            config.max_tokens,
            config.temperature,
        ))
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait::async_trait]
impl LlmProvider for RemoteLlmProvider {
    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse> {
        let timeout = request
            .timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout);

        let req_body = ChatRequest {
            model: self.model.clone(),
            messages: vec![Message {
                role: "user".to_string(),
                content: request.prompt,
            }],
            max_tokens: Some(request.max_tokens.unwrap_or(self.default_max_tokens)),
            temperature: Some(request.temperature.unwrap_or(self.default_temperature)),
        };

        let response = tokio::time::timeout(
            timeout,
            self.client
                .post(&self.base_url)
                .bearer_auth(&self.api_key)
                .json(&req_body)
                .send(),
        )
        .await
        .context("LLM request timed out")?
        .context("LLM HTTP request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("LLM API error {}: {}", status, body);
        }

        let resp_body: ChatResponse = tokio::time::timeout(timeout, response.json())
            .await
            .context("LLM request timed out")?
            .context("Failed to parse LLM response")?;

        let choice = resp_body
            .choices
            .into_iter()
            .next()
            .context("LLM response has no choices")?;

        let usage = resp_body.usage.unwrap_or_default();
        Ok(LlmResponse {
            content: choice.message.content,
            usage: UsageMetadata {
                prompt_tokens: usage.prompt_tokens.unwrap_or(0),
                completion_tokens: usage.completion_tokens.unwrap_or(0),
                total_tokens: usage.total_tokens.unwrap_or(0),
            },
            model: resp_body.model.unwrap_or_else(|| self.model.clone()),
        })
    }

    async fn summarize(&self, content: &str, max_tokens: usize) -> Result<Summary> {
        let prompt = format!(
            r#"You are helping a student keep up with the news. Summarize the article below.

IMPORTANT INSTRUCTIONS:
1. Ignore markup and navigation text; summarize only the article itself
2. Capture the key facts from the whole article, not just the first lines
3. Keep the original language of the article

OUTPUT FORMAT (strict JSON):
{{
  "headline": "one-line summary (max 100 chars)",
  "bullets": ["key point 1", "key point 2", "key point 3"]
}}

Use 2-5 bullet points.

ARTICLE:
{}
"#,
            content
        );

        let request = LlmRequest {
            prompt,
            max_tokens: Some(max_tokens),
            temperature: Some(0.3),
            timeout_seconds: None,
        };

        let response = self.generate(request).await?;

        let cleaned_json = super::extract_json_from_text(&response.content)
            .context("No valid JSON found in LLM summary response")?;

        let summary_data: SummaryJson = serde_json::from_str(&cleaned_json)
            .with_context(|| format!("Failed to parse LLM summary as JSON. Input was: {}", cleaned_json))?;

        Ok(Summary {
            headline: summary_data.headline,
            bullets: summary_data.bullets,
            extractive: false,
            usage: response.usage,
        })
    }
}

// OpenAI API request/response structures
#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    model: Option<String>,
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Default, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: Option<usize>,
    #[serde(default)]
    completion_tokens: Option<usize>,
    #[serde(default)]
    total_tokens: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct SummaryJson {
    headline: String,
    #[serde(default)]
    bullets: Vec<String>,
}
