use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{Tool, ToolDefinition, ToolError};
use crate::scraping::ContentFetcher;
use crate::validation::{ArticleUrl, ValidationError};

/// Stable tool name; the model refers to the tool by it.
pub const FETCH_ARTICLE_TOOL: &str = "fetchFullArticleContent";

/// Validated tool input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchArticleInput {
    pub url: ArticleUrl,
}

impl FetchArticleInput {
    /// Accepts exactly `{ "url": "<absolute http(s) URL>" }`.
    pub fn validate(args: &Value) -> Result<Self, ValidationError> {
        let obj = args.as_object().ok_or(ValidationError::NotAnObject)?;
        if let Some(extra) = obj.keys().find(|k| k.as_str() != "url") {
            return Err(ValidationError::UnexpectedField(extra.clone()));
        }
        let raw = obj.get("url").ok_or(ValidationError::MissingField("url"))?;
        let raw = raw.as_str().ok_or(ValidationError::WrongType {
            field: "url",
            expected: "a string",
        })?;
        Ok(Self {
            url: ArticleUrl::parse(raw)?,
        })
    }
}

/// Tool output: `{ "content": string | null }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchArticleOutput {
    pub content: Option<String>,
}

impl FetchArticleOutput {
    /// Shape check for a serialized output value.
    pub fn validate(value: &Value) -> Result<Self, String> {
        let obj = value.as_object().ok_or("output is not an object")?;
        if obj.len() != 1 {
            return Err(format!("output must have exactly one field, found {}", obj.len()));
        }
        match obj.get("content") {
            Some(Value::Null) => Ok(Self { content: None }),
            Some(Value::String(s)) => Ok(Self { content: Some(s.clone()) }),
            Some(_) => Err("`content` must be a string or null".to_string()),
            None => Err("missing `content`".to_string()),
        }
    }
}

pub struct FetchArticleTool {
    fetcher: Arc<ContentFetcher>,
}

impl FetchArticleTool {
    pub fn new(fetcher: Arc<ContentFetcher>) -> Self {
        Self { fetcher }
    }

    /// Typed entry point used by the flow; skips the JSON round trip.
    pub async fn fetch(&self, input: &FetchArticleInput) -> FetchArticleOutput {
        FetchArticleOutput {
            content: self.fetcher.fetch(&input.url).await.into_content(),
        }
    }
}

#[async_trait::async_trait]
impl Tool for FetchArticleTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: FETCH_ARTICLE_TOOL.to_string(),
            description: "Fetch the full readable content of a news article as HTML. \
                          Use it when a search snippet is too short to summarize the article."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "url": {
                        "type": "string",
                        "format": "uri",
                        "description": "Absolute http(s) URL of the article"
                    }
                },
                "required": ["url"],
                "additionalProperties": false
            }),
            output_schema: json!({
                "type": "object",
                "properties": {
                    "content": {
                        "type": ["string", "null"],
                        "description": "Main article HTML, or null when it could not be extracted"
                    }
                },
                "required": ["content"],
                "additionalProperties": false
            }),
        }
    }

    async fn invoke(&self, args: Value) -> Result<Value, ToolError> {
        let input = FetchArticleInput::validate(&args)?;
        let output = self.fetch(&input).await;

        let value = serde_json::to_value(&output).map_err(|e| ToolError::InvalidOutput {
            name: FETCH_ARTICLE_TOOL.to_string(),
            reason: e.to_string(),
        })?;
        FetchArticleOutput::validate(&value).map_err(|reason| ToolError::InvalidOutput {
            name: FETCH_ARTICLE_TOOL.to_string(),
            reason,
        })?;
        Ok(value)
    }
}
