// Schema-described tools exposed to the model planner

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::validation::ValidationError;

pub mod fetch_article;

pub use fetch_article::{FetchArticleInput, FetchArticleOutput, FetchArticleTool, FETCH_ARTICLE_TOOL};

/// How a tool is registered with the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
    pub output_schema: serde_json::Value,
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("invalid tool input: {0}")]
    Validation(#[from] ValidationError),

    #[error("tool `{name}` produced output that violates its schema: {reason}")]
    InvalidOutput { name: String, reason: String },

    #[error("unknown tool `{0}`")]
    UnknownTool(String),
}

#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    /// Validate `args`, run the tool, and return output that matches the
    /// declared output contract.
    async fn invoke(&self, args: serde_json::Value) -> Result<serde_json::Value, ToolError>;
}

/// Tools addressable by name.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.definition().name;
        self.tools.insert(name, tool);
    }

    pub fn with(mut self, tool: Arc<dyn Tool>) -> Self {
        self.register(tool);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.definition()).collect()
    }

    pub async fn call(&self, name: &str, args: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        tool.invoke(args).await
    }
}
