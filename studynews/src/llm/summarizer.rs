// Summarizer module
use tracing::{info, warn};

use super::{LlmProvider, Summary, UsageMetadata};

/// Generate a summary with fallback to an extractive one when the model fails
pub async fn summarize_article<P: LlmProvider + ?Sized>(
    provider: &P,
    article_text: &str,
    max_tokens: usize,
) -> Summary {
    match provider.summarize(article_text, max_tokens).await {
        Ok(summary) => {
            info!(
                "LLM summarization successful: {} bullets, {} tokens",
                summary.bullets.len(),
                summary.usage.total_tokens
            );
            summary
        }
        Err(e) => {
            warn!("LLM summarization failed: {}, falling back to extractive summary", e);
            extractive_summary(article_text)
        }
    }
}

/// Fallback extractive summary when LLM fails
pub fn extractive_summary(text: &str) -> Summary {
    let sentences: Vec<&str> = text
        .split(['.', '!', '?'])
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect();

    let headline = sentences
        .first()
        .map(|s| truncate(s, 100))
        .unwrap_or_else(|| "No content".to_string());

    let bullets = sentences
        .iter()
        .skip(1)
        .take(4)
        .map(|s| truncate(s, 200))
        .collect();

    Summary {
        headline,
        bullets,
        extractive: true,
        usage: UsageMetadata::default(),
    }
}

/// Char-boundary-safe truncation with a trailing ellipsis
fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_chars - 3).collect();
        format!("{}...", kept)
    }
}
