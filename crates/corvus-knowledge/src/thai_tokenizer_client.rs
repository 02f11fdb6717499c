use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

/// Thin HTTP client over the Thai tokenizer sidecar. Degrades to whitespace
/// tokenisation on any failure, logging the fallback exactly once per
/// process so a down sidecar doesn't spam the logs on every chunking pass.
pub struct ThaiTokenizerClient {
    http: reqwest::Client,
    base_url: String,
    warned: AtomicBool,
}

#[derive(Debug, Serialize)]
struct TokenizeRequest<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenizeResponse {
    tokens: Vec<String>,
}

impl ThaiTokenizerClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            warned: AtomicBool::new(false),
        }
    }

    /// Tokenise `text`. On any sidecar failure, falls back to whitespace
    /// splitting so callers always get a usable token list.
    pub async fn tokenize(&self, text: &str) -> Vec<String> {
        match self.try_tokenize(text).await {
            Ok(tokens) => tokens,
            Err(_) if self.warned.swap(true, Ordering::Relaxed) => whitespace_fallback(text),
            Err(e) => {
                tracing::warn!("thai tokenizer sidecar unavailable, falling back to whitespace splitting: {e}");
                whitespace_fallback(text)
            }
        }
    }

    async fn try_tokenize(&self, text: &str) -> anyhow::Result<Vec<String>> {
        let url = format!("{}/tokenize", self.base_url);
        let resp = self
            .http
            .post(&url)
            .json(&TokenizeRequest { text })
            .send()
            .await?;
        if !resp.status().is_success() {
            anyhow::bail!("tokenize failed with status {}", resp.status());
        }
        let parsed: TokenizeResponse = resp.json().await?;
        Ok(parsed.tokens)
    }
}

fn whitespace_fallback(text: &str) -> Vec<String> {
    text.split_whitespace().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitespace_fallback_splits_on_whitespace() {
        let tokens = whitespace_fallback("hello   world\nfoo");
        assert_eq!(tokens, vec!["hello", "world", "foo"]);
    }
}
