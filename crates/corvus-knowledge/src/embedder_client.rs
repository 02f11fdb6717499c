use serde::{Deserialize, Serialize};

use crate::error::{KnowledgeError, Result};

/// Thin HTTP client over the configured embedding model endpoint.
pub struct EmbedderClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

impl EmbedderClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            model: model.into(),
        }
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/embeddings", self.base_url);
        let resp = self
            .http
            .post(&url)
            .json(&EmbedRequest {
                model: &self.model,
                input: text,
            })
            .send()
            .await
            .map_err(|e| KnowledgeError::Embedder(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(KnowledgeError::Embedder(format!(
                "embed failed with status {}",
                resp.status()
            )));
        }
        let parsed: EmbedResponse = resp
            .json()
            .await
            .map_err(|e| KnowledgeError::Embedder(e.to_string()))?;
        Ok(parsed.embedding)
    }
}
