use serde::{Deserialize, Serialize};

use crate::error::{KnowledgeError, Result};

/// Thin HTTP client over an external vector store. The knowledge engine
/// never speaks the store's native protocol directly — everything goes
/// through this upsert/search/delete surface.
pub struct VectorStoreClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

#[derive(Debug, Serialize)]
struct UpsertRequest {
    id: String,
    vector: Vec<f32>,
    metadata: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct SearchRequest {
    vector: Vec<f32>,
    limit: usize,
}

#[derive(Debug, Deserialize)]
pub struct VectorMatch {
    pub id: String,
    pub score: f32,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    matches: Vec<VectorMatch>,
}

impl VectorStoreClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            token,
        }
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(t) => builder.bearer_auth(t),
            None => builder,
        }
    }

    pub async fn upsert(&self, id: &str, vector: Vec<f32>, metadata: serde_json::Value) -> Result<()> {
        let url = format!("{}/vectors/{id}", self.base_url);
        let req = self
            .authed(self.http.put(&url))
            .json(&UpsertRequest {
                id: id.to_string(),
                vector,
                metadata,
            });
        let resp = req.send().await.map_err(|e| KnowledgeError::VectorStore(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(KnowledgeError::VectorStore(format!(
                "upsert failed with status {}",
                resp.status()
            )));
        }
        Ok(())
    }

    pub async fn search(&self, vector: Vec<f32>, limit: usize) -> Result<Vec<VectorMatch>> {
        let url = format!("{}/vectors/search", self.base_url);
        let resp = self
            .authed(self.http.post(&url))
            .json(&SearchRequest { vector, limit })
            .send()
            .await
            .map_err(|e| KnowledgeError::VectorStore(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(KnowledgeError::VectorStore(format!(
                "search failed with status {}",
                resp.status()
            )));
        }
        let parsed: SearchResponse = resp
            .json()
            .await
            .map_err(|e| KnowledgeError::VectorStore(e.to_string()))?;
        Ok(parsed.matches)
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        let url = format!("{}/vectors/{id}", self.base_url);
        let resp = self
            .authed(self.http.delete(&url))
            .send()
            .await
            .map_err(|e| KnowledgeError::VectorStore(e.to_string()))?;
        if !resp.status().is_success() && resp.status() != reqwest::StatusCode::NOT_FOUND {
            return Err(KnowledgeError::VectorStore(format!(
                "delete failed with status {}",
                resp.status()
            )));
        }
        Ok(())
    }
}
