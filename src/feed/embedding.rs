//! Embedding service client — consumed strictly as text → vector.

use reqwest::Client;
use serde::{Deserialize, Serialize};

use async_trait::async_trait;

use crate::config::EmbeddingSettings;
use crate::error::{SyncError, SyncResult};

/// Text-to-vector provider contract. `max_batch` is the provider-declared
/// ceiling; the embeddings syncer batches to it.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> SyncResult<Vec<Vec<f32>>>;
    fn max_batch(&self) -> usize;
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedEntry>,
}

#[derive(Deserialize)]
struct EmbedEntry {
    embedding: Vec<f32>,
}

pub struct HttpEmbedder {
    client: Client,
    settings: EmbeddingSettings,
}

impl HttpEmbedder {
    pub fn new(settings: EmbeddingSettings) -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .map_err(|e| SyncError::ConfigError(format!("http client: {e}")))?;
        Ok(Self { client, settings })
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, texts: &[String]) -> SyncResult<Vec<Vec<f32>>> {
        let resp = self
            .client
            .post(&self.settings.api_url)
            .bearer_auth(&self.settings.api_key)
            .json(&EmbedRequest { input: texts })
            .send()
            .await?;

        let status = resp.status();
        if status.as_u16() == 429 {
            return Err(SyncError::RateLimited);
        }
        if status.is_server_error() {
            return Err(SyncError::UpstreamUnavailable(format!(
                "embedding service returned {status}"
            )));
        }
        if !status.is_success() {
            return Err(SyncError::Unknown(format!(
                "embedding service returned {status}"
            )));
        }

        let body: EmbedResponse = resp
            .json()
            .await
            .map_err(|e| SyncError::SchemaDrift(format!("embedding response: {e}")))?;
        if body.data.len() != texts.len() {
            return Err(SyncError::SchemaDrift(format!(
                "embedding service answered {} vectors for {} inputs",
                body.data.len(),
                texts.len()
            )));
        }
        Ok(body.data.into_iter().map(|e| e.embedding).collect())
    }

    fn max_batch(&self) -> usize {
        self.settings.max_batch
    }
}

/// Pack a vector into the little-endian f32 blob stored in `news_articles`.
pub fn vector_to_blob(v: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(v.len() * 4);
    for x in v {
        out.extend_from_slice(&x.to_le_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_blob_is_little_endian_f32() {
        let blob = vector_to_blob(&[1.0, -2.5]);
        assert_eq!(blob.len(), 8);
        assert_eq!(&blob[0..4], &1.0f32.to_le_bytes());
        assert_eq!(&blob[4..8], &(-2.5f32).to_le_bytes());
    }
}
