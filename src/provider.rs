//! Embedding provider boundary.
//!
//! Providers turn text into fixed-length vectors. They do not normalise;
//! the encoder does that for every caller.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::{EmbeddingSettings, Number, ProviderKind};

pub trait EmbeddingProvider: Send + Sync {
    /// Stable identifier for the model behind this provider. Persisted with
    /// the index so a model change forces a rebuild.
    fn embedder_id(&self) -> &str;
    /// One vector per input text, in input order.
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<Number>>>;
}

impl<P: EmbeddingProvider + ?Sized> EmbeddingProvider for Box<P> {
    fn embedder_id(&self) -> &str {
        (**self).embedder_id()
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<Number>>> {
        (**self).embed(texts)
    }
}

/// Builds the provider named in the settings.
pub fn provider_from_settings(settings: &EmbeddingSettings) -> Result<Box<dyn EmbeddingProvider>> {
    match settings.provider {
        ProviderKind::Hashing => Ok(Box::new(HashingEmbedder::new(settings.dimensions))),
        ProviderKind::Http => Ok(Box::new(HttpEmbeddingProvider::new(
            &settings.base_url,
            &settings.model,
            settings.timeout(),
        )?)),
    }
}

/// Blocking client for Ollama-compatible `POST /api/embed` endpoints.
///
/// Requests time out after the configured duration and are never retried
/// here; the caller decides on retry policy.
#[derive(Clone)]
pub struct HttpEmbeddingProvider {
    client: Client,
    endpoint: String,
    model: String,
    id: String,
}

impl HttpEmbeddingProvider {
    pub fn new(base_url: &str, model: &str, timeout: Duration) -> Result<Self> {
        anyhow::ensure!(!model.trim().is_empty(), "missing embedding model name");
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build embedding HTTP client")?;
        let endpoint = format!("{}/api/embed", base_url.trim_end_matches('/'));
        Ok(Self {
            client,
            endpoint,
            model: model.to_string(),
            id: format!("http:{}", model),
        })
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<Number>>,
}

impl EmbeddingProvider for HttpEmbeddingProvider {
    fn embedder_id(&self) -> &str {
        &self.id
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<Number>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let request = EmbedRequest {
            model: &self.model,
            input: texts,
        };
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .with_context(|| format!("POST {} failed", self.endpoint))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp
                .text()
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            anyhow::bail!("embedding request failed ({}): {}", status, body);
        }

        let parsed: EmbedResponse = resp
            .json()
            .context("failed to parse embedding response")?;
        Ok(parsed.embeddings)
    }
}

/// Deterministic bag-of-words embedder using signed feature hashing.
///
/// Tokens are lower-cased alphanumeric runs; each adds ±1 to a bucket chosen
/// by its SHA-256 digest. Texts sharing words point in similar directions,
/// which is enough for offline runs and tests. Text with no tokens, or whose
/// tokens cancel out in a shared bucket, hashes the empty token so the output
/// is never the zero vector.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
    id: String,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            id: format!("hashing:sha256:d{}", dimensions),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed_one(&self, text: &str) -> Vec<Number> {
        let mut vector = vec![0.0; self.dimensions];
        let lowered = text.to_lowercase();
        let tokens = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty());

        for token in tokens {
            self.accumulate(&mut vector, token);
        }
        if vector.iter().all(|x| *x == 0.0) {
            self.accumulate(&mut vector, "");
        }
        vector
    }

    fn accumulate(&self, vector: &mut [Number], token: &str) {
        let digest = Sha256::digest(token.as_bytes());
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        let bucket = (u64::from_le_bytes(head) % self.dimensions as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign;
    }
}

impl EmbeddingProvider for HashingEmbedder {
    fn embedder_id(&self) -> &str {
        &self.id
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<Number>>> {
        anyhow::ensure!(self.dimensions > 0, "hashing embedder needs a positive dimension");
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn hashing_is_deterministic_and_case_insensitive() {
        let embedder = HashingEmbedder::new(64);
        let out = embedder
            .embed(&texts(&["Pension Scheme", "pension scheme!", "loan"]))
            .unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].len(), 64);
        assert_eq!(out[0], out[1]);
        assert_ne!(out[0], out[2]);
    }

    #[test]
    fn blank_text_is_not_the_zero_vector() {
        let embedder = HashingEmbedder::new(32);
        let out = embedder.embed(&texts(&["", "   "])).unwrap();
        assert!(out[0].iter().any(|x| *x != 0.0));
        assert_eq!(out[0], out[1]);
    }

    #[test]
    fn cancelling_tokens_do_not_yield_the_zero_vector() {
        // "w17" and "w20" land in bucket 128 at d=384 with opposite signs.
        let embedder = HashingEmbedder::new(384);
        let out = embedder.embed(&texts(&["w17 w20", ""])).unwrap();
        assert!(out[0].iter().any(|x| *x != 0.0));
        assert_eq!(out[0], out[1]);
    }

    #[test]
    fn embedder_id_carries_dimension() {
        assert_eq!(HashingEmbedder::new(384).embedder_id(), "hashing:sha256:d384");
    }

    #[test]
    fn http_provider_reports_unreachable_endpoint() {
        // Port 9 (discard) on localhost is not an HTTP server.
        let provider =
            HttpEmbeddingProvider::new("http://127.0.0.1:9", "m", Duration::from_millis(200)).unwrap();
        assert!(provider.embed(&texts(&["hello"])).is_err());
        assert_eq!(provider.embedder_id(), "http:m");
    }

    #[test]
    fn http_provider_rejects_blank_model() {
        assert!(HttpEmbeddingProvider::new("http://localhost", " ", Duration::from_secs(1)).is_err());
    }
}
