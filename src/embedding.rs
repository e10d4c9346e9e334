//! Embedding provider abstraction and implementations.
//!
//! Defines the [`EmbeddingProvider`] capability and concrete backends for
//! OpenAI, Voyage, Gemini, and Ollama. All backends share the same retry
//! strategy:
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry with backoff
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, ... capped at 2^5
//!
//! Empty batches are rejected as non-retryable before any request is made.
//!
//! Also provides vector utilities shared with the SQLite store:
//! [`cosine_similarity`], [`vec_to_blob`], and [`blob_to_vec`].

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::{EmbeddingConfig, EmbeddingProviderKind};
use crate::error::{EngineError, Result};

/// Capability interface for embedding backends.
///
/// `dimension()` must be finite and positive before any `embed*` call;
/// the factory guarantees this by resolving the dimension at construction.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Stable provider tag used in telemetry and collection-compatibility
    /// checks (e.g. `"openai"`).
    fn provider_id(&self) -> &str;

    /// Model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;

    /// Declared vector length; every returned vector has exactly this many
    /// floats.
    fn dimension(&self) -> u32;

    /// Embed a batch of texts; result length equals input length, in order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text (e.g. a search query).
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| EngineError::embedding_permanent("empty embedding response"))
    }
}

/// Create the provider selected by the configuration, resolving the default
/// model and the vector dimension.
///
/// # Errors
///
/// `InvalidConfig` when the model is unknown to the provider and
/// `EMBEDDING_DIMENSION` is not set, or when a required API key is missing.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingProvider>> {
    let model = config
        .model
        .clone()
        .unwrap_or_else(|| default_model(config.provider).to_string());

    let dimension = match config.dimension {
        Some(d) => d,
        None => known_dimension(config.provider, &model).ok_or_else(|| {
            EngineError::InvalidConfig(format!(
                "unknown model '{}' for provider '{}'; set EMBEDDING_DIMENSION",
                model,
                config.provider.as_str()
            ))
        })?,
    };

    let http = HttpClient::new(config)?;

    Ok(match config.provider {
        EmbeddingProviderKind::OpenAi => Box::new(OpenAiProvider {
            api_key: require_env("OPENAI_API_KEY")?,
            model,
            dimension,
            http,
        }),
        EmbeddingProviderKind::Voyage => Box::new(VoyageProvider {
            api_key: require_env("VOYAGEAI_API_KEY")?,
            model,
            dimension,
            http,
        }),
        EmbeddingProviderKind::Gemini => Box::new(GeminiProvider {
            api_key: require_env("GEMINI_API_KEY")?,
            model,
            dimension,
            http,
        }),
        EmbeddingProviderKind::Ollama => Box::new(OllamaProvider {
            base_url: std::env::var("OLLAMA_HOST")
                .unwrap_or_else(|_| "http://localhost:11434".to_string()),
            model,
            dimension,
            http,
        }),
    })
}

/// Provider-specific default model, matching each vendor's recommended
/// code-embedding model.
pub fn default_model(provider: EmbeddingProviderKind) -> &'static str {
    match provider {
        EmbeddingProviderKind::OpenAi => "text-embedding-3-small",
        EmbeddingProviderKind::Voyage => "voyage-code-3",
        EmbeddingProviderKind::Gemini => "gemini-embedding-001",
        EmbeddingProviderKind::Ollama => "nomic-embed-text",
    }
}

/// Dimension table for well-known models. Unknown models require an
/// explicit `EMBEDDING_DIMENSION`.
pub fn known_dimension(provider: EmbeddingProviderKind, model: &str) -> Option<u32> {
    let dim = match (provider, model) {
        (EmbeddingProviderKind::OpenAi, "text-embedding-3-small") => 1536,
        (EmbeddingProviderKind::OpenAi, "text-embedding-3-large") => 3072,
        (EmbeddingProviderKind::OpenAi, "text-embedding-ada-002") => 1536,
        (EmbeddingProviderKind::Voyage, "voyage-code-3") => 1024,
        (EmbeddingProviderKind::Voyage, "voyage-3") => 1024,
        (EmbeddingProviderKind::Voyage, "voyage-3-lite") => 512,
        (EmbeddingProviderKind::Voyage, "voyage-code-2") => 1536,
        (EmbeddingProviderKind::Gemini, "gemini-embedding-001") => 3072,
        (EmbeddingProviderKind::Gemini, "text-embedding-004") => 768,
        (EmbeddingProviderKind::Ollama, "nomic-embed-text") => 768,
        (EmbeddingProviderKind::Ollama, "mxbai-embed-large") => 1024,
        (EmbeddingProviderKind::Ollama, "all-minilm") => 384,
        _ => return None,
    };
    Some(dim)
}

fn require_env(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| EngineError::InvalidConfig(format!("{} environment variable not set", name)))
}

// ============ Shared HTTP transport ============

/// Thin wrapper over `reqwest` carrying the retry policy.
struct HttpClient {
    client: reqwest::Client,
    max_retries: u32,
}

impl HttpClient {
    fn new(config: &EmbeddingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EngineError::embedding_permanent(format!("http client: {}", e)))?;
        Ok(Self {
            client,
            max_retries: config.max_retries,
        })
    }

    /// POST a JSON body with retry/backoff, returning the parsed response.
    async fn post_json(
        &self,
        url: &str,
        headers: &[(&str, String)],
        body: &Value,
    ) -> Result<Value> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let mut request = self.client.post(url).json(body);
            for (name, value) in headers {
                request = request.header(*name, value.as_str());
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return response.json::<Value>().await.map_err(|e| {
                            EngineError::embedding_permanent(format!("invalid response: {}", e))
                        });
                    }

                    let body_text = response.text().await.unwrap_or_default();

                    // Rate limited or server error — retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(EngineError::embedding_retryable(format!(
                            "API error {}: {}",
                            status, body_text
                        )));
                        continue;
                    }

                    // Client error (not 429) — don't retry
                    return Err(EngineError::embedding_permanent(format!(
                        "API error {}: {}",
                        status, body_text
                    )));
                }
                Err(e) => {
                    last_err = Some(EngineError::embedding_retryable(e.to_string()));
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| EngineError::embedding_retryable("embedding failed after retries")))
    }
}

fn reject_empty_batch(texts: &[String]) -> Result<()> {
    if texts.is_empty() {
        return Err(EngineError::embedding_permanent("empty embedding batch"));
    }
    Ok(())
}

/// Parse an OpenAI-compatible `{"data":[{"embedding":[...]}]}` response.
fn parse_data_embeddings(json: &Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| EngineError::embedding_permanent("response missing data array"))?;

    let mut embeddings = Vec::with_capacity(data.len());
    for item in data {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| EngineError::embedding_permanent("response missing embedding"))?;
        embeddings.push(values_to_vec(embedding));
    }
    Ok(embeddings)
}

fn values_to_vec(values: &[Value]) -> Vec<f32> {
    values
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect()
}

// ============ OpenAI ============

/// `POST https://api.openai.com/v1/embeddings` with bearer auth.
struct OpenAiProvider {
    api_key: String,
    model: String,
    dimension: u32,
    http: HttpClient,
}

#[async_trait]
impl EmbeddingProvider for OpenAiProvider {
    fn provider_id(&self) -> &str {
        "openai"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> u32 {
        self.dimension
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        reject_empty_batch(texts)?;
        let body = serde_json::json!({ "model": self.model, "input": texts });
        let json = self
            .http
            .post_json(
                "https://api.openai.com/v1/embeddings",
                &[("Authorization", format!("Bearer {}", self.api_key))],
                &body,
            )
            .await?;
        parse_data_embeddings(&json)
    }
}

// ============ Voyage ============

/// `POST https://api.voyageai.com/v1/embeddings`; same response shape as
/// OpenAI.
struct VoyageProvider {
    api_key: String,
    model: String,
    dimension: u32,
    http: HttpClient,
}

#[async_trait]
impl EmbeddingProvider for VoyageProvider {
    fn provider_id(&self) -> &str {
        "voyage"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> u32 {
        self.dimension
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        reject_empty_batch(texts)?;
        let body = serde_json::json!({ "model": self.model, "input": texts });
        let json = self
            .http
            .post_json(
                "https://api.voyageai.com/v1/embeddings",
                &[("Authorization", format!("Bearer {}", self.api_key))],
                &body,
            )
            .await?;
        parse_data_embeddings(&json)
    }
}

// ============ Gemini ============

/// `POST .../models/{model}:batchEmbedContents` on the Generative Language
/// API. The response is `{"embeddings":[{"values":[...]}]}`.
struct GeminiProvider {
    api_key: String,
    model: String,
    dimension: u32,
    http: HttpClient,
}

#[async_trait]
impl EmbeddingProvider for GeminiProvider {
    fn provider_id(&self) -> &str {
        "gemini"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> u32 {
        self.dimension
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        reject_empty_batch(texts)?;
        let requests: Vec<Value> = texts
            .iter()
            .map(|text| {
                serde_json::json!({
                    "model": format!("models/{}", self.model),
                    "content": { "parts": [{ "text": text }] }
                })
            })
            .collect();
        let body = serde_json::json!({ "requests": requests });
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:batchEmbedContents?key={}",
            self.model, self.api_key
        );
        let json = self.http.post_json(&url, &[], &body).await?;

        let embeddings = json
            .get("embeddings")
            .and_then(|e| e.as_array())
            .ok_or_else(|| EngineError::embedding_permanent("response missing embeddings"))?;

        embeddings
            .iter()
            .map(|item| {
                item.get("values")
                    .and_then(|v| v.as_array())
                    .map(|v| values_to_vec(v))
                    .ok_or_else(|| EngineError::embedding_permanent("response missing values"))
            })
            .collect()
    }
}

// ============ Ollama ============

/// `POST {host}/api/embed` against a local Ollama server. The response is
/// `{"embeddings":[[...], ...]}`.
struct OllamaProvider {
    base_url: String,
    model: String,
    dimension: u32,
    http: HttpClient,
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn provider_id(&self) -> &str {
        "ollama"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> u32 {
        self.dimension
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        reject_empty_batch(texts)?;
        let body = serde_json::json!({ "model": self.model, "input": texts });
        let url = format!("{}/api/embed", self.base_url.trim_end_matches('/'));
        let json = self.http.post_json(&url, &[], &body).await?;

        let embeddings = json
            .get("embeddings")
            .and_then(|e| e.as_array())
            .ok_or_else(|| EngineError::embedding_permanent("response missing embeddings"))?;

        Ok(embeddings
            .iter()
            .map(|row| values_to_vec(row.as_array().map(|a| a.as_slice()).unwrap_or(&[])))
            .collect())
    }
}

// ============ Vector utilities ============

/// Encode a float vector as a BLOB (little-endian f32 bytes).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`; `0.0` for empty or mismatched
/// vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// Map a cosine similarity to `[0.0, 1.0]` for threshold comparison.
pub fn normalized_similarity(cosine: f64) -> f64 {
    (cosine + 1.0) / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        let blob = vec_to_blob(&vec);
        assert_eq!(blob.len(), 20);
        assert_eq!(blob_to_vec(&blob), vec);
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_mismatched_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_normalized_similarity_range() {
        assert!((normalized_similarity(1.0) - 1.0).abs() < 1e-9);
        assert!((normalized_similarity(-1.0)).abs() < 1e-9);
        assert!((normalized_similarity(0.0) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_default_models() {
        assert_eq!(
            default_model(EmbeddingProviderKind::OpenAi),
            "text-embedding-3-small"
        );
        assert_eq!(default_model(EmbeddingProviderKind::Voyage), "voyage-code-3");
    }

    #[test]
    fn test_known_dimensions() {
        assert_eq!(
            known_dimension(EmbeddingProviderKind::OpenAi, "text-embedding-3-small"),
            Some(1536)
        );
        assert_eq!(
            known_dimension(EmbeddingProviderKind::Ollama, "nomic-embed-text"),
            Some(768)
        );
        assert_eq!(
            known_dimension(EmbeddingProviderKind::OpenAi, "my-custom-model"),
            None
        );
    }

    #[test]
    fn test_parse_data_embeddings() {
        let json = serde_json::json!({
            "data": [
                { "embedding": [0.1, 0.2] },
                { "embedding": [0.3, 0.4] }
            ]
        });
        let vecs = parse_data_embeddings(&json).unwrap();
        assert_eq!(vecs.len(), 2);
        assert!((vecs[1][0] - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_parse_missing_data() {
        let json = serde_json::json!({ "error": "nope" });
        assert!(parse_data_embeddings(&json).is_err());
    }
}
