use crate::embeddings::VectorProvider;
use crate::error::ProviderError;
use crate::models::Embedding;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use url::Url;

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1/";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-ada-002";

const BACKEND: &str = "openai";

pub struct OpenAiEmbedder {
    endpoint: Url,
    model: String,
    api_key: Option<String>,
    client: Client,
}

impl OpenAiEmbedder {
    pub fn new(
        base_url: &str,
        model: impl Into<String>,
        api_key: Option<String>,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            endpoint: embeddings_endpoint(base_url)?,
            model: model.into(),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            client: Client::new(),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl VectorProvider for OpenAiEmbedder {
    fn name(&self) -> &str {
        BACKEND
    }

    async fn embed(&self, text: &str) -> Result<Embedding, ProviderError> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            ProviderError::NotConfigured("an API key is required for openai embeddings".to_string())
        })?;

        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(api_key)
            .json(&json!({
                "input": text,
                "model": self.model,
            }))
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.trim().parse().ok())
                .unwrap_or(60);
            return Err(ProviderError::RateLimited { retry_after_secs });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::BackendResponse {
                backend: BACKEND.to_string(),
                details: format!("{status}: {body}"),
            });
        }

        let parsed: Value = response.json().await?;
        parse_embedding_response(&parsed)
    }
}

fn embeddings_endpoint(base_url: &str) -> Result<Url, ProviderError> {
    let mut base = base_url.trim().to_string();
    if !base.ends_with('/') {
        base.push('/');
    }
    Ok(Url::parse(&base)?.join("embeddings")?)
}

fn parse_embedding_response(payload: &Value) -> Result<Embedding, ProviderError> {
    let values = payload
        .pointer("/data/0/embedding")
        .and_then(Value::as_array)
        .ok_or_else(|| ProviderError::BackendResponse {
            backend: BACKEND.to_string(),
            details: "response contained no embedding".to_string(),
        })?;

    values
        .iter()
        .map(|value| {
            value
                .as_f64()
                .map(|number| number as f32)
                .ok_or_else(|| ProviderError::BackendResponse {
                    backend: BACKEND.to_string(),
                    details: format!("non-numeric embedding component: {value}"),
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_is_joined_with_or_without_trailing_slash() -> Result<(), ProviderError> {
        assert_eq!(
            embeddings_endpoint("https://api.openai.com/v1")?.as_str(),
            "https://api.openai.com/v1/embeddings"
        );
        assert_eq!(
            embeddings_endpoint("http://localhost:8080/v1/")?.as_str(),
            "http://localhost:8080/v1/embeddings"
        );
        Ok(())
    }

    #[test]
    fn malformed_base_url_is_rejected() {
        assert!(matches!(
            OpenAiEmbedder::new("not a url", DEFAULT_EMBEDDING_MODEL, None),
            Err(ProviderError::Url(_))
        ));
    }

    #[test]
    fn embedding_is_read_from_first_data_item() -> Result<(), ProviderError> {
        let payload = json!({
            "data": [{ "embedding": [0.5, -1.0, 0.25], "index": 0 }],
            "model": DEFAULT_EMBEDDING_MODEL,
        });
        assert_eq!(parse_embedding_response(&payload)?, vec![0.5, -1.0, 0.25]);
        Ok(())
    }

    #[test]
    fn empty_data_is_a_backend_error() {
        let payload = json!({ "data": [] });
        assert!(matches!(
            parse_embedding_response(&payload),
            Err(ProviderError::BackendResponse { .. })
        ));
    }

    #[test]
    fn non_numeric_component_is_a_backend_error() {
        let payload = json!({ "data": [{ "embedding": [0.1, "x"] }] });
        assert!(matches!(
            parse_embedding_response(&payload),
            Err(ProviderError::BackendResponse { .. })
        ));
    }

    #[tokio::test]
    async fn missing_api_key_fails_without_a_request() -> Result<(), ProviderError> {
        let embedder =
            OpenAiEmbedder::new(DEFAULT_OPENAI_BASE_URL, DEFAULT_EMBEDDING_MODEL, Some("  ".into()))?;
        let result = embedder.embed("hello").await;
        assert!(matches!(result, Err(ProviderError::NotConfigured(_))));
        Ok(())
    }
}
