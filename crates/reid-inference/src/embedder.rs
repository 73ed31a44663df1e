//! Remote embedding model client.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use reid_core::{Embedder, EmbeddingInput, Result};

use crate::client::{encode_image, endpoint, post_json};

const SERVICE: &str = "embedding";

/// One model served by the inference service's `/v1/embed` endpoint.
pub struct RemoteEmbedder {
    base_url: String,
    model: String,
    dimension: usize,
    client: reqwest::Client,
    timeout: Duration,
}

impl RemoteEmbedder {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, dimension: usize) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, model, dimension)
    }

    /// Share a connection pool across several models.
    pub fn with_client(
        client: reqwest::Client,
        base_url: impl Into<String>,
        model: impl Into<String>,
        dimension: usize,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            model: model.into(),
            dimension,
            client,
            timeout: Duration::from_secs(reid_core::defaults::EMBED_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    image: String, // base64 encoded
}

#[derive(Deserialize)]
struct EmbedResponse {
    /// Either a flat vector or a batch-shaped `[[..]]`.
    embedding: JsonValue,
}

#[async_trait]
impl Embedder for RemoteEmbedder {
    async fn embed(&self, crop: &[u8]) -> Result<EmbeddingInput> {
        let request = EmbedRequest {
            model: &self.model,
            image: encode_image(crop),
        };
        let url = endpoint(&self.base_url, "/v1/embed");
        let response: EmbedResponse =
            post_json(&self.client, &url, &request, self.timeout, SERVICE).await?;
        EmbeddingInput::from_json(&response.embedding)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reid_core::Error;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_remote_embedder_new() {
        let embedder = RemoteEmbedder::new("http://localhost:8080", "dinov2-vitl14", 1024);
        assert_eq!(embedder.model_name(), "dinov2-vitl14");
        assert_eq!(embedder.dimension(), 1024);
        assert_eq!(embedder.timeout, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_embed_returns_flat_vector() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embed"))
            .and(body_partial_json(serde_json::json!({"model": "clip-vit-l14"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"embedding": [0.1, 0.2, 0.3]})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let embedder = RemoteEmbedder::new(server.uri(), "clip-vit-l14", 768);
        let out = embedder.embed(b"crop").await.unwrap();
        assert_eq!(out, EmbeddingInput::Flat(vec![0.1, 0.2, 0.3]));
    }

    #[tokio::test]
    async fn test_embed_preserves_nested_shape() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embed"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"embedding": [[0.1, 0.2]]})),
            )
            .mount(&server)
            .await;

        let embedder = RemoteEmbedder::new(server.uri(), "clip-vit-l14", 768);
        let out = embedder.embed(b"crop").await.unwrap();
        assert_eq!(out.rank(), 2);
    }

    #[tokio::test]
    async fn test_embed_maps_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let embedder = RemoteEmbedder::new(server.uri(), "clip-vit-l14", 768);
        let err = embedder.embed(b"crop").await.unwrap_err();
        match err {
            Error::ExternalService { service, message } => {
                assert_eq!(service, "embedding");
                assert!(message.contains("503"));
            }
            other => panic!("expected ExternalService, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_embed_maps_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"embedding": [1.0]}))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let embedder = RemoteEmbedder::new(server.uri(), "clip-vit-l14", 768)
            .with_timeout(Duration::from_millis(50));
        let err = embedder.embed(b"crop").await.unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
    }
}
