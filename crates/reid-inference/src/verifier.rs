//! Remote pairwise visual verifier.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use reid_core::{Result, VisualVerifier};

use crate::client::{encode_image, endpoint, post_json};

/// Verifier answering `/v1/verify` with a same-individual score.
pub struct RemoteVisualVerifier {
    base_url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl RemoteVisualVerifier {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
            timeout: Duration::from_secs(reid_core::defaults::VERIFY_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Serialize)]
struct VerifyRequest {
    image: String, // base64 encoded
    item_id: Uuid,
}

#[derive(Deserialize)]
struct VerifyResponse {
    score: f32,
}

#[async_trait]
impl VisualVerifier for RemoteVisualVerifier {
    async fn verify(&self, crop: &[u8], item_id: Uuid) -> Result<f32> {
        let url = endpoint(&self.base_url, "/v1/verify");
        let response: VerifyResponse = post_json(
            &self.client,
            &url,
            &VerifyRequest {
                image: encode_image(crop),
                item_id,
            },
            self.timeout,
            "visual_verifier",
        )
        .await?;
        Ok(response.score.clamp(0.0, 1.0))
    }
}
