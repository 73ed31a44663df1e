//! Remote animal detector client.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use reid_core::{BoundingBox, DetectedSubject, Detector, Result};

use crate::client::{decode_image, encode_image, endpoint, post_json};

const SERVICE: &str = "detection";

/// Detector served by the inference service's `/v1/detect` endpoint.
pub struct RemoteDetector {
    base_url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl RemoteDetector {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client,
            timeout: Duration::from_secs(reid_core::defaults::DETECT_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Serialize)]
struct DetectRequest {
    image: String, // base64 encoded
}

#[derive(Deserialize)]
struct DetectResponse {
    #[serde(default)]
    detections: Vec<Detection>,
}

#[derive(Deserialize)]
struct Detection {
    bbox: BoundingBox,
    confidence: f32,
    #[serde(default)]
    species: Option<String>,
    /// Base64 crop; the service always returns one per detection.
    crop: String,
}

#[async_trait]
impl Detector for RemoteDetector {
    async fn detect(&self, image: &[u8]) -> Result<Vec<DetectedSubject>> {
        let request = DetectRequest {
            image: encode_image(image),
        };
        let url = endpoint(&self.base_url, "/v1/detect");
        let response: DetectResponse =
            post_json(&self.client, &url, &request, self.timeout, SERVICE).await?;

        response
            .detections
            .into_iter()
            .enumerate()
            .map(|(index, d)| {
                Ok(DetectedSubject {
                    index,
                    bbox: d.bbox,
                    confidence: d.confidence.clamp(0.0, 1.0),
                    species: d.species,
                    crop: decode_image(&d.crop, SERVICE)?,
                })
            })
            .collect()
    }
}
