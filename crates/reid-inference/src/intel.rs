//! Remote web-intelligence and report-generation clients.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use reid_core::{ReportGenerator, Result, WebIntelReport, WebIntelligence};

use crate::client::{endpoint, post_json};

/// Web search service answering `/v1/search`.
pub struct RemoteWebIntelligence {
    base_url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl RemoteWebIntelligence {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
            timeout: Duration::from_secs(reid_core::defaults::WEB_INTEL_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
}

#[async_trait]
impl WebIntelligence for RemoteWebIntelligence {
    async fn search(&self, query: &str) -> Result<WebIntelReport> {
        let url = endpoint(&self.base_url, "/v1/search");
        post_json(
            &self.client,
            &url,
            &SearchRequest { query },
            self.timeout,
            "web_intel",
        )
        .await
    }
}

/// Report writer answering `/v1/report`.
pub struct RemoteReportGenerator {
    base_url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl RemoteReportGenerator {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
            timeout: Duration::from_secs(reid_core::defaults::REPORT_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Serialize)]
struct ReportRequest<'a> {
    findings: &'a JsonValue,
    audience: &'a str,
}

#[derive(Deserialize)]
struct ReportResponse {
    report: String,
}

#[async_trait]
impl ReportGenerator for RemoteReportGenerator {
    async fn generate(&self, findings: &JsonValue, audience: &str) -> Result<String> {
        let url = endpoint(&self.base_url, "/v1/report");
        let response: ReportResponse = post_json(
            &self.client,
            &url,
            &ReportRequest { findings, audience },
            self.timeout,
            "report",
        )
        .await?;
        Ok(response.report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_web_intel_search() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/search"))
            .and(body_json(serde_json::json!({"query": "snow leopard Hemis"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "summary": "Photographed near Hemis National Park in 2023.",
                "citations": [{"title": "Field notes", "uri": "https://example.org/notes"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let intel = RemoteWebIntelligence::new(server.uri());
        let report = intel.search("snow leopard Hemis").await.unwrap();
        assert!(report.summary.contains("Hemis"));
        assert_eq!(report.citations.len(), 1);
        assert_eq!(report.citations[0].uri, "https://example.org/notes");
    }

    #[tokio::test]
    async fn test_report_generate() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/report"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"report": "One known individual."})),
            )
            .mount(&server)
            .await;

        let generator = RemoteReportGenerator::new(server.uri());
        let text = generator
            .generate(&serde_json::json!({"subjects": 1}), "researcher")
            .await
            .unwrap();
        assert_eq!(text, "One known individual.");
    }

    #[tokio::test]
    async fn test_report_missing_field_is_external_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let generator = RemoteReportGenerator::new(server.uri());
        let err = generator
            .generate(&serde_json::json!({}), "public")
            .await
            .unwrap_err();
        assert!(err.is_external());
    }
}
