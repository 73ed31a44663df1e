//! Shared JSON-over-HTTP plumbing for the remote collaborators.

use std::time::{Duration, Instant};

use base64::Engine;
use serde::de::DeserializeOwned;
use serde::Serialize;

use reid_core::{Error, Result};

/// Base64-encode image bytes for a JSON payload.
pub fn encode_image(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Decode a base64 image field from a response.
pub fn decode_image(encoded: &str, service: &str) -> Result<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| Error::external(service, format!("invalid base64 image: {}", e)))
}

/// Join a base URL and a path without doubling slashes.
pub fn endpoint(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// POST `body` as JSON and decode the JSON response.
///
/// Maps a client-side deadline to [`Error::Timeout`] and every other failure
/// (connect, non-2xx, undecodable body) to [`Error::ExternalService`].
pub async fn post_json<Req, Resp>(
    client: &reqwest::Client,
    url: &str,
    body: &Req,
    timeout: Duration,
    service: &str,
) -> Result<Resp>
where
    Req: Serialize + ?Sized,
    Resp: DeserializeOwned,
{
    let start = Instant::now();
    let response = client
        .post(url)
        .json(body)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| map_send_error(e, timeout, service))?;

    if !response.status().is_success() {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        return Err(Error::external(
            service,
            format!("HTTP {}: {}", status, text),
        ));
    }

    let parsed = response
        .json::<Resp>()
        .await
        .map_err(|e| map_send_error(e, timeout, service))?;

    tracing::debug!(
        subsystem = "inference",
        component = service,
        op = "post",
        url,
        duration_ms = start.elapsed().as_millis() as u64,
        "Remote call completed"
    );
    Ok(parsed)
}

fn map_send_error(e: reqwest::Error, timeout: Duration, service: &str) -> Error {
    if e.is_timeout() {
        Error::Timeout {
            service: service.to_string(),
            secs: timeout.as_secs(),
        }
    } else if e.is_decode() {
        Error::external(service, format!("failed to parse response: {}", e))
    } else {
        Error::external(service, format!("request failed: {}", e))
    }
}
