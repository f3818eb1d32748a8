//! Shared HTTP plumbing for the remote API clients.
//!
//! Both the inventory client and the spreadsheet client talk JSON over
//! reqwest. This module owns URL normalisation, client construction and the
//! mapping from transport/status failures to [`ApiError`] messages an
//! operator can act on.

use reqwest::{Client, Response, StatusCode};
use serde_json::Value;
use std::time::Duration;

use crate::error::ApiError;

/// Default timeout for API requests (30 seconds).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// URL normalisation
// ---------------------------------------------------------------------------

/// Normalise a base URL:
/// - strip trailing slashes
/// - ensure a scheme is present (https, or http for localhost)
pub fn normalize_base_url(url: &str) -> String {
    let mut url = url.trim().to_string();

    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    while url.ends_with('/') {
        url.pop();
    }

    url
}

/// Build a reqwest client with the given request timeout.
pub fn build_client(service: &'static str, timeout: Duration) -> Result<Client, ApiError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ApiError::Request {
            service,
            message: format!("Failed to create HTTP client: {e}"),
        })
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// Convert a `reqwest::Error` into an [`ApiError`] with a readable message.
pub fn transport_error(service: &'static str, url: &str, err: &reqwest::Error) -> ApiError {
    if err.is_connect() {
        return ApiError::Connect {
            service,
            url: url.to_string(),
        };
    }
    if err.is_timeout() {
        return ApiError::Timeout {
            service,
            url: url.to_string(),
        };
    }
    if err.is_builder() {
        return ApiError::Request {
            service,
            message: format!("Invalid URL: {url}"),
        };
    }
    ApiError::Request {
        service,
        message: err.to_string(),
    }
}

/// Convert an HTTP status code into a readable message.
pub fn status_message(service: &str, status: StatusCode) -> String {
    match status.as_u16() {
        401 => format!("{service} credentials are invalid or expired"),
        403 => format!("{service} denied access"),
        404 => format!("{service} endpoint not found"),
        429 => format!("{service} is rate limiting requests"),
        s if s >= 500 => format!("{service} server error"),
        _ => format!("Unexpected response from {service}"),
    }
}

/// Read a response body as JSON, turning non-success statuses into
/// [`ApiError::Status`] with whatever detail the body carries.
pub async fn read_json(service: &'static str, resp: Response) -> Result<Value, ApiError> {
    let status = resp.status();
    let body_text = resp.text().await.unwrap_or_default();

    if !status.is_success() {
        let fallback = status_message(service, status);
        let message = serde_json::from_str::<Value>(&body_text)
            .ok()
            .and_then(|json| error_detail(&json))
            .map(|detail| format!("{fallback}: {detail}"))
            .or_else(|| {
                let trimmed = body_text.trim();
                (!trimmed.is_empty()).then(|| format!("{fallback}: {trimmed}"))
            })
            .unwrap_or(fallback);
        return Err(ApiError::Status {
            service,
            status: status.as_u16(),
            message,
        });
    }

    if body_text.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&body_text).map_err(|e| ApiError::Decode {
        service,
        message: e.to_string(),
    })
}

/// Pull a human-readable message out of an error body.
///
/// Google APIs nest it as `{"error": {"message": ..}}`; the inventory API
/// returns a list of `{"Exception": ..}` objects or a flat `message`.
fn error_detail(json: &Value) -> Option<String> {
    if let Some(message) = json
        .get("error")
        .and_then(|e| e.get("message").or(Some(e)))
        .and_then(Value::as_str)
    {
        return Some(message.to_string());
    }
    if let Some(message) = json.get("message").and_then(Value::as_str) {
        return Some(message.to_string());
    }
    json.as_array()
        .and_then(|items| items.first())
        .and_then(|first| first.get("Exception"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Exponential backoff for HTTP 429 retries: 500ms, 1s, 2s, ... capped at 8s.
pub fn retry_delay(attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1);
    let multiplier = 2_u64.saturating_pow(exponent).min(16);
    Duration::from_millis(500 * multiplier)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(
            normalize_base_url("inventory.dearsystems.com/ExternalApi/v2/"),
            "https://inventory.dearsystems.com/ExternalApi/v2"
        );
        assert_eq!(normalize_base_url("localhost:8080//"), "http://localhost:8080");
        assert_eq!(
            normalize_base_url("  https://sheets.googleapis.com "),
            "https://sheets.googleapis.com"
        );
    }

    #[test]
    fn test_status_messages() {
        assert_eq!(
            status_message("Google Sheets", StatusCode::UNAUTHORIZED),
            "Google Sheets credentials are invalid or expired"
        );
        assert_eq!(
            status_message("inventory API", StatusCode::BAD_GATEWAY),
            "inventory API server error"
        );
    }

    #[test]
    fn test_error_detail_shapes() {
        let google = serde_json::json!({
            "error": { "code": 400, "message": "Unable to parse range" }
        });
        assert_eq!(error_detail(&google).as_deref(), Some("Unable to parse range"));

        let dear = serde_json::json!([{ "ErrorCode": 400, "Exception": "Sale not found" }]);
        assert_eq!(error_detail(&dear).as_deref(), Some("Sale not found"));

        let flat = serde_json::json!({ "message": "nope" });
        assert_eq!(error_detail(&flat).as_deref(), Some("nope"));

        assert_eq!(error_detail(&serde_json::json!({ "ok": true })), None);
    }

    #[test]
    fn test_retry_delay_backs_off_and_caps() {
        assert_eq!(retry_delay(1), Duration::from_millis(500));
        assert_eq!(retry_delay(2), Duration::from_millis(1000));
        assert_eq!(retry_delay(3), Duration::from_millis(2000));
        assert_eq!(retry_delay(10), Duration::from_millis(8000));
    }
}
