use async_trait::async_trait;
use rondo_core::{EngineError, EngineResult};
use std::collections::HashMap;
use std::time::Duration;

/// A fully-translated vendor request, ready to send.
#[derive(Debug, Clone, PartialEq)]
pub struct VendorRequest {
    /// Absolute request URL.
    pub url: String,
    /// Request headers beyond content-type.
    pub headers: Vec<(String, String)>,
    /// JSON request body.
    pub body: serde_json::Value,
}

/// Sends vendor requests. The seam the retry controller wraps and the
/// orchestrator tests mock.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Submits the request, returning the parsed JSON response body.
    async fn send(&self, request: &VendorRequest) -> EngineResult<serde_json::Value>;
}

/// HTTP transport over a shared `reqwest` client.
///
/// The client (and its connection pool) is safe to share across
/// sessions; the transport holds no per-session state.
pub struct HttpTransport {
    http: reqwest::Client,
    timeout: Duration,
}

impl HttpTransport {
    /// Creates a transport with the given request timeout.
    pub fn new(http: reqwest::Client, timeout: Duration) -> Self {
        Self { http, timeout }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &VendorRequest) -> EngineResult<serde_json::Value> {
        let mut builder = self
            .http
            .post(&request.url)
            .timeout(self.timeout)
            .header("content-type", "application/json");
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }

        let response = builder.json(&request.body).send().await.map_err(|e| {
            if e.is_timeout() {
                EngineError::Transient(format!("request timeout: {e}"))
            } else {
                EngineError::Transient(format!("connection error: {e}"))
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| EngineError::Transient(format!("invalid response body: {e}")));
        }

        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|s| (k.as_str().to_ascii_lowercase(), s.to_string()))
            })
            .collect();
        let body = response.text().await.unwrap_or_default();

        Err(classify_status(status.as_u16(), &headers, &body))
    }
}

/// Maps an HTTP failure status onto the error taxonomy.
pub fn classify_status(
    status: u16,
    headers: &HashMap<String, String>,
    body: &str,
) -> EngineError {
    let snippet: String = body.chars().take(800).collect();
    match status {
        429 => EngineError::RateLimited {
            message: format!("429 Too Many Requests: {snippet}"),
            retry_after: extract_retry_after(headers, body),
        },
        408 => EngineError::Transient(format!("408 Request Timeout: {snippet}")),
        s if s >= 500 => EngineError::Transient(format!("{s} server error: {snippet}")),
        s => EngineError::Fatal(format!("{s} client error: {snippet}")),
    }
}

/// Pulls a retry-after hint out of response headers or body.
///
/// Checked in order: `retry-after` (seconds), the OpenAI-compatible
/// `x-ratelimit-reset-requests`/`-tokens` headers (seconds, possibly
/// `s`-suffixed), the Azure millisecond variants, a Google-style
/// `"retryDelay": "46s"` in the JSON body, and finally a
/// "Please retry in Ns" phrase in the error text.
pub fn extract_retry_after(
    headers: &HashMap<String, String>,
    body: &str,
) -> Option<Duration> {
    for key in ["retry-after", "x-retry-after"] {
        if let Some(v) = headers.get(key) {
            if let Some(secs) = parse_seconds(v) {
                return Some(secs);
            }
        }
    }

    for key in ["x-ratelimit-reset-tokens", "x-ratelimit-reset-requests"] {
        if let Some(v) = headers.get(key) {
            if let Some(secs) = parse_seconds(v) {
                return Some(secs);
            }
        }
    }

    for key in ["retry-after-ms", "x-ms-retry-after-ms"] {
        if let Some(v) = headers.get(key) {
            if let Ok(ms) = v.trim().parse::<f64>() {
                if ms >= 0.0 {
                    return Some(Duration::from_millis(ms as u64));
                }
            }
        }
    }

    if let Some(secs) = retry_delay_from_body(body) {
        return Some(secs);
    }

    retry_phrase_from_text(body)
}

/// Parses a duration in seconds, tolerating an `s` suffix ("10s").
fn parse_seconds(value: &str) -> Option<Duration> {
    let trimmed = value.trim().trim_end_matches(['s', 'S']).trim();
    let secs: f64 = trimmed.parse().ok()?;
    if secs >= 0.0 {
        Some(Duration::from_secs_f64(secs))
    } else {
        None
    }
}

/// Looks for Google-style `error.details[].retryDelay: "46s"`.
fn retry_delay_from_body(body: &str) -> Option<Duration> {
    let parsed: serde_json::Value = serde_json::from_str(body).ok()?;
    let details = parsed.get("error")?.get("details")?.as_array()?;
    for detail in details {
        if let Some(delay) = detail.get("retryDelay").and_then(|d| d.as_str()) {
            if let Some(secs) = parse_seconds(delay) {
                return Some(secs);
            }
        }
    }
    None
}

/// Looks for "Please retry in Ns" inside vendor error text.
fn retry_phrase_from_text(text: &str) -> Option<Duration> {
    let idx = text.find("Please retry in ")?;
    let rest = &text[idx + "Please retry in ".len()..];
    let digits: String = rest
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    if digits.is_empty() || !rest[digits.len()..].starts_with('s') {
        return None;
    }
    parse_seconds(&digits)
}
