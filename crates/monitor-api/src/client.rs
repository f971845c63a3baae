use std::time::Duration;

use monitor_core::model::{RateLimitErrorDetails, RateLimitResponse};
use reqwest::blocking::Client;
use reqwest::header::{self, HeaderMap};
use serde::Deserialize;

use crate::{ApiError, FetchRateLimit};

/// Base URL used when the environment does not override it.
pub const DEFAULT_BASE_URL: &str = "https://api.github.com";

/// End-to-end timeout of one snapshot fetch.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

const ACCEPT_HEADER: &str = "application/vnd.github.v3+json";
const RATE_LIMIT_REMAINING_HEADER: &str = "x-ratelimit-remaining";
const RATE_LIMIT_RESET_HEADER: &str = "x-ratelimit-reset";
const RETRY_AFTER_HEADER: &str = "retry-after";

/// How much raw body survives into an error message when the forge sends
/// something that is not its usual JSON error envelope.
const BODY_EXCERPT_LEN: usize = 200;

/// Authenticated client for `GET <base>/rate_limit`.
pub struct RateLimitClient {
    http: Client,
    endpoint: String,
    token: String,
}

impl RateLimitClient {
    /// Builds a client against the given API base URL.
    pub fn new(base_url: &str, token: impl Into<String>) -> Result<Self, ApiError> {
        let http = Client::builder()
            .timeout(FETCH_TIMEOUT)
            .user_agent(concat!("quota-watch/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            endpoint: format!("{}/rate_limit", base_url.trim_end_matches('/')),
            token: token.into(),
        })
    }

    /// Returns the resolved endpoint URL.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl FetchRateLimit for RateLimitClient {
    fn fetch_rate_limit(&self) -> Result<RateLimitResponse, ApiError> {
        let response = self
            .http
            .get(&self.endpoint)
            .header(header::AUTHORIZATION, format!("Bearer {}", self.token))
            .header(header::ACCEPT, ACCEPT_HEADER)
            .send()?;

        let status = response.status().as_u16();
        if status == 200 {
            let body = response.text()?;
            return serde_json::from_str(&body).map_err(ApiError::Parse);
        }

        // Capture the rate-limit headers before the body consumes the
        // response.
        let remaining = header_u64(response.headers(), RATE_LIMIT_REMAINING_HEADER);
        let reset = header_i64(response.headers(), RATE_LIMIT_RESET_HEADER);
        let retry_after = header_u64(response.headers(), RETRY_AFTER_HEADER);
        let body = response.text().unwrap_or_default();

        Err(ApiError::Status(RateLimitErrorDetails {
            status,
            message: extract_message(&body),
            rate_limit_remaining: remaining,
            rate_limit_reset: reset,
            retry_after_seconds: retry_after,
        }))
    }
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    message: String,
}

/// Pulls the forge's `message` field out of an error body, falling back to
/// a bounded excerpt of the raw body.
fn extract_message(body: &str) -> String {
    if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(body) {
        if !envelope.message.is_empty() {
            return envelope.message;
        }
    }
    let trimmed = body.trim();
    let mut excerpt: String = trimmed.chars().take(BODY_EXCERPT_LEN).collect();
    if trimmed.chars().count() > BODY_EXCERPT_LEN {
        excerpt.push_str("...");
    }
    excerpt
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
}

fn header_i64(headers: &HeaderMap, name: &str) -> Option<i64> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderName, HeaderValue};

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(
                HeaderName::from_static(name),
                HeaderValue::from_str(value).expect("header value"),
            );
        }
        map
    }

    #[test]
    fn endpoint_joins_without_a_duplicate_slash() {
        let client = RateLimitClient::new("https://api.github.com/", "t").expect("client");
        assert_eq!(client.endpoint(), "https://api.github.com/rate_limit");
    }

    #[test]
    fn endpoint_joins_a_bare_base_url() {
        let client = RateLimitClient::new("https://ghe.example.com/api/v3", "t").expect("client");
        assert_eq!(client.endpoint(), "https://ghe.example.com/api/v3/rate_limit");
    }

    #[test]
    fn message_is_taken_from_the_json_envelope() {
        let body = r#"{"message": "API rate limit exceeded", "documentation_url": "x"}"#;
        assert_eq!(extract_message(body), "API rate limit exceeded");
    }

    #[test]
    fn message_falls_back_to_a_body_excerpt() {
        assert_eq!(extract_message("  plain text error  "), "plain text error");
    }

    #[test]
    fn long_fallback_bodies_are_truncated() {
        let body = "x".repeat(500);
        let message = extract_message(&body);
        assert_eq!(message.chars().count(), BODY_EXCERPT_LEN + 3);
        assert!(message.ends_with("..."));
    }

    #[test]
    fn rate_limit_headers_parse_when_present() {
        let map = headers(&[
            ("x-ratelimit-remaining", "0"),
            ("x-ratelimit-reset", "1700000300"),
            ("retry-after", "30"),
        ]);
        assert_eq!(header_u64(&map, RATE_LIMIT_REMAINING_HEADER), Some(0));
        assert_eq!(header_i64(&map, RATE_LIMIT_RESET_HEADER), Some(1_700_000_300));
        assert_eq!(header_u64(&map, RETRY_AFTER_HEADER), Some(30));
    }

    #[test]
    fn unparseable_headers_read_as_absent() {
        let map = headers(&[("x-ratelimit-remaining", "soon")]);
        assert_eq!(header_u64(&map, RATE_LIMIT_REMAINING_HEADER), None);
        assert_eq!(header_i64(&map, RATE_LIMIT_RESET_HEADER), None);
    }
}
