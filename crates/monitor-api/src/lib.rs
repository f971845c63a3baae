#![deny(unsafe_code)]

//! Blocking client for the forge's `rate_limit` endpoint.
//!
//! One call, one contract: fetch the snapshot, classify what went wrong.
//! Rate-limit classification itself lives downstream in `monitor-pacing`;
//! this crate only assembles the structured error details (status, message,
//! rate-limit headers) that classification needs.

mod client;

use monitor_core::model::{RateLimitErrorDetails, RateLimitResponse};

pub use client::{DEFAULT_BASE_URL, FETCH_TIMEOUT, RateLimitClient};

/// The fetch seam the poll loop is generic over.
///
/// Scripted implementations drive the loop in tests and replays.
pub trait FetchRateLimit {
    /// Fetches one rate-limit snapshot.
    fn fetch_rate_limit(&self) -> Result<RateLimitResponse, ApiError>;
}

/// Errors produced by a snapshot fetch.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// DNS, connect, TLS, or timeout failure before an HTTP status arrived.
    #[error("transport failure contacting the rate_limit endpoint: {0}")]
    Transport(#[from] reqwest::Error),
    /// The endpoint answered with a non-200 status.
    #[error("rate_limit endpoint returned HTTP {}: {}", .0.status, .0.message)]
    Status(RateLimitErrorDetails),
    /// A 200 response whose body is not a valid snapshot.
    #[error("rate_limit response body is not a valid snapshot: {0}")]
    Parse(#[source] serde_json::Error),
}

impl ApiError {
    /// Returns the structured details of a non-200 response, when present.
    #[must_use]
    pub fn status_details(&self) -> Option<&RateLimitErrorDetails> {
        match self {
            Self::Status(details) => Some(details),
            _ => None,
        }
    }
}
