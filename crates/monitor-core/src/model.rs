//! Wire-facing sample types and the persisted accumulator record.
//!
//! `state.json` is the only coupling between the detached poller and the
//! job hooks, so every field here tolerates absence on read: optional
//! fields default, unknown keys are ignored. Structurally wrong kinds (a
//! non-map `buckets`, a string `poll_count`) are rejected by serde typing.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Upper bound on the persisted diagnostics ring; oldest entries drop first.
pub const DIAGNOSTICS_CAP: usize = 64;

/// One per-bucket reading from the forge's rate-limit endpoint.
///
/// `used + remaining = limit` is the upstream contract, but the invariant is
/// tolerated when violated: `used` is authoritative throughout the reducer.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct RateLimitSample {
    /// Window quota for this bucket.
    pub limit: u64,
    /// Calls consumed in the current window.
    pub used: u64,
    /// Calls remaining in the current window.
    #[serde(default)]
    pub remaining: u64,
    /// Epoch second at which the bucket next refills.
    pub reset: i64,
}

/// The full rate-limit snapshot: bucket name to sample.
///
/// The bucket set is open; unknown buckets are carried through untouched.
/// Envelope fields other than `resources` (the forge also sends a legacy
/// `rate` object) are ignored.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct RateLimitResponse {
    /// Per-bucket samples keyed by bucket name (`core`, `search`, ...).
    #[serde(default)]
    pub resources: BTreeMap<String, RateLimitSample>,
}

/// Per-bucket accumulator maintained by the reducer.
///
/// Created on the first sample that mentions the bucket, mutated only by
/// the reducer, never deleted within a job.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct BucketState {
    /// `used` value from the previous sample.
    pub last_used: u64,
    /// `reset` value from the previous sample.
    pub last_reset: i64,
    /// Most recently observed window quota.
    pub limit: u64,
    /// Cumulative calls attributed to this bucket over the monitor's
    /// lifetime. Monotonically non-decreasing.
    pub total_used: u64,
    /// Confirmed quota-window resets observed. Monotonically non-decreasing.
    pub windows_crossed: u64,
    /// Sample-pair transitions that could not be reconciled.
    pub anomalies: u64,
    /// When the bucket first appeared in a response.
    #[serde(with = "time::serde::rfc3339")]
    pub first_seen_ts: OffsetDateTime,
    /// When the bucket was last folded through the reducer.
    #[serde(with = "time::serde::rfc3339")]
    pub last_updated_ts: OffsetDateTime,
}

/// Blackout state governing whether polling is currently gated.
///
/// Authoritative in the poller's memory; mirrored into the persisted state
/// for observability.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct RateLimitControl {
    /// Epoch millisecond until which no polls may fire.
    #[serde(default)]
    pub blocked_until_ms: Option<i64>,
    /// Consecutive secondary-rate-limit hits without an intervening success.
    #[serde(default)]
    pub secondary_consecutive: u32,
}

impl RateLimitControl {
    /// Returns the blackout deadline, treating one in the past as absent.
    #[must_use]
    pub fn effective_block(&self, now_ms: i64) -> Option<i64> {
        self.blocked_until_ms.filter(|until| *until > now_ms)
    }
}

/// One entry of the optional diagnostics ring.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct PollDiagnostic {
    /// When the entry was recorded.
    #[serde(with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
    /// Free-form description of the poll outcome.
    pub event: String,
}

/// The persisted top-level record; sole writer is the detached poller.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ReducerState {
    /// Per-bucket accumulators keyed by bucket name.
    #[serde(default)]
    pub buckets: BTreeMap<String, BucketState>,
    /// Successful polls folded through the reducer.
    #[serde(default)]
    pub poll_count: u64,
    /// Failed fetch attempts of any kind.
    #[serde(default)]
    pub failure_count: u64,
    /// When the monitor session began.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub started_at_ts: Option<OffsetDateTime>,
    /// Timestamp of the most recent successful poll.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_poll_ts: Option<OffsetDateTime>,
    /// Set once by the poller during graceful shutdown.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub stopped_at_ts: Option<OffsetDateTime>,
    /// Written by the poller before its first fetch; the parent polls this
    /// value to confirm startup.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub poller_started_at_ts: Option<OffsetDateTime>,
    /// Human-readable description of the most recent failure.
    #[serde(default)]
    pub last_error: Option<String>,
    /// Blackout state mirrored from the poller's memory.
    #[serde(default)]
    pub rate_limit_control: RateLimitControl,
    /// Bounded ring of recent poll log entries when diagnostics mode is on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<Vec<PollDiagnostic>>,
}

impl ReducerState {
    /// Appends a diagnostics entry, dropping the oldest beyond the cap.
    pub fn record_diagnostic(&mut self, entry: PollDiagnostic) {
        let ring = self.diagnostics.get_or_insert_with(Vec::new);
        ring.push(entry);
        if ring.len() > DIAGNOSTICS_CAP {
            let excess = ring.len() - DIAGNOSTICS_CAP;
            ring.drain(..excess);
        }
    }
}

/// Structured view of a failed fetch, assembled by the API client from the
/// response status, JSON `message`, and rate-limit headers.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RateLimitErrorDetails {
    /// HTTP status of the failed fetch.
    pub status: u16,
    /// The forge's error message, or a body excerpt when no message field
    /// was present.
    pub message: String,
    /// `x-ratelimit-remaining` header, when parseable.
    pub rate_limit_remaining: Option<u64>,
    /// `x-ratelimit-reset` header (epoch seconds), when parseable.
    pub rate_limit_reset: Option<i64>,
    /// `retry-after` header, when parseable.
    pub retry_after_seconds: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(epoch: i64) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(epoch).expect("valid epoch")
    }

    #[test]
    fn effective_block_in_future_is_some() {
        let control = RateLimitControl {
            blocked_until_ms: Some(10_000),
            secondary_consecutive: 1,
        };
        assert_eq!(control.effective_block(9_999), Some(10_000));
    }

    #[test]
    fn effective_block_in_past_reads_as_none() {
        let control = RateLimitControl {
            blocked_until_ms: Some(10_000),
            secondary_consecutive: 1,
        };
        assert_eq!(control.effective_block(10_000), None);
        assert_eq!(control.effective_block(20_000), None);
    }

    #[test]
    fn effective_block_absent_is_none() {
        assert_eq!(RateLimitControl::default().effective_block(0), None);
    }

    #[test]
    fn response_parse_tolerates_unknown_envelope_fields() {
        let raw = r#"{
            "resources": {
                "core": {"limit": 5000, "used": 10, "remaining": 4990, "reset": 1000}
            },
            "rate": {"limit": 5000, "used": 10, "remaining": 4990, "reset": 1000}
        }"#;
        let response: RateLimitResponse = serde_json::from_str(raw).expect("parse");
        assert_eq!(response.resources.len(), 1);
        assert_eq!(response.resources["core"].used, 10);
    }

    #[test]
    fn response_parse_carries_unknown_buckets() {
        let raw = r#"{"resources": {
            "core": {"limit": 5000, "used": 1, "remaining": 4999, "reset": 1},
            "audit_log_stream": {"limit": 15, "used": 0, "remaining": 15, "reset": 2}
        }}"#;
        let response: RateLimitResponse = serde_json::from_str(raw).expect("parse");
        assert!(response.resources.contains_key("audit_log_stream"));
    }

    #[test]
    fn sample_remaining_defaults_when_absent() {
        let raw = r#"{"limit": 30, "used": 3, "reset": 99}"#;
        let sample: RateLimitSample = serde_json::from_str(raw).expect("parse");
        assert_eq!(sample.remaining, 0);
        assert_eq!(sample.used, 3);
    }

    #[test]
    fn reducer_state_parses_from_empty_object() {
        let state: ReducerState = serde_json::from_str("{}").expect("parse");
        assert_eq!(state, ReducerState::default());
    }

    #[test]
    fn reducer_state_rejects_non_map_buckets() {
        let result = serde_json::from_str::<ReducerState>(r#"{"buckets": 42}"#);
        assert!(result.is_err());
    }

    #[test]
    fn reducer_state_rejects_wrong_scalar_kind() {
        let result = serde_json::from_str::<ReducerState>(r#"{"poll_count": "seven"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn reducer_state_tolerates_unknown_keys() {
        let raw = r#"{"poll_count": 3, "some_future_field": {"a": 1}}"#;
        let state: ReducerState = serde_json::from_str(raw).expect("parse");
        assert_eq!(state.poll_count, 3);
    }

    #[test]
    fn diagnostics_ring_is_bounded() {
        let mut state = ReducerState::default();
        for i in 0..(DIAGNOSTICS_CAP + 10) {
            state.record_diagnostic(PollDiagnostic {
                ts: ts(i as i64),
                event: format!("poll {i}"),
            });
        }
        let ring = state.diagnostics.as_ref().expect("ring present");
        assert_eq!(ring.len(), DIAGNOSTICS_CAP);
        assert_eq!(ring[0].event, "poll 10");
    }

    #[test]
    fn state_round_trips_through_json() {
        let mut state = ReducerState {
            poll_count: 4,
            failure_count: 1,
            started_at_ts: Some(ts(1_700_000_000)),
            last_error: Some("HTTP 500".to_owned()),
            ..ReducerState::default()
        };
        state.buckets.insert(
            "core".to_owned(),
            BucketState {
                last_used: 15,
                last_reset: 1_700_003_600,
                limit: 5000,
                total_used: 5,
                windows_crossed: 0,
                anomalies: 0,
                first_seen_ts: ts(1_700_000_000),
                last_updated_ts: ts(1_700_000_300),
            },
        );
        let raw = serde_json::to_string(&state).expect("serialise");
        let back: ReducerState = serde_json::from_str(&raw).expect("parse");
        assert_eq!(back, state);
    }
}
