#![deny(unsafe_code)]
#![deny(missing_docs)]

//! Poll pacing for the rate-limit monitor.
//!
//! Two cooperating pieces decide when the poller next fetches a snapshot:
//! the [`planner`] picks a delay that straddles upcoming bucket resets with
//! as few polls as possible, and the [`control`] module overrides it with a
//! blackout whenever the upstream signals that the monitor itself is being
//! rate limited. The debounce floor is applied after both have run.

pub mod control;
pub mod planner;

pub use control::{
    RateLimitDecision, RateLimitKind, apply_rate_limit_gate, classify_rate_limit_error,
    handle_rate_limit_error, note_success,
};
pub use planner::{PlannedPoll, apply_debounce, plan_next_poll};

/// Minimum-interval floor applied after the planner and gate have both run.
///
/// Collapses poll cascades when several 60 s buckets reset seconds apart.
pub const POLL_DEBOUNCE_MS: u64 = 5_000;

/// Base wait for the first secondary-rate-limit hit.
pub const SECONDARY_DEFAULT_WAIT_MS: u64 = 60_000;

/// Ceiling for the secondary exponential backoff.
pub const SECONDARY_WAIT_CAP_MS: u64 = 30 * 60 * 1_000;

/// Consecutive secondary hits tolerated before the poller gives up.
pub const MAX_SECONDARY_RETRIES: u32 = 5;
