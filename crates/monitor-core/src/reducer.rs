//! The accounting reducer: folds rate-limit snapshots into usage totals.
//!
//! A bucket's `used` counter is authoritative for the *current* window
//! only; across a reset, only the new `used` value can be attributed to
//! post-reset activity. Interpreting a `reset` change without a `used`
//! decrease as a reset would double-count; interpreting one *with* a
//! decrease as same-window would subtract real calls. The four branches of
//! [`update_bucket`] are the only split consistent with both constraints.

use time::OffsetDateTime;

use crate::model::{BucketState, RateLimitResponse, RateLimitSample, ReducerState};

/// Describes how a single sample changed one bucket's accumulator.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct UpdateResult {
    /// Calls attributed to the bucket by this sample.
    pub delta: u64,
    /// A genuine quota-window reset was recognised.
    pub window_crossed: bool,
    /// The reset timestamp rotated without the counter restarting.
    pub rotated: bool,
    /// The sample pair could not be reconciled; no calls were attributed.
    pub anomaly: bool,
}

/// Aggregated outcome of folding one full response through the reducer.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ReduceOutcome {
    /// Total calls attributed across all buckets in the response.
    pub delta: u64,
    /// Window crossings recognised in this response.
    pub windows_crossed: u64,
    /// Reset-rotation transitions seen in this response.
    pub rotations: u64,
    /// Unreconcilable transitions seen in this response.
    pub anomalies: u64,
    /// Buckets observed for the first time.
    pub new_buckets: u64,
}

/// Folds one sample into a bucket accumulator.
///
/// Pure: no clocks, no I/O; the observation timestamp is a parameter, and
/// the prior state is never mutated. The first observation of a bucket
/// attributes no delta.
#[must_use]
pub fn update_bucket(
    prior: Option<&BucketState>,
    sample: &RateLimitSample,
    observed_at: OffsetDateTime,
) -> (BucketState, UpdateResult) {
    let Some(prior) = prior else {
        let fresh = BucketState {
            last_used: sample.used,
            last_reset: sample.reset,
            limit: sample.limit,
            total_used: 0,
            windows_crossed: 0,
            anomalies: 0,
            first_seen_ts: observed_at,
            last_updated_ts: observed_at,
        };
        return (fresh, UpdateResult::default());
    };

    let mut next = prior.clone();
    next.last_used = sample.used;
    next.limit = sample.limit;
    next.last_updated_ts = observed_at;

    let mut result = UpdateResult::default();
    if sample.reset != prior.last_reset && sample.used < prior.last_used {
        // The quota rolled over; `used` now measures post-reset activity.
        next.total_used = prior.total_used.saturating_add(sample.used);
        next.windows_crossed = prior.windows_crossed.saturating_add(1);
        next.last_reset = sample.reset;
        result.delta = sample.used;
        result.window_crossed = true;
    } else if sample.reset != prior.last_reset {
        // Reset timestamp rotated mid-window; the counter kept running.
        let delta = sample.used - prior.last_used;
        next.total_used = prior.total_used.saturating_add(delta);
        next.last_reset = sample.reset;
        result.delta = delta;
        result.rotated = true;
    } else if sample.used < prior.last_used {
        // Same window, counter went backwards: unreconcilable.
        next.anomalies = prior.anomalies.saturating_add(1);
        result.anomaly = true;
    } else {
        let delta = sample.used - prior.last_used;
        next.total_used = prior.total_used.saturating_add(delta);
        result.delta = delta;
    }

    (next, result)
}

/// Folds every bucket present in a response through [`update_bucket`].
///
/// Buckets absent from the response are left untouched. Bumps the poll
/// counter and records the observation timestamp.
#[must_use]
pub fn reduce(
    prior: &ReducerState,
    response: &RateLimitResponse,
    observed_at: OffsetDateTime,
) -> (ReducerState, ReduceOutcome) {
    let mut next = prior.clone();
    let mut outcome = ReduceOutcome::default();

    for (name, sample) in &response.resources {
        let existing = next.buckets.get(name);
        if existing.is_none() {
            outcome.new_buckets += 1;
        }
        let (bucket, result) = update_bucket(existing, sample, observed_at);
        outcome.delta = outcome.delta.saturating_add(result.delta);
        outcome.windows_crossed += u64::from(result.window_crossed);
        outcome.rotations += u64::from(result.rotated);
        outcome.anomalies += u64::from(result.anomaly);
        next.buckets.insert(name.clone(), bucket);
    }

    next.poll_count = next.poll_count.saturating_add(1);
    next.last_poll_ts = Some(observed_at);
    (next, outcome)
}
