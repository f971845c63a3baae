//! Reset-targeted sleep planning.
//!
//! A fixed interval can miss a reset instant by up to the whole interval;
//! the planner instead aims polls just before the nearest upcoming reset
//! and, when the boundary is imminent, schedules a burst pair that brackets
//! it so the reducer sees both the final pre-reset `used` and the first
//! post-reset `used`.

use monitor_core::model::ReducerState;

use crate::POLL_DEBOUNCE_MS;

/// Resets closer than this enter burst mode.
const BURST_THRESHOLD_S: i64 = 8;
/// How far before the reset the pre-boundary poll lands.
const BURST_LEAD_MS: u64 = 2_000;
/// Lower bound on the gap between the burst pair.
const BURST_GAP_MIN_MS: u64 = 4_000;
/// Non-burst polls target this many seconds before the reset.
const NON_BURST_LEAD_S: i64 = 4;

/// The planner's verdict: how long to sleep and whether to follow up with a
/// second, boundary-bracketing poll.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PlannedPoll {
    /// Delay before the next poll, in milliseconds.
    pub sleep_ms: u64,
    /// Whether a second poll should follow shortly after the first.
    pub burst: bool,
    /// Delay between the burst pair; meaningful only when `burst` is set.
    pub burst_gap_ms: u64,
}

/// Picks the next-poll delay from every bucket's upcoming reset.
///
/// Only resets within twice the base interval influence the plan; anything
/// further out is reached comfortably by steady-state polling.
#[must_use]
pub fn plan_next_poll(
    state: &ReducerState,
    base_interval_ms: u64,
    now_epoch_s: i64,
) -> PlannedPoll {
    let horizon_s = (base_interval_ms.saturating_mul(2) / 1_000) as i64;
    let nearest = state
        .buckets
        .values()
        .map(|bucket| bucket.last_reset - now_epoch_s)
        .filter(|delta| *delta > 0 && *delta <= horizon_s)
        .min();

    match nearest {
        None => PlannedPoll {
            sleep_ms: base_interval_ms,
            burst: false,
            burst_gap_ms: 0,
        },
        Some(delta) if delta <= BURST_THRESHOLD_S => {
            let delta_ms = (delta as u64).saturating_mul(1_000);
            PlannedPoll {
                sleep_ms: delta_ms.saturating_sub(BURST_LEAD_MS),
                burst: true,
                burst_gap_ms: delta_ms.saturating_add(BURST_LEAD_MS).max(BURST_GAP_MIN_MS),
            }
        }
        Some(delta) => {
            let target_ms = ((delta - NON_BURST_LEAD_S).max(0) as u64).saturating_mul(1_000);
            PlannedPoll {
                sleep_ms: target_ms.clamp(base_interval_ms / 4, base_interval_ms),
                burst: false,
                burst_gap_ms: 0,
            }
        }
    }
}

/// Raises the plan's delays to the debounce floor.
///
/// Must run after both the planner and the rate-limit gate.
#[must_use]
pub fn apply_debounce(mut plan: PlannedPoll) -> PlannedPoll {
    plan.sleep_ms = plan.sleep_ms.max(POLL_DEBOUNCE_MS);
    if plan.burst {
        plan.burst_gap_ms = plan.burst_gap_ms.max(POLL_DEBOUNCE_MS);
    }
    plan
}
