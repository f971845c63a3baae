//! Rate-limit blackout control.
//!
//! Classifies 403/429 responses from the rate-limit endpoint itself and
//! computes how long polling must stay dark. Primary limits wait for the
//! window reset; secondary ("abuse") limits take the strictest of the
//! upstream's retry-after, its reset, and a locally computed exponential
//! backoff, and turn fatal after too many consecutive hits.

use monitor_core::model::{RateLimitControl, RateLimitErrorDetails};

use crate::planner::PlannedPoll;
use crate::{MAX_SECONDARY_RETRIES, SECONDARY_DEFAULT_WAIT_MS, SECONDARY_WAIT_CAP_MS};

/// Which rate-limit regime produced a failed fetch.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RateLimitKind {
    /// Window quota exhausted (`remaining = 0`); clears at the reset.
    Primary,
    /// Secondary / abuse detection; backs off exponentially.
    Secondary,
}

/// The control's verdict for one rate-limited fetch.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RateLimitDecision {
    /// Regime that triggered the decision.
    pub kind: RateLimitKind,
    /// How long polling stays dark, in milliseconds.
    pub wait_ms: u64,
    /// Set once the consecutive-secondary budget is exhausted.
    pub fatal: bool,
    /// Epoch millisecond at which polling may resume.
    pub next_allowed_at_ms: i64,
}

/// Classifies a failed fetch as a rate-limit event, or `None` for a
/// generic failure.
///
/// Only 403 and 429 are candidates. A "secondary" or "abuse" marker in the
/// message wins over the remaining-quota check.
#[must_use]
pub fn classify_rate_limit_error(details: &RateLimitErrorDetails) -> Option<RateLimitKind> {
    if details.status != 403 && details.status != 429 {
        return None;
    }
    let message = details.message.to_ascii_lowercase();
    if message.contains("secondary") || message.contains("abuse") {
        return Some(RateLimitKind::Secondary);
    }
    if details.rate_limit_remaining == Some(0) {
        return Some(RateLimitKind::Primary);
    }
    None
}

/// Computes the blackout for a classified rate-limit event.
///
/// Returns the successor control state and the decision; the caller owns
/// persisting the state and honouring `fatal`.
#[must_use]
pub fn handle_rate_limit_error(
    control: &RateLimitControl,
    kind: RateLimitKind,
    details: &RateLimitErrorDetails,
    now_ms: i64,
) -> (RateLimitControl, RateLimitDecision) {
    let mut next = *control;
    let (wait_ms, fatal) = match kind {
        RateLimitKind::Primary => (reset_wait_ms(details, now_ms).unwrap_or(0), false),
        RateLimitKind::Secondary => {
            let attempt = control.secondary_consecutive.saturating_add(1);
            let shift = u64::from(attempt - 1).min(31);
            let backoff = SECONDARY_DEFAULT_WAIT_MS
                .saturating_mul(1_u64 << shift)
                .min(SECONDARY_WAIT_CAP_MS);
            let mut wait = backoff;
            if let Some(retry_after) = details.retry_after_seconds {
                wait = wait.max(retry_after.saturating_mul(1_000));
            }
            if let Some(reset_wait) = reset_wait_ms(details, now_ms) {
                wait = wait.max(reset_wait);
            }
            next.secondary_consecutive = attempt;
            (wait, attempt > MAX_SECONDARY_RETRIES)
        }
    };

    let next_allowed_at_ms = now_ms.saturating_add(wait_ms as i64);
    next.blocked_until_ms = Some(next_allowed_at_ms);
    let decision = RateLimitDecision {
        kind,
        wait_ms,
        fatal,
        next_allowed_at_ms,
    };
    (next, decision)
}

/// Clears the blackout and the consecutive-secondary counter after any
/// successful fetch.
#[must_use]
pub fn note_success(_control: &RateLimitControl) -> RateLimitControl {
    RateLimitControl::default()
}

/// Overrides a planned poll while a blackout is in force.
///
/// Raises the sleep to at least the remaining blackout, cancels any burst,
/// and reports whether the plan was gated.
#[must_use]
pub fn apply_rate_limit_gate(
    mut plan: PlannedPoll,
    control: &RateLimitControl,
    now_ms: i64,
) -> (PlannedPoll, bool) {
    let Some(until) = control.effective_block(now_ms) else {
        return (plan, false);
    };
    let wait_ms = (until - now_ms) as u64;
    plan.sleep_ms = plan.sleep_ms.max(wait_ms);
    plan.burst = false;
    plan.burst_gap_ms = 0;
    (plan, true)
}

fn reset_wait_ms(details: &RateLimitErrorDetails, now_ms: i64) -> Option<u64> {
    details
        .rate_limit_reset
        .map(|reset| reset.saturating_mul(1_000).saturating_sub(now_ms).max(0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW_MS: i64 = 1_700_000_000_000;

    fn details(status: u16, message: &str) -> RateLimitErrorDetails {
        RateLimitErrorDetails {
            status,
            message: message.to_owned(),
            ..RateLimitErrorDetails::default()
        }
    }

    #[test]
    fn secondary_marker_wins_regardless_of_remaining() {
        let mut d = details(403, "You have exceeded a secondary rate limit.");
        d.rate_limit_remaining = Some(100);
        assert_eq!(classify_rate_limit_error(&d), Some(RateLimitKind::Secondary));
    }

    #[test]
    fn abuse_marker_is_secondary_case_insensitively() {
        let d = details(429, "ABUSE detection mechanism triggered");
        assert_eq!(classify_rate_limit_error(&d), Some(RateLimitKind::Secondary));
    }

    #[test]
    fn exhausted_quota_is_primary() {
        let mut d = details(403, "API rate limit exceeded for user");
        d.rate_limit_remaining = Some(0);
        assert_eq!(classify_rate_limit_error(&d), Some(RateLimitKind::Primary));
    }

    #[test]
    fn quota_left_without_marker_is_not_a_rate_limit_event() {
        let mut d = details(403, "Resource not accessible by integration");
        d.rate_limit_remaining = Some(3000);
        assert_eq!(classify_rate_limit_error(&d), None);
    }

    #[test]
    fn missing_remaining_header_is_not_primary() {
        let d = details(403, "Forbidden");
        assert_eq!(classify_rate_limit_error(&d), None);
    }

    #[test]
    fn other_statuses_are_never_rate_limit_events() {
        let mut d = details(500, "secondary rate limit");
        d.rate_limit_remaining = Some(0);
        assert_eq!(classify_rate_limit_error(&d), None);
    }

    #[test]
    fn primary_waits_until_the_reset() {
        let mut d = details(403, "API rate limit exceeded");
        d.rate_limit_remaining = Some(0);
        d.rate_limit_reset = Some(NOW_MS / 1_000 + 45);
        let (next, decision) =
            handle_rate_limit_error(&RateLimitControl::default(), RateLimitKind::Primary, &d, NOW_MS);
        assert_eq!(decision.wait_ms, 45_000);
        assert!(!decision.fatal);
        assert_eq!(next.blocked_until_ms, Some(NOW_MS + 45_000));
        assert_eq!(next.secondary_consecutive, 0);
    }

    #[test]
    fn primary_with_past_reset_waits_zero() {
        let mut d = details(403, "API rate limit exceeded");
        d.rate_limit_remaining = Some(0);
        d.rate_limit_reset = Some(NOW_MS / 1_000 - 10);
        let (_, decision) =
            handle_rate_limit_error(&RateLimitControl::default(), RateLimitKind::Primary, &d, NOW_MS);
        assert_eq!(decision.wait_ms, 0);
    }

    #[test]
    fn secondary_takes_the_strictest_of_all_signals() {
        let mut d = details(429, "Secondary rate limit hit");
        d.retry_after_seconds = Some(30);
        d.rate_limit_reset = Some(NOW_MS / 1_000 + 90);
        let (next, decision) = handle_rate_limit_error(
            &RateLimitControl::default(),
            RateLimitKind::Secondary,
            &d,
            NOW_MS,
        );
        assert_eq!(decision.wait_ms, 90_000);
        assert_eq!(next.secondary_consecutive, 1);
        assert!(!decision.fatal);
    }

    #[test]
    fn second_consecutive_secondary_doubles_the_backoff() {
        let control = RateLimitControl {
            blocked_until_ms: None,
            secondary_consecutive: 1,
        };
        let d = details(429, "secondary");
        let (next, decision) =
            handle_rate_limit_error(&control, RateLimitKind::Secondary, &d, NOW_MS);
        assert_eq!(decision.wait_ms, 120_000);
        assert_eq!(next.secondary_consecutive, 2);
    }

    #[test]
    fn secondary_backoff_is_capped_at_thirty_minutes() {
        let control = RateLimitControl {
            blocked_until_ms: None,
            secondary_consecutive: 20,
        };
        let d = details(429, "secondary");
        let (_, decision) = handle_rate_limit_error(&control, RateLimitKind::Secondary, &d, NOW_MS);
        assert_eq!(decision.wait_ms, SECONDARY_WAIT_CAP_MS);
    }

    #[test]
    fn secondary_turns_fatal_beyond_the_retry_budget() {
        let control = RateLimitControl {
            blocked_until_ms: None,
            secondary_consecutive: MAX_SECONDARY_RETRIES,
        };
        let d = details(429, "secondary");
        let (next, decision) =
            handle_rate_limit_error(&control, RateLimitKind::Secondary, &d, NOW_MS);
        assert!(decision.fatal);
        assert_eq!(next.secondary_consecutive, MAX_SECONDARY_RETRIES + 1);
    }

    #[test]
    fn success_clears_the_control_state() {
        let control = RateLimitControl {
            blocked_until_ms: Some(NOW_MS + 60_000),
            secondary_consecutive: 3,
        };
        assert_eq!(note_success(&control), RateLimitControl::default());
    }

    #[test]
    fn gate_raises_the_sleep_to_the_remaining_blackout() {
        let plan = PlannedPoll {
            sleep_ms: 10_000,
            burst: true,
            burst_gap_ms: 8_000,
        };
        let control = RateLimitControl {
            blocked_until_ms: Some(NOW_MS + 90_000),
            secondary_consecutive: 1,
        };
        let (gated, blocked) = apply_rate_limit_gate(plan, &control, NOW_MS);
        assert!(blocked);
        assert!(gated.sleep_ms >= 90_000);
        assert!(!gated.burst);
    }

    #[test]
    fn gate_keeps_a_longer_planned_sleep() {
        let plan = PlannedPoll {
            sleep_ms: 300_000,
            burst: false,
            burst_gap_ms: 0,
        };
        let control = RateLimitControl {
            blocked_until_ms: Some(NOW_MS + 90_000),
            secondary_consecutive: 1,
        };
        let (gated, blocked) = apply_rate_limit_gate(plan, &control, NOW_MS);
        assert!(blocked);
        assert_eq!(gated.sleep_ms, 300_000);
    }

    #[test]
    fn expired_blackout_does_not_gate() {
        let plan = PlannedPoll {
            sleep_ms: 10_000,
            burst: true,
            burst_gap_ms: 8_000,
        };
        let control = RateLimitControl {
            blocked_until_ms: Some(NOW_MS - 1),
            secondary_consecutive: 1,
        };
        let (gated, blocked) = apply_rate_limit_gate(plan, &control, NOW_MS);
        assert!(!blocked);
        assert_eq!(gated, plan);
    }
}
