//! The child's fetch → reduce → persist → sleep loop.
//!
//! Every error is captured into `failure_count`/`last_error` and the loop
//! continues; the only non-signal exit is a fatal run of consecutive
//! secondary rate limits. State writes that fail mid-session are logged
//! and superseded by the next cycle's write.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use monitor_api::FetchRateLimit;
use monitor_core::model::{PollDiagnostic, ReducerState};
use monitor_core::reducer::reduce;
use monitor_pacing::{
    apply_debounce, apply_rate_limit_gate, classify_rate_limit_error, handle_rate_limit_error,
    note_success, plan_next_poll,
};
use monitor_store::{StateStore, StoreError};
use time::OffsetDateTime;
use tracing::{debug, error, info, warn};

/// Default base poll interval.
pub const DEFAULT_BASE_INTERVAL_MS: u64 = 60_000;

/// Granularity at which sleeps re-check the shutdown flag.
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Poller tuning passed down from the environment.
#[derive(Clone, Copy, Debug)]
pub struct PollerConfig {
    /// Base poll interval in milliseconds.
    pub base_interval_ms: u64,
    /// Whether to record the persisted diagnostics ring.
    pub diagnostics: bool,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            base_interval_ms: DEFAULT_BASE_INTERVAL_MS,
            diagnostics: false,
        }
    }
}

/// Terminal failures of the poll loop.
#[derive(Debug, thiserror::Error)]
pub enum PollerError {
    /// Consecutive secondary rate limits exhausted the retry budget.
    #[error("persistent secondary rate limiting after {attempts} consecutive hits")]
    QuotaExhausted {
        /// Consecutive hits at the point of giving up.
        attempts: u32,
    },
    /// The startup or final state write failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

enum StepOutcome {
    Continue,
    Fatal { attempts: u32 },
}

/// Runs the poll loop until SIGTERM or a fatal rate-limit condition.
///
/// Writes the startup timestamp before the first fetch (the parent's
/// handshake), then repeats: fetch, fold through the reducer, persist,
/// consult the planner and the rate-limit gate, sleep. Burst plans poll a
/// second time to bracket an imminent window reset.
pub fn run_poll_loop<C: FetchRateLimit>(
    client: &C,
    store: &StateStore,
    config: &PollerConfig,
    shutdown: &AtomicBool,
) -> Result<(), PollerError> {
    let mut state = match store.read_state() {
        Ok(Some(state)) => state,
        Ok(None) => ReducerState::default(),
        Err(error) => {
            warn!(%error, "previous state unreadable; starting fresh");
            ReducerState::default()
        }
    };

    let now = OffsetDateTime::now_utc();
    if state.started_at_ts.is_none() {
        state.started_at_ts = Some(now);
    }
    state.poller_started_at_ts = Some(now);
    store.write_state(&state)?;
    info!(interval_ms = config.base_interval_ms, "poller started");

    let mut fatal: Option<u32> = None;
    while !shutdown.load(Ordering::SeqCst) {
        match poll_step(client, store, config, &mut state) {
            StepOutcome::Fatal { attempts } => {
                fatal = Some(attempts);
                break;
            }
            StepOutcome::Continue => {}
        }

        let plan = next_plan(&state, config);
        if sleep_with_cancellation(plan.sleep_ms, shutdown) {
            break;
        }
        if plan.burst {
            if shutdown.load(Ordering::SeqCst) {
                break;
            }
            match poll_step(client, store, config, &mut state) {
                StepOutcome::Fatal { attempts } => {
                    fatal = Some(attempts);
                    break;
                }
                StepOutcome::Continue => {}
            }
            if sleep_with_cancellation(plan.burst_gap_ms, shutdown) {
                break;
            }
        }
    }

    state.stopped_at_ts = Some(OffsetDateTime::now_utc());
    store.write_state(&state)?;

    if let Some(attempts) = fatal {
        error!(attempts, "giving up after persistent secondary rate limiting");
        return Err(PollerError::QuotaExhausted { attempts });
    }
    info!(
        polls = state.poll_count,
        failures = state.failure_count,
        "poller stopped"
    );
    Ok(())
}

fn next_plan(state: &ReducerState, config: &PollerConfig) -> monitor_pacing::PlannedPoll {
    let now = OffsetDateTime::now_utc();
    let plan = plan_next_poll(state, config.base_interval_ms, now.unix_timestamp());
    let (plan, blocked) = apply_rate_limit_gate(plan, &state.rate_limit_control, epoch_ms(now));
    if blocked {
        info!(sleep_ms = plan.sleep_ms, "polling gated by rate-limit blackout");
    }
    apply_debounce(plan)
}

fn poll_step<C: FetchRateLimit>(
    client: &C,
    store: &StateStore,
    config: &PollerConfig,
    state: &mut ReducerState,
) -> StepOutcome {
    let observed_at = OffsetDateTime::now_utc();
    match client.fetch_rate_limit() {
        Ok(response) => {
            let (mut next, outcome) = reduce(state, &response, observed_at);
            next.rate_limit_control = note_success(&next.rate_limit_control);
            if outcome.rotations > 0 {
                // Logged so these transitions can be analysed later; they
                // may really be races between two polls near the boundary.
                warn!(
                    rotations = outcome.rotations,
                    "reset timestamp rotated without the counter restarting"
                );
            }
            if outcome.anomalies > 0 {
                warn!(anomalies = outcome.anomalies, "unreconcilable sample transition");
            }
            debug!(
                delta = outcome.delta,
                buckets = response.resources.len(),
                "snapshot folded"
            );
            if config.diagnostics {
                next.record_diagnostic(PollDiagnostic {
                    ts: observed_at,
                    event: format!(
                        "ok: +{} calls across {} buckets",
                        outcome.delta,
                        response.resources.len()
                    ),
                });
            }
            *state = next;
            persist(store, state);
            StepOutcome::Continue
        }
        Err(fetch_error) => {
            state.failure_count = state.failure_count.saturating_add(1);
            state.last_error = Some(fetch_error.to_string());

            let classified = fetch_error
                .status_details()
                .and_then(|details| classify_rate_limit_error(details).map(|kind| (details, kind)));

            let mut outcome = StepOutcome::Continue;
            match classified {
                Some((details, kind)) => {
                    let (control, decision) = handle_rate_limit_error(
                        &state.rate_limit_control,
                        kind,
                        details,
                        epoch_ms(observed_at),
                    );
                    state.rate_limit_control = control;
                    warn!(
                        kind = ?decision.kind,
                        wait_ms = decision.wait_ms,
                        "the rate_limit endpoint rate limited the monitor"
                    );
                    if decision.fatal {
                        outcome = StepOutcome::Fatal {
                            attempts: control.secondary_consecutive,
                        };
                    }
                }
                None => warn!(error = %fetch_error, "snapshot fetch failed"),
            }

            if config.diagnostics {
                state.record_diagnostic(PollDiagnostic {
                    ts: observed_at,
                    event: format!("failed: {fetch_error}"),
                });
            }
            persist(store, state);
            outcome
        }
    }
}

/// Mid-session write failures are non-fatal: the next cycle's write
/// supersedes this one.
fn persist(store: &StateStore, state: &ReducerState) {
    if let Err(error) = store.write_state(state) {
        warn!(%error, "state write failed; will retry next cycle");
    }
}

fn epoch_ms(ts: OffsetDateTime) -> i64 {
    (ts.unix_timestamp_nanos() / 1_000_000) as i64
}

/// Sleeps in one-second slices, returning `true` when shutdown interrupted
/// the wait.
fn sleep_with_cancellation(total_ms: u64, shutdown: &AtomicBool) -> bool {
    let mut remaining = Duration::from_millis(total_ms);
    loop {
        if shutdown.load(Ordering::SeqCst) {
            return true;
        }
        if remaining.is_zero() {
            return false;
        }
        let chunk = remaining.min(SHUTDOWN_POLL_INTERVAL);
        thread::sleep(chunk);
        remaining -= chunk;
    }
}
