//! Poller lifecycle for the rate-limit monitor.
//!
//! The monitor is two processes that never share memory: a short-lived
//! hook (parent) and a detached poll loop (child). This crate implements
//! both sides of that boundary: spawning the child with a fail-fast
//! startup handshake, the child's fetch/reduce/persist/sleep loop, and
//! graceful termination with SIGKILL escalation.

pub mod kill;
pub mod poll_loop;
pub mod signals;
pub mod spawn;

pub use kill::{KILL_GRACE, KillOutcome, kill_poller_with_verification};
pub use poll_loop::{DEFAULT_BASE_INTERVAL_MS, PollerConfig, PollerError, run_poll_loop};
pub use signals::register_shutdown_flag;
pub use spawn::{
    API_URL_ENV, DIAGNOSTICS_ENV, INTERVAL_ENV, POLL_ENTRY_ARG, STARTUP_HANDSHAKE_TIMEOUT,
    SpawnError, SpawnOptions, TOKEN_ENV, await_startup, spawn_poller,
};
