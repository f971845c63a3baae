#![deny(unsafe_code)]
#![deny(missing_docs)]

//! Core types and the accounting reducer for the rate-limit monitor.
//!
//! # Overview
//!
//! The monitor samples the forge's `rate_limit` endpoint at irregular
//! intervals and must attribute API consumption to the current CI job even
//! though quota windows reset underneath it. Everything required to do that
//! attribution lives here: the wire-facing sample types ([`model`]), the
//! persisted accumulator ([`model::ReducerState`]), and the pure state
//! transition that folds one snapshot into the accumulator ([`reducer`]).
//!
//! # Design
//!
//! The reducer is free of clocks, I/O, and ambient state; the observation
//! timestamp is a parameter. Replaying a recorded `(timestamp, response)`
//! sequence therefore reproduces the exact persisted state, which is how the
//! end-to-end accounting tests work.
//!
//! # Invariants
//!
//! - `total_used` and `windows_crossed` never decrease.
//! - A sample pair is counted as a window crossing iff the reset timestamp
//!   moved *and* the used counter went down.
//! - Buckets absent from a response are left untouched.

pub mod exit_code;
pub mod model;
pub mod reducer;

pub use exit_code::ExitCode;
pub use model::{
    BucketState, PollDiagnostic, RateLimitControl, RateLimitErrorDetails, RateLimitResponse,
    RateLimitSample, ReducerState,
};
pub use reducer::{ReduceOutcome, UpdateResult, reduce, update_bucket};
