#![deny(unsafe_code)]

//! Filesystem persistence for the rate-limit monitor.
//!
//! `state.json` and `poller.pid` are the only coupling between the job
//! hooks and the detached poller. The state file is written with an
//! atomic-rename protocol so an external reader always sees a complete
//! JSON document, never a torn one; the pid file is written once by the
//! parent on spawn and removed after kill.

pub mod paths;
mod pid;
mod state;

use std::io;
use std::path::PathBuf;

pub use state::StateStore;

/// Errors surfaced by the state store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The temp-directory environment variable is missing or empty.
    #[error("RUNNER_TEMP is not set; cannot derive the monitor state directory")]
    MissingTempDir,
    /// A filesystem operation failed.
    #[error("failed to {action} {}: {source}", .path.display())]
    Io {
        /// What the store was doing.
        action: &'static str,
        /// The path involved.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The reducer state could not be serialised.
    #[error("failed to serialise reducer state: {0}")]
    Serialize(#[source] serde_json::Error),
    /// The state file exists but does not contain a valid reducer state.
    #[error("state file {} does not contain a valid reducer state: {source}", .path.display())]
    Malformed {
        /// The offending file.
        path: PathBuf,
        /// The parse failure.
        #[source]
        source: serde_json::Error,
    },
    /// The pid file exists but does not contain a decimal pid.
    #[error("pid file {} does not contain a decimal pid", .path.display())]
    MalformedPid {
        /// The offending file.
        path: PathBuf,
    },
}
