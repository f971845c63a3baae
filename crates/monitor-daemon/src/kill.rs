//! Graceful poller termination with SIGKILL escalation.

use std::io;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

/// How long the poller gets to finish its in-flight work after SIGTERM.
pub const KILL_GRACE: Duration = Duration::from_secs(5);

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);
const POST_KILL_WAIT: Duration = Duration::from_secs(1);

/// Result of a verified kill.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum KillOutcome {
    /// No process with that pid exists; expected when the poller already
    /// crashed or exited.
    NotFound,
    /// The poller is gone.
    Exited {
        /// Whether SIGKILL was required after the grace period.
        escalated: bool,
    },
}

/// Sends SIGTERM, waits up to `grace` for the process to exit, and
/// escalates to SIGKILL if it is still alive.
#[must_use]
pub fn kill_poller_with_verification(pid: i32, grace: Duration) -> KillOutcome {
    if !process_exists(pid) {
        return KillOutcome::NotFound;
    }

    debug!(pid, "sending SIGTERM to the poller");
    send_signal(pid, libc::SIGTERM);

    let deadline = Instant::now() + grace;
    while Instant::now() < deadline {
        if !process_exists(pid) {
            return KillOutcome::Exited { escalated: false };
        }
        thread::sleep(EXIT_POLL_INTERVAL);
    }

    warn!(pid, "poller ignored SIGTERM; escalating to SIGKILL");
    send_signal(pid, libc::SIGKILL);
    let settle = Instant::now() + POST_KILL_WAIT;
    while Instant::now() < settle && process_exists(pid) {
        thread::sleep(EXIT_POLL_INTERVAL);
    }
    KillOutcome::Exited { escalated: true }
}

/// Probes for the process without delivering a signal.
fn process_exists(pid: i32) -> bool {
    // SAFETY: signal 0 performs only the existence and permission checks.
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

fn send_signal(pid: i32, signal: i32) {
    // SAFETY: plain kill(2); a racing exit surfaces as ESRCH, which the
    // caller's existence polling already covers.
    let _ = unsafe { libc::kill(pid, signal) };
}
