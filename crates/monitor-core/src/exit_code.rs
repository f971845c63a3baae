//! Exit code definitions shared by the job hooks and the detached poller.

use std::fmt;

/// Exit codes returned by the monitor's entry points.
///
/// The parent hooks report 0 on success and a non-zero code on unsupported
/// platforms or a failed spawn handshake; the poller reports 0 on a normal
/// SIGTERM shutdown and a non-zero code on fatal rate-limit exhaustion or
/// unrecoverable state I/O.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ExitCode {
    /// Successful completion.
    Ok = 0,
    /// Invalid arguments or incomplete environment configuration.
    Syntax = 1,
    /// The host platform lacks the required signal semantics.
    Unsupported = 2,
    /// The poller did not complete the startup handshake.
    Spawn = 3,
    /// Unrecoverable state-file I/O.
    StateIo = 4,
    /// Persistent secondary rate limiting exhausted the retry budget.
    QuotaExhausted = 5,
}

impl ExitCode {
    /// Returns the numeric exit code.
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self as i32
    }

    /// Returns a short description of the exit condition.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::Ok => "success",
            Self::Syntax => "usage or configuration error",
            Self::Unsupported => "unsupported platform",
            Self::Spawn => "poller startup handshake failed",
            Self::StateIo => "state file I/O failure",
            Self::QuotaExhausted => "secondary rate limit retry budget exhausted",
        }
    }
}

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.as_i32(), self.description())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_is_zero() {
        assert_eq!(ExitCode::Ok.as_i32(), 0);
    }

    #[test]
    fn codes_are_distinct() {
        let codes = [
            ExitCode::Ok,
            ExitCode::Syntax,
            ExitCode::Unsupported,
            ExitCode::Spawn,
            ExitCode::StateIo,
            ExitCode::QuotaExhausted,
        ];
        for (i, a) in codes.iter().enumerate() {
            for b in &codes[i + 1..] {
                assert_ne!(a.as_i32(), b.as_i32());
            }
        }
    }

    #[test]
    fn display_includes_description() {
        let rendered = ExitCode::Spawn.to_string();
        assert!(rendered.starts_with("3"));
        assert!(rendered.contains("handshake"));
    }
}
