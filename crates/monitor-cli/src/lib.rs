//! Command-line front-end for the rate-limit monitor.
//!
//! One binary carries both sides of the job lifecycle: `start` (pre-job
//! hook) spawns the detached poller and verifies its startup handshake,
//! `stop` (post-job hook) terminates it and prints the usage report, and
//! `report` renders the report without stopping anything. The hidden
//! `poll` subcommand is the entry flag that routes the re-executed binary
//! into the poll loop itself.
//!
//! [`run`] accepts argument and writer handles rather than touching the
//! process directly, so the whole surface is exercisable from tests.

use std::ffi::OsString;
use std::io::Write;

mod env;
mod report;

use clap::Command;
use monitor_api::RateLimitClient;
use monitor_core::ExitCode;
use monitor_daemon::spawn::POLL_ENTRY_ARG;
use monitor_daemon::{
    KILL_GRACE, KillOutcome, PollerConfig, PollerError, SpawnError, SpawnOptions,
    kill_poller_with_verification, register_shutdown_flag, run_poll_loop, spawn_poller,
};
use monitor_store::StateStore;

pub use env::{ConfigError, EnvConfig, parse_bool_flag};
pub use report::render_markdown;

/// Tracing filter variable honoured by the poller.
pub const LOG_ENV: &str = "QUOTA_WATCH_LOG";

/// Parses the arguments and runs the selected entry point.
///
/// Returns the numeric exit status; the binary shim converts it with
/// [`exit_code_from`].
pub fn run<I, T, Out, Err>(args: I, stdout: &mut Out, stderr: &mut Err) -> i32
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
    Out: Write,
    Err: Write,
{
    let matches = match command().try_get_matches_from(args) {
        Ok(matches) => matches,
        Err(error) => {
            use clap::error::ErrorKind;
            let rendered = error.render();
            return match error.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                    let _ = write!(stdout, "{rendered}");
                    ExitCode::Ok.as_i32()
                }
                _ => {
                    let _ = write!(stderr, "{rendered}");
                    ExitCode::Syntax.as_i32()
                }
            };
        }
    };

    let code = match matches.subcommand() {
        Some(("start", _)) => start(stdout, stderr),
        Some(("stop", _)) => stop(stdout, stderr),
        Some(("report", _)) => report(stdout, stderr),
        Some((name, _)) if name == POLL_ENTRY_ARG => poll(stderr),
        _ => ExitCode::Syntax,
    };
    code.as_i32()
}

/// Converts [`run`]'s status into a process exit code.
#[must_use]
pub fn exit_code_from(status: i32) -> std::process::ExitCode {
    std::process::ExitCode::from(u8::try_from(status).unwrap_or(u8::MAX))
}

fn command() -> Command {
    Command::new("quota-watch")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Meters forge API rate-limit consumption across a CI job")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(Command::new("start").about("Spawn the detached poller (pre-job hook)"))
        .subcommand(
            Command::new("stop").about("Stop the poller and print the usage report (post-job hook)"),
        )
        .subcommand(Command::new("report").about("Render the usage report from the current state"))
        .subcommand(
            Command::new(POLL_ENTRY_ARG)
                .hide(true)
                .about("Internal: run the poll loop"),
        )
}

const fn platform_supported() -> bool {
    cfg!(unix)
}

fn start<Out: Write, Err: Write>(stdout: &mut Out, stderr: &mut Err) -> ExitCode {
    if !platform_supported() {
        let _ = writeln!(
            stderr,
            "quota-watch: unsupported platform (POSIX signal semantics required)"
        );
        return ExitCode::Unsupported;
    }

    let config = match EnvConfig::from_env() {
        Ok(config) => config,
        Err(error) => {
            let _ = writeln!(stderr, "quota-watch: {error}");
            return ExitCode::Syntax;
        }
    };
    let token = match config.require_token() {
        Ok(token) => token.to_owned(),
        Err(error) => {
            let _ = writeln!(stderr, "quota-watch: {error}");
            return ExitCode::Syntax;
        }
    };

    let store = StateStore::new(config.state_dir());
    let options = SpawnOptions {
        token,
        api_url: config.api_url().to_owned(),
        base_interval_ms: config.base_interval_ms(),
        diagnostics: config.diagnostics(),
        temp_dir: config.temp_dir().to_path_buf(),
    };

    match spawn_poller(&store, &options) {
        Ok(pid) => {
            let _ = writeln!(stdout, "quota-watch poller started (pid {pid})");
            ExitCode::Ok
        }
        Err(SpawnError::Store(error)) => {
            let _ = writeln!(stderr, "quota-watch: {error}");
            ExitCode::StateIo
        }
        Err(error) => {
            let _ = writeln!(stderr, "quota-watch: {error}");
            ExitCode::Spawn
        }
    }
}

fn stop<Out: Write, Err: Write>(stdout: &mut Out, stderr: &mut Err) -> ExitCode {
    if !platform_supported() {
        let _ = writeln!(
            stderr,
            "quota-watch: unsupported platform (POSIX signal semantics required)"
        );
        return ExitCode::Unsupported;
    }

    let config = match EnvConfig::from_env() {
        Ok(config) => config,
        Err(error) => {
            let _ = writeln!(stderr, "quota-watch: {error}");
            return ExitCode::Syntax;
        }
    };
    let store = StateStore::new(config.state_dir());

    match store.read_pid() {
        Ok(Some(pid)) => {
            match kill_poller_with_verification(pid, KILL_GRACE) {
                KillOutcome::NotFound => {
                    let _ = writeln!(
                        stderr,
                        "quota-watch: poller (pid {pid}) was already gone"
                    );
                }
                KillOutcome::Exited { escalated: true } => {
                    let _ = writeln!(
                        stderr,
                        "quota-watch: poller ignored SIGTERM and was killed"
                    );
                }
                KillOutcome::Exited { escalated: false } => {}
            }
            if let Err(error) = store.remove_pid() {
                let _ = writeln!(stderr, "quota-watch: {error}");
            }
        }
        Ok(None) => {
            let _ = writeln!(stderr, "quota-watch: no poller pid recorded");
        }
        Err(error) => {
            let _ = writeln!(stderr, "quota-watch: {error}");
            return ExitCode::StateIo;
        }
    }

    render_state(&store, stdout, stderr)
}

fn report<Out: Write, Err: Write>(stdout: &mut Out, stderr: &mut Err) -> ExitCode {
    let config = match EnvConfig::from_env() {
        Ok(config) => config,
        Err(error) => {
            let _ = writeln!(stderr, "quota-watch: {error}");
            return ExitCode::Syntax;
        }
    };
    render_state(&StateStore::new(config.state_dir()), stdout, stderr)
}

fn render_state<Out: Write, Err: Write>(
    store: &StateStore,
    stdout: &mut Out,
    stderr: &mut Err,
) -> ExitCode {
    match store.read_state() {
        Ok(Some(state)) => {
            let _ = write!(stdout, "{}", render_markdown(&state));
            ExitCode::Ok
        }
        Ok(None) => {
            let _ = writeln!(stderr, "quota-watch: no monitor state recorded");
            ExitCode::Ok
        }
        Err(error) => {
            let _ = writeln!(stderr, "quota-watch: {error}");
            ExitCode::StateIo
        }
    }
}

/// The detached child's entry point.
fn poll<Err: Write>(stderr: &mut Err) -> ExitCode {
    init_poller_logging();

    let config = match EnvConfig::from_env() {
        Ok(config) => config,
        Err(error) => {
            let _ = writeln!(stderr, "quota-watch poller: {error}");
            return ExitCode::Syntax;
        }
    };
    let token = match config.require_token() {
        Ok(token) => token.to_owned(),
        Err(error) => {
            let _ = writeln!(stderr, "quota-watch poller: {error}");
            return ExitCode::Syntax;
        }
    };

    let client = match RateLimitClient::new(config.api_url(), token) {
        Ok(client) => client,
        Err(error) => {
            let _ = writeln!(stderr, "quota-watch poller: {error}");
            return ExitCode::Syntax;
        }
    };
    let shutdown = match register_shutdown_flag() {
        Ok(flag) => flag,
        Err(error) => {
            let _ = writeln!(stderr, "quota-watch poller: failed to install SIGTERM handler: {error}");
            return ExitCode::Syntax;
        }
    };

    let store = StateStore::new(config.state_dir());
    let poller_config = PollerConfig {
        base_interval_ms: config.base_interval_ms(),
        diagnostics: config.diagnostics(),
    };

    match run_poll_loop(&client, &store, &poller_config, &shutdown) {
        Ok(()) => ExitCode::Ok,
        Err(error @ PollerError::QuotaExhausted { .. }) => {
            let _ = writeln!(stderr, "quota-watch poller: {error}");
            ExitCode::QuotaExhausted
        }
        Err(error @ PollerError::Store(_)) => {
            let _ = writeln!(stderr, "quota-watch poller: {error}");
            ExitCode::StateIo
        }
    }
}

fn init_poller_logging() {
    use tracing_subscriber::EnvFilter;
    let filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .try_init();
}
