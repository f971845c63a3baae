//! Detached poller spawn with a fail-fast startup handshake.

use std::env;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use monitor_store::paths::TEMP_DIR_ENV;
use monitor_store::{StateStore, StoreError};
use tracing::debug;

/// API token passed to the poller.
pub const TOKEN_ENV: &str = "GITHUB_TOKEN";
/// API base URL passed to the poller.
pub const API_URL_ENV: &str = "GITHUB_API_URL";
/// Base poll interval in milliseconds.
pub const INTERVAL_ENV: &str = "QUOTA_WATCH_INTERVAL_MS";
/// Boolean flag enabling the persisted diagnostics ring.
pub const DIAGNOSTICS_ENV: &str = "QUOTA_WATCH_DIAGNOSTICS";

/// Subcommand that routes the spawned binary into the poll loop.
pub const POLL_ENTRY_ARG: &str = "poll";

/// How long the parent waits for the poller's startup timestamp.
pub const STARTUP_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

const HANDSHAKE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Everything the child needs, passed through its environment.
#[derive(Clone, Debug)]
pub struct SpawnOptions {
    /// API token for the rate-limit endpoint.
    pub token: String,
    /// API base URL.
    pub api_url: String,
    /// Base poll interval in milliseconds.
    pub base_interval_ms: u64,
    /// Whether the poller records the diagnostics ring.
    pub diagnostics: bool,
    /// The runner temp directory the child derives its state paths from.
    pub temp_dir: PathBuf,
}

/// Errors surfaced while spawning the poller.
#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    /// The monitor's own binary path could not be resolved.
    #[error("failed to locate the monitor binary: {0}")]
    Binary(#[source] io::Error),
    /// The poller log file could not be opened.
    #[error("failed to open the poller log file: {0}")]
    Log(#[source] io::Error),
    /// The child process could not be launched.
    #[error("failed to launch the poller process: {0}")]
    Launch(#[source] io::Error),
    /// State-store interaction failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The child never wrote its startup timestamp.
    #[error("poller did not report startup within {}s", STARTUP_HANDSHAKE_TIMEOUT.as_secs())]
    HandshakeTimeout,
}

/// Launches the poll loop as a detached child and verifies its startup.
///
/// The child re-executes the current binary with the internal poll
/// subcommand, both standard streams appended to `poller.log`, in its own
/// process group so it outlives the hook. The pid is recorded before the
/// handshake so a post hook can always find the process. On handshake
/// timeout the child is killed and the spawn reported failed even if the
/// process was technically alive.
pub fn spawn_poller(store: &StateStore, options: &SpawnOptions) -> Result<u32, SpawnError> {
    let binary = env::current_exe().map_err(SpawnError::Binary)?;
    fs::create_dir_all(store.dir()).map_err(|source| StoreError::Io {
        action: "create state directory",
        path: store.dir().to_path_buf(),
        source,
    })?;
    let log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(store.log_path())
        .map_err(SpawnError::Log)?;
    let log_stderr = log.try_clone().map_err(SpawnError::Log)?;

    let mut command = Command::new(binary);
    command
        .arg(POLL_ENTRY_ARG)
        .env(TOKEN_ENV, &options.token)
        .env(API_URL_ENV, &options.api_url)
        .env(INTERVAL_ENV, options.base_interval_ms.to_string())
        .env(
            DIAGNOSTICS_ENV,
            if options.diagnostics { "true" } else { "false" },
        )
        .env(TEMP_DIR_ENV, &options.temp_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_stderr));

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        // Own process group: the poller must survive the hook's exit and
        // the runner's group-wide signal delivery.
        command.process_group(0);
    }

    let mut child = command.spawn().map_err(SpawnError::Launch)?;
    let pid = child.id();
    store.write_pid(pid)?;
    debug!(pid, "poller spawned; awaiting startup handshake");

    match await_startup(store, STARTUP_HANDSHAKE_TIMEOUT) {
        Ok(()) => Ok(pid),
        Err(error) => {
            let _ = child.kill();
            let _ = child.wait();
            Err(error)
        }
    }
}

/// Polls the state file until the poller reports startup or the timeout
/// elapses.
pub fn await_startup(store: &StateStore, timeout: Duration) -> Result<(), SpawnError> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Ok(Some(state)) = store.read_state() {
            if state.poller_started_at_ts.is_some() {
                return Ok(());
            }
        }
        if Instant::now() >= deadline {
            return Err(SpawnError::HandshakeTimeout);
        }
        thread::sleep(HANDSHAKE_POLL_INTERVAL);
    }
}
