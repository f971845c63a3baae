//! State-directory derivation from the runner's temp directory.

use std::env;
use std::path::PathBuf;

use crate::StoreError;

/// Environment variable naming the runner's per-job temp directory.
pub const TEMP_DIR_ENV: &str = "RUNNER_TEMP";

/// Directory created under the temp directory for all monitor files.
pub const MONITOR_DIR_NAME: &str = "quota-watch";

/// Persisted reducer state.
pub const STATE_FILE_NAME: &str = "state.json";

/// In-flight atomic-write staging file.
pub const STATE_TMP_FILE_NAME: &str = "state.json.tmp";

/// Decimal pid of the detached poller, one line.
pub const PID_FILE_NAME: &str = "poller.pid";

/// Free-form poller stdout/stderr.
pub const LOG_FILE_NAME: &str = "poller.log";

/// Derives `<RUNNER_TEMP>/quota-watch/` from the environment.
pub fn state_dir_from_env() -> Result<PathBuf, StoreError> {
    env::var_os(TEMP_DIR_ENV)
        .filter(|value| !value.is_empty())
        .map(|value| PathBuf::from(value).join(MONITOR_DIR_NAME))
        .ok_or(StoreError::MissingTempDir)
}
