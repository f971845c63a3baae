use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use monitor_core::model::ReducerState;

use crate::StoreError;
use crate::paths::{
    LOG_FILE_NAME, PID_FILE_NAME, STATE_FILE_NAME, STATE_TMP_FILE_NAME, state_dir_from_env,
};

/// Handle on the monitor's state directory.
///
/// The detached poller is the sole writer of the state file; the job hooks
/// only read it (and own the pid file's create/remove lifecycle).
#[derive(Clone, Debug)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    /// Creates a store rooted at the given directory.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Creates a store rooted at `<RUNNER_TEMP>/quota-watch/`.
    pub fn from_env() -> Result<Self, StoreError> {
        Ok(Self::new(state_dir_from_env()?))
    }

    /// Returns the state directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the path of the persisted reducer state.
    #[must_use]
    pub fn state_path(&self) -> PathBuf {
        self.dir.join(STATE_FILE_NAME)
    }

    /// Returns the path of the atomic-write staging file.
    #[must_use]
    pub fn state_tmp_path(&self) -> PathBuf {
        self.dir.join(STATE_TMP_FILE_NAME)
    }

    /// Returns the path of the poller pid file.
    #[must_use]
    pub fn pid_path(&self) -> PathBuf {
        self.dir.join(PID_FILE_NAME)
    }

    /// Returns the path of the poller log file.
    #[must_use]
    pub fn log_path(&self) -> PathBuf {
        self.dir.join(LOG_FILE_NAME)
    }

    /// Writes the reducer state with the atomic-rename protocol.
    ///
    /// The serialised document lands in `state.json.tmp` and is renamed
    /// over `state.json`; any failure before the rename removes the
    /// staging file so a crash never leaves a half-written state visible.
    pub fn write_state(&self, state: &ReducerState) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir).map_err(|source| StoreError::Io {
            action: "create state directory",
            path: self.dir.clone(),
            source,
        })?;

        let payload = serde_json::to_vec_pretty(state).map_err(StoreError::Serialize)?;
        let tmp = self.state_tmp_path();
        if let Err(source) = fs::write(&tmp, payload) {
            let _ = fs::remove_file(&tmp);
            return Err(StoreError::Io {
                action: "write staging state file",
                path: tmp,
                source,
            });
        }
        if let Err(source) = fs::rename(&tmp, self.state_path()) {
            let _ = fs::remove_file(&tmp);
            return Err(StoreError::Io {
                action: "rename staging state file over",
                path: self.state_path(),
                source,
            });
        }
        Ok(())
    }

    /// Reads and validates the persisted reducer state.
    ///
    /// Returns `Ok(None)` when no state has been written yet. Unknown keys
    /// and missing optional fields are tolerated; structurally wrong kinds
    /// are rejected.
    pub fn read_state(&self) -> Result<Option<ReducerState>, StoreError> {
        let path = self.state_path();
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(source) if source.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StoreError::Io {
                    action: "read state file",
                    path,
                    source,
                });
            }
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| StoreError::Malformed { path, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use monitor_core::model::{BucketState, RateLimitControl};
    use tempfile::tempdir;
    use time::OffsetDateTime;

    fn populated_state() -> ReducerState {
        let ts = OffsetDateTime::from_unix_timestamp(1_700_000_000).expect("epoch");
        let mut state = ReducerState {
            poll_count: 12,
            failure_count: 2,
            started_at_ts: Some(ts),
            last_poll_ts: Some(ts),
            last_error: Some("HTTP 502".to_owned()),
            rate_limit_control: RateLimitControl {
                blocked_until_ms: Some(1_700_000_900_000),
                secondary_consecutive: 1,
            },
            ..ReducerState::default()
        };
        state.buckets.insert(
            "core".to_owned(),
            BucketState {
                last_used: 140,
                last_reset: 1_700_003_600,
                limit: 5000,
                total_used: 40,
                windows_crossed: 1,
                anomalies: 0,
                first_seen_ts: ts,
                last_updated_ts: ts,
            },
        );
        state
    }

    #[test]
    fn read_without_a_state_file_reports_not_found() {
        let temp = tempdir().expect("tempdir");
        let store = StateStore::new(temp.path().join("quota-watch"));
        assert!(store.read_state().expect("read").is_none());
    }

    #[test]
    fn write_then_read_round_trips() {
        let temp = tempdir().expect("tempdir");
        let store = StateStore::new(temp.path().join("quota-watch"));
        let state = populated_state();
        store.write_state(&state).expect("write");
        let back = store.read_state().expect("read").expect("present");
        assert_eq!(back, state);
    }

    #[test]
    fn write_leaves_no_staging_file_behind() {
        let temp = tempdir().expect("tempdir");
        let store = StateStore::new(temp.path().join("quota-watch"));
        store.write_state(&populated_state()).expect("write");
        assert!(!store.state_tmp_path().exists());
        assert!(store.state_path().exists());
    }

    #[test]
    fn write_creates_the_state_directory() {
        let temp = tempdir().expect("tempdir");
        let store = StateStore::new(temp.path().join("deep").join("quota-watch"));
        store.write_state(&ReducerState::default()).expect("write");
        assert!(store.state_path().exists());
    }

    #[test]
    fn overwrite_replaces_the_previous_state() {
        let temp = tempdir().expect("tempdir");
        let store = StateStore::new(temp.path().join("quota-watch"));
        store.write_state(&ReducerState::default()).expect("first");
        let second = populated_state();
        store.write_state(&second).expect("second");
        let back = store.read_state().expect("read").expect("present");
        assert_eq!(back, second);
    }

    #[test]
    fn malformed_state_file_is_rejected() {
        let temp = tempdir().expect("tempdir");
        let dir = temp.path().join("quota-watch");
        fs::create_dir_all(&dir).expect("mkdir");
        fs::write(dir.join(STATE_FILE_NAME), r#"{"buckets": []}"#).expect("write");
        let store = StateStore::new(dir);
        assert!(matches!(
            store.read_state(),
            Err(StoreError::Malformed { .. })
        ));
    }

    #[test]
    fn state_file_with_unknown_keys_still_reads() {
        let temp = tempdir().expect("tempdir");
        let dir = temp.path().join("quota-watch");
        fs::create_dir_all(&dir).expect("mkdir");
        fs::write(
            dir.join(STATE_FILE_NAME),
            r#"{"poll_count": 7, "introduced_later": true}"#,
        )
        .expect("write");
        let store = StateStore::new(dir);
        let state = store.read_state().expect("read").expect("present");
        assert_eq!(state.poll_count, 7);
    }

    #[test]
    fn external_reader_always_sees_complete_json() {
        // Atomicity is provided by rename(2); this verifies the observable
        // contract across many interleaved writes.
        let temp = tempdir().expect("tempdir");
        let store = StateStore::new(temp.path().join("quota-watch"));
        for i in 0..50 {
            let mut state = populated_state();
            state.poll_count = i;
            store.write_state(&state).expect("write");
            let back = store.read_state().expect("read").expect("present");
            assert_eq!(back.poll_count, i);
        }
    }
}
