use std::fs;
use std::io::ErrorKind;

use crate::StoreError;
use crate::state::StateStore;

impl StateStore {
    /// Records the detached poller's pid; written once by the parent on
    /// spawn.
    pub fn write_pid(&self, pid: u32) -> Result<(), StoreError> {
        fs::create_dir_all(self.dir()).map_err(|source| StoreError::Io {
            action: "create state directory",
            path: self.dir().to_path_buf(),
            source,
        })?;
        fs::write(self.pid_path(), format!("{pid}\n")).map_err(|source| StoreError::Io {
            action: "write pid file",
            path: self.pid_path(),
            source,
        })
    }

    /// Reads the recorded pid, or `Ok(None)` when no poller was spawned.
    pub fn read_pid(&self) -> Result<Option<i32>, StoreError> {
        let path = self.pid_path();
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(source) if source.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StoreError::Io {
                    action: "read pid file",
                    path,
                    source,
                });
            }
        };
        raw.trim()
            .parse::<i32>()
            .map(Some)
            .map_err(|_| StoreError::MalformedPid { path })
    }

    /// Removes the pid file after the poller has been stopped.
    ///
    /// A missing file is not an error; the poller may have crashed and a
    /// previous stop may already have cleaned up.
    pub fn remove_pid(&self) -> Result<(), StoreError> {
        match fs::remove_file(self.pid_path()) {
            Ok(()) => Ok(()),
            Err(source) if source.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io {
                action: "remove pid file",
                path: self.pid_path(),
                source,
            }),
        }
    }
}
