//! Daemon liveness via `daemon.pid`.
//!
//! The file records the daemon's pid and process start time; a stale file
//! left by a crashed daemon (or a recycled pid) reads as not running.

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::lock;
use crate::storage::StorageConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonPid {
    pub pid: u32,
    #[serde(default)]
    pub proc_started: Option<u64>,
}

pub fn write_pid_file(storage: &StorageConfig) -> Result<DaemonPid, StoreError> {
    let pid = std::process::id();
    let record = DaemonPid {
        pid,
        proc_started: lock::get_process_start_time(pid),
    };
    let path = storage.daemon_pid_file();
    if let Some(parent) = path.parent() {
        fs_err::create_dir_all(parent).map_err(|e| StoreError::io("create root", e))?;
    }
    let content =
        serde_json::to_string(&record).map_err(|e| StoreError::json("serialize pid file", e))?;
    fs_err::write(&path, content).map_err(|e| StoreError::io("write pid file", e))?;
    Ok(record)
}

/// Removes the pid file if it still names this process.
pub fn remove_pid_file(storage: &StorageConfig) {
    let path = storage.daemon_pid_file();
    if read_pid_file(storage).is_some_and(|record| record.pid == std::process::id()) {
        if let Err(err) = fs_err::remove_file(&path) {
            tracing::debug!(error = %err, "Failed to remove pid file");
        }
    }
}

pub fn read_pid_file(storage: &StorageConfig) -> Option<DaemonPid> {
    let content = fs_err::read_to_string(storage.daemon_pid_file()).ok()?;
    serde_json::from_str(content.trim()).ok()
}

/// The running daemon, if any.
pub fn running_daemon(storage: &StorageConfig) -> Option<DaemonPid> {
    read_pid_file(storage).filter(|record| lock::is_pid_alive_verified(record.pid, record.proc_started))
}

pub fn is_daemon_running(storage: &StorageConfig) -> bool {
    running_daemon(storage).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn pid_file_reflects_liveness() {
        let temp = tempdir().unwrap();
        let storage = StorageConfig::with_root(temp.path().to_path_buf());
        assert!(!is_daemon_running(&storage));

        write_pid_file(&storage).unwrap();
        assert!(is_daemon_running(&storage));

        remove_pid_file(&storage);
        assert!(!is_daemon_running(&storage));
    }

    #[test]
    fn stale_pid_file_reads_as_stopped() {
        let temp = tempdir().unwrap();
        let storage = StorageConfig::with_root(temp.path().to_path_buf());
        fs_err::write(storage.daemon_pid_file(), r#"{"pid":4294967294}"#).unwrap();
        assert!(!is_daemon_running(&storage));
    }
}
