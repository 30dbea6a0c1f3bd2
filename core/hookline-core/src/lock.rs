//! Advisory record locks shared by every hookline process.
//!
//! Each record `X.json` is guarded by `X.lock`. A lock is an exclusive
//! `flock(2)` on that file, attempted without blocking and retried with
//! exponential backoff until the caller's bound elapses.
//!
//! The kernel drops a `flock` when its holder exits, so a crashed hook never
//! wedges other processes. After acquiring, the holder writes its identity
//! into the lock file:
//!
//! ```json
//! { "pid": 4242, "proc_started": 1718000000, "key": "projects/demo/thread", "acquired_at": "..." }
//! ```
//!
//! That metadata is diagnostic only. It is read when an acquisition times out
//! to report who held the lock and whether that process is still alive. PIDs
//! are reused, so liveness compares the recorded process start time too.

use std::cell::RefCell;
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use fs_err as fs;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

const INITIAL_BACKOFF: Duration = Duration::from_millis(1);
const MAX_BACKOFF: Duration = Duration::from_millis(50);

// Per-PID refresh keeps start-time lookups O(1).
thread_local! {
    static SYSTEM_CACHE: RefCell<Option<sysinfo::System>> = const { RefCell::new(None) };
}

/// Identity written by the current holder of a lock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockHolder {
    pub pid: u32,
    #[serde(default)]
    pub proc_started: Option<u64>,
    pub key: String,
    pub acquired_at: DateTime<Utc>,
}

impl LockHolder {
    /// True if the recorded process still exists and is the same process.
    pub fn is_alive(&self) -> bool {
        is_pid_alive_verified(self.pid, self.proc_started)
    }
}

/// An acquired record lock. Released on drop.
#[derive(Debug)]
pub struct RecordLock {
    file: fs::File,
    path: PathBuf,
}

impl RecordLock {
    /// Acquires the exclusive lock at `path`, waiting at most `timeout`.
    pub fn acquire(path: &Path, key: &str, timeout: Duration) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| StoreError::io("create lock directory", e))?;
        }

        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| StoreError::io("open lock file", e))?;

        let started = Instant::now();
        let mut delay = INITIAL_BACKOFF;
        loop {
            match try_flock(&file) {
                Ok(true) => break,
                Ok(false) => {}
                Err(err) => return Err(StoreError::io("flock", err)),
            }

            let waited = started.elapsed();
            if waited >= timeout {
                let holder = read_holder(path);
                return Err(StoreError::LockTimeout {
                    path: path.to_path_buf(),
                    waited_ms: waited.as_millis() as u64,
                    holder_pid: holder.as_ref().map(|h| h.pid),
                    holder_alive: holder.as_ref().map(LockHolder::is_alive),
                });
            }

            let jitter = rand::thread_rng().gen_range(0..=delay.as_micros() as u64 / 2);
            let sleep = (delay + Duration::from_micros(jitter)).min(timeout - waited);
            std::thread::sleep(sleep);
            delay = (delay * 2).min(MAX_BACKOFF);
        }

        let mut lock = Self {
            file,
            path: path.to_path_buf(),
        };
        if let Err(err) = lock.write_holder(key) {
            tracing::debug!(error = %err, path = %lock.path.display(), "Failed to record lock holder");
        }
        Ok(lock)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_holder(&mut self, key: &str) -> std::io::Result<()> {
        let pid = std::process::id();
        let holder = LockHolder {
            pid,
            proc_started: get_process_start_time(pid),
            key: key.to_string(),
            acquired_at: Utc::now(),
        };
        let content = serde_json::to_vec(&holder).map_err(std::io::Error::other)?;
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&content)?;
        Ok(())
    }
}

impl Drop for RecordLock {
    fn drop(&mut self) {
        unsafe {
            libc::flock(self.file.file().as_raw_fd(), libc::LOCK_UN);
        }
    }
}

fn try_flock(file: &fs::File) -> std::io::Result<bool> {
    let rc = unsafe { libc::flock(file.file().as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc == 0 {
        return Ok(true);
    }
    let err = std::io::Error::last_os_error();
    match err.raw_os_error() {
        Some(code) if code == libc::EWOULDBLOCK || code == libc::EINTR => Ok(false),
        _ => Err(err),
    }
}

/// Reads the holder metadata of a lock file, if any was recorded.
pub fn read_holder(path: &Path) -> Option<LockHolder> {
    let mut content = String::new();
    std::fs::File::open(path)
        .ok()?
        .read_to_string(&mut content)
        .ok()?;
    serde_json::from_str(content.trim()).ok()
}

pub fn is_pid_alive(pid: u32) -> bool {
    if pid == 0 || pid > i32::MAX as u32 {
        return false;
    }
    let rc = unsafe { libc::kill(pid as i32, 0) };
    if rc == 0 {
        return true;
    }
    // EPERM: the process exists but belongs to someone else.
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Start time of a process (Unix seconds), or `None` if it doesn't exist.
pub fn get_process_start_time(pid: u32) -> Option<u64> {
    use sysinfo::{Pid, ProcessRefreshKind, System};

    SYSTEM_CACHE.with(|cache| {
        let mut cache = cache.borrow_mut();
        let sys = cache.get_or_insert_with(System::new);

        let sysinfo_pid = Pid::from(pid as usize);
        sys.refresh_process_specifics(sysinfo_pid, ProcessRefreshKind::new());
        sys.process(sysinfo_pid).map(|process| process.start_time())
    })
}

/// Verifies a PID is alive and, when known, still has the expected start time.
pub fn is_pid_alive_verified(pid: u32, expected_start: Option<u64>) -> bool {
    if !is_pid_alive(pid) {
        return false;
    }
    let Some(expected) = expected_start else {
        return true;
    };
    match get_process_start_time(pid) {
        // ±2s tolerance for clock granularity
        Some(actual) => actual.abs_diff(expected) <= 2,
        None => true,
    }
}
