//! Durable state store.
//!
//! Every piece of coordination state lives in one small JSON record on disk
//! and is only ever touched through `Store`:
//!
//! - [`Store::load`] is a fresh, lock-free read. Writes are atomic renames, so
//!   a reader sees either the previous or the next version, never a torn one.
//!   A missing, empty or corrupt record reads as `None`.
//! - [`Store::with_lock`] is the read-modify-write primitive. It holds the
//!   record's advisory lock across load, mutate and persist, so concurrent
//!   updates from different processes serialize.
//! - [`Store::append_line`] / [`Store::read_lines_from`] back the append-only
//!   JSONL logs (audit trail, relay inbox).
//!
//! No caller keeps a copy of a record across calls.

use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use fs_err as fs;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::error::StoreError;
use crate::lock::RecordLock;
use crate::scope::Scope;
use crate::storage::StorageConfig;

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(2);

/// The record types kept per scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Sentinel,
    Thread,
    Tasks,
    Mute,
    Debounce,
    LastButtons,
    Relay,
    InboxCursor,
    Scheduler,
}

impl RecordKind {
    fn file_stem(&self) -> &'static str {
        match self {
            RecordKind::Sentinel => "sentinel",
            RecordKind::Thread => "thread",
            RecordKind::Tasks => "tasks",
            RecordKind::Mute => "mute",
            RecordKind::Debounce => "debounce",
            RecordKind::LastButtons => "last_buttons",
            RecordKind::Relay => "relay",
            RecordKind::InboxCursor => "inbox_cursor",
            RecordKind::Scheduler => "scheduler",
        }
    }
}

/// Identifies one record file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RecordKey {
    Scoped { scope: Scope, kind: RecordKind },
    Approval { request_id: String },
}

impl RecordKey {
    pub fn scoped(scope: &Scope, kind: RecordKind) -> Self {
        RecordKey::Scoped {
            scope: scope.clone(),
            kind,
        }
    }

    pub fn approval(request_id: &str) -> Self {
        RecordKey::Approval {
            request_id: request_id.to_string(),
        }
    }

    /// Human-readable key, recorded in lock metadata and logs.
    pub fn label(&self) -> String {
        match self {
            RecordKey::Scoped { scope, kind } => format!("{}/{}", scope, kind.file_stem()),
            RecordKey::Approval { request_id } => format!("approvals/{}", request_id),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Store {
    storage: StorageConfig,
    lock_timeout: Duration,
}

impl Store {
    pub fn new(storage: StorageConfig) -> Self {
        Self {
            storage,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    pub fn storage(&self) -> &StorageConfig {
        &self.storage
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    pub fn record_path(&self, key: &RecordKey) -> PathBuf {
        match key {
            RecordKey::Scoped { scope, kind } => self
                .storage
                .scope_dir(scope)
                .join(format!("{}.json", kind.file_stem())),
            RecordKey::Approval { request_id } => self
                .storage
                .approvals_state_dir()
                .join(format!("{}.json", request_id)),
        }
    }

    fn lock_path(record: &Path) -> PathBuf {
        record.with_extension("lock")
    }

    fn lock(&self, key: &RecordKey) -> Result<RecordLock, StoreError> {
        let path = Self::lock_path(&self.record_path(key));
        RecordLock::acquire(&path, &key.label(), self.lock_timeout)
    }

    /// Reads a record without locking.
    pub fn load<T: DeserializeOwned>(&self, key: &RecordKey) -> Result<Option<T>, StoreError> {
        let path = self.record_path(key);
        let Some(raw) = read_raw(&path)? else {
            return Ok(None);
        };
        Ok(decode(&path, &raw))
    }

    /// Replaces a record under its lock.
    pub fn save<T: Serialize>(&self, key: &RecordKey, value: &T) -> Result<(), StoreError> {
        let path = self.record_path(key);
        let _lock = self.lock(key)?;
        write_atomic(&path, value)
    }

    /// Deletes a record under its lock. Deleting a missing record is a no-op.
    pub fn clear(&self, key: &RecordKey) -> Result<(), StoreError> {
        let path = self.record_path(key);
        let _lock = self.lock(key)?;
        remove_if_exists(&path)
    }

    /// Atomic read-modify-write.
    ///
    /// `update` receives the current value (`None` if absent or unreadable)
    /// and may replace it; leaving `None` deletes the record. The record is
    /// only rewritten when its serialized content changed.
    ///
    /// `update` must not call back into the store for the same key: the lock
    /// is not re-entrant.
    pub fn with_lock<T, R, F>(&self, key: &RecordKey, update: F) -> Result<R, StoreError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(&mut Option<T>) -> R,
    {
        let path = self.record_path(key);
        let _lock = self.lock(key)?;

        let raw = read_raw(&path)?;
        let mut value: Option<T> = raw.as_deref().and_then(|raw| decode(&path, raw));
        let result = update(&mut value);

        match value {
            Some(value) => {
                let encoded = encode(&value)?;
                if raw.as_deref() != Some(encoded.as_str()) {
                    write_bytes_atomic(&path, encoded.as_bytes())?;
                }
            }
            None => {
                if raw.is_some() {
                    remove_if_exists(&path)?;
                }
            }
        }
        Ok(result)
    }

    /// Removes every record and lock file of a scope.
    pub fn clear_scope_dir(&self, scope: &Scope) -> Result<(), StoreError> {
        let dir = self.storage.scope_dir(scope);
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StoreError::io("remove scope directory", err)),
        }
    }

    /// Appends one JSON line to a log file under the log's lock.
    ///
    /// Returns the byte offset at which the line starts.
    pub fn append_line<T: Serialize>(&self, path: &Path, value: &T) -> Result<u64, StoreError> {
        let mut line = serde_json::to_string(value)
            .map_err(|e| StoreError::json("serialize log line", e))?;
        line.push('\n');

        let _lock = RecordLock::acquire(
            &Self::lock_path(path),
            &path.display().to_string(),
            self.lock_timeout,
        )?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::io("create log directory", e))?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| StoreError::io("open log", e))?;
        let offset = file
            .seek(SeekFrom::End(0))
            .map_err(|e| StoreError::io("seek log", e))?;
        file.write_all(line.as_bytes())
            .map_err(|e| StoreError::io("append log", e))?;
        Ok(offset)
    }

    /// Reads complete JSON lines starting at byte `offset`.
    ///
    /// Each entry is paired with the offset just past its line, which is the
    /// cursor value to resume from. Unparseable lines are skipped; a trailing
    /// line without a newline is not yet complete and is left for later.
    pub fn read_lines_from<T: DeserializeOwned>(
        &self,
        path: &Path,
        offset: u64,
    ) -> Result<Vec<(u64, T)>, StoreError> {
        let mut file = match fs::File::open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(StoreError::io("open log", err)),
        };

        let len = file
            .metadata()
            .map_err(|e| StoreError::io("stat log", e))?
            .len();
        // A log truncated below the cursor restarts from the beginning.
        let start = if offset > len { 0 } else { offset };
        file.seek(SeekFrom::Start(start))
            .map_err(|e| StoreError::io("seek log", e))?;
        let mut content = String::new();
        file.read_to_string(&mut content)
            .map_err(|e| StoreError::io("read log", e))?;

        let mut entries = Vec::new();
        let mut cursor = start;
        for line in content.split_inclusive('\n') {
            if !line.ends_with('\n') {
                break;
            }
            cursor += line.len() as u64;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str(trimmed) {
                Ok(value) => entries.push((cursor, value)),
                Err(err) => {
                    tracing::warn!(error = %err, path = %path.display(), "Skipping corrupt log line");
                }
            }
        }
        Ok(entries)
    }

    /// Deletes a log file under its lock.
    pub fn truncate_log(&self, path: &Path) -> Result<(), StoreError> {
        let _lock = RecordLock::acquire(
            &Self::lock_path(path),
            &path.display().to_string(),
            self.lock_timeout,
        )?;
        remove_if_exists(path)
    }

    /// Record files under the state tree that do not parse as JSON.
    pub fn corrupt_records(&self) -> Vec<PathBuf> {
        walkdir::WalkDir::new(self.storage.state_dir())
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "json"))
            .filter(|entry| {
                let Ok(content) = fs::read_to_string(entry.path()) else {
                    return true;
                };
                !content.trim().is_empty()
                    && serde_json::from_str::<serde_json::Value>(&content).is_err()
            })
            .map(|entry| entry.into_path())
            .collect()
    }
}

fn read_raw(path: &Path) -> Result<Option<String>, StoreError> {
    match fs::read_to_string(path) {
        Ok(content) if content.trim().is_empty() => Ok(None),
        Ok(content) => Ok(Some(content)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(StoreError::io("read record", err)),
    }
}

fn decode<T: DeserializeOwned>(path: &Path, raw: &str) -> Option<T> {
    match serde_json::from_str(raw) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(error = %err, path = %path.display(), "Ignoring corrupt record");
            None
        }
    }
}

fn encode<T: Serialize>(value: &T) -> Result<String, StoreError> {
    serde_json::to_string_pretty(value).map_err(|e| StoreError::json("serialize record", e))
}

fn write_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let encoded = encode(value)?;
    write_bytes_atomic(path, encoded.as_bytes())
}

fn write_bytes_atomic(path: &Path, content: &[u8]) -> Result<(), StoreError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|e| StoreError::io("create record directory", e))?;

    let mut temp_file =
        NamedTempFile::new_in(parent).map_err(|e| StoreError::io("create temp file", e))?;
    temp_file
        .write_all(content)
        .map_err(|e| StoreError::io("write temp file", e))?;
    temp_file
        .flush()
        .map_err(|e| StoreError::io("flush temp file", e))?;
    temp_file
        .persist(path)
        .map_err(|e| StoreError::io("persist record", e.error))?;
    Ok(())
}

fn remove_if_exists(path: &Path) -> Result<(), StoreError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(StoreError::io("remove record", err)),
    }
}
