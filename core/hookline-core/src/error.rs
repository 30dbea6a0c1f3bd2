//! Error types for hookline-core operations.

use std::path::PathBuf;

/// Errors raised by the durable state store and its locks.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON serialization error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    /// The lock could not be acquired within the configured bound.
    ///
    /// `holder_alive` is `Some(false)` when the recorded holder process is
    /// gone (the lock is then about to be released by the kernel) and `None`
    /// when no holder metadata could be read.
    #[error("Timed out after {waited_ms}ms waiting for lock {path} (holder pid {holder_pid:?}, alive {holder_alive:?})")]
    LockTimeout {
        path: PathBuf,
        waited_ms: u64,
        holder_pid: Option<u32>,
        holder_alive: Option<bool>,
    },

    #[error("Home directory not found")]
    NoHome,
}

impl StoreError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        StoreError::Io {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn json(context: impl Into<String>, source: serde_json::Error) -> Self {
        StoreError::Json {
            context: context.into(),
            source,
        }
    }

    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::LockTimeout { .. } | StoreError::Io { .. })
    }
}

/// Errors raised by messaging transports.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Transport is not configured: {0}")]
    NotConfigured(String),

    #[error("Request to {method} failed: {details}")]
    Request { method: String, details: String },

    #[error("Provider rejected {method}: {description}")]
    Rejected { method: String, description: String },

    #[error("Malformed provider response for {method}: {details}")]
    MalformedResponse { method: String, details: String },
}

/// Errors raised while parsing schedules.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    #[error("Invalid cron expression {expression:?}: {reason}")]
    InvalidExpression { expression: String, reason: String },
}

/// All errors that can occur in hookline-core operations.
#[derive(Debug, thiserror::Error)]
pub enum HooklineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    #[error("Approval setup failed: {context}: {source}")]
    ApprovalSetup {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Task {name} failed: {details}")]
    TaskFailed { name: String, details: String },
}

/// Convenience alias for Results with HooklineError.
pub type Result<T> = std::result::Result<T, HooklineError>;
