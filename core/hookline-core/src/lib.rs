//! # hookline-core
//!
//! Cross-process coordination for hookline: many short-lived hook processes
//! and one long-running daemon cooperating only through files under
//! `~/.hookline`.
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime. Hooks are one-shot processes; the
//!   daemon is a single-threaded loop.
//! - **No shared memory**: Every piece of state is a small JSON record read
//!   fresh from disk and changed under its advisory lock ([`store`]).
//! - **Graceful degradation**: Missing or corrupt records read as absent.
//! - **Fail closed**: Anything short of an explicit approval blocks a tool.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use hookline_core::{sentinel, Scope, StorageConfig, Store};
//!
//! let store = Store::new(StorageConfig::resolve()?);
//! sentinel::enable(&store, &Scope::project("demo"), chrono::Utc::now())?;
//! ```

pub mod approval;
pub mod audit;
pub mod buttons;
pub mod config;
pub mod debounce;
pub mod error;
pub mod format;
pub mod liveness;
pub mod lock;
pub mod mute;
pub mod notifier;
pub mod relay;
pub mod scheduler;
pub mod scope;
pub mod sentinel;
pub mod storage;
pub mod store;
pub mod tasks;
pub mod thread;
pub mod transport;

pub use approval::{ApprovalGate, ApprovalOutcome, ApprovalRequest, ApprovalStatus, ResolveOutcome};
pub use config::HooklineConfig;
pub use error::{HooklineError, Result, ScheduleError, StoreError, TransportError};
pub use notifier::{Buttons, Notifier};
pub use scope::Scope;
pub use storage::StorageConfig;
pub use store::{RecordKey, RecordKind, Store};
pub use transport::Transport;
