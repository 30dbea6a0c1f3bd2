//! hookline daemon entrypoint.
//!
//! A single long-running coordinator: it long-polls the messaging provider for
//! replies and button presses, flushes debounce batches nobody else flushed,
//! times out orphaned approvals and runs scheduled reports. All state lives in
//! the store shared with the hook processes.

use std::env;

use hookline_core::transport::TelegramTransport;
use hookline_core::{liveness, HooklineConfig, StorageConfig, Store};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod backoff;
mod commands;
mod coordinator;
mod proactive;
mod replies;

use coordinator::Coordinator;

fn main() {
    init_logging();

    let storage = match StorageConfig::resolve() {
        Ok(storage) => storage,
        Err(err) => {
            error!(error = %err, "Failed to resolve hookline home");
            std::process::exit(1);
        }
    };

    backoff::apply_startup_backoff(&storage.daemon_dir().join("daemon-backoff.json"));

    let config = match HooklineConfig::load(&storage) {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "Failed to load configuration");
            std::process::exit(1);
        }
    };

    if let Some(running) = liveness::running_daemon(&storage) {
        error!(pid = running.pid, "Another hookline daemon is already running");
        std::process::exit(1);
    }

    let transport = match TelegramTransport::new(&config.bot_token, &config.chat_id) {
        Ok(transport) => transport,
        Err(err) => {
            error!(error = %err, "Telegram is not configured");
            std::process::exit(1);
        }
    };

    let store = Store::new(storage.clone()).with_lock_timeout(config.lock_timeout());
    match liveness::write_pid_file(&storage) {
        Ok(record) => info!(pid = record.pid, root = %storage.root().display(), "hookline daemon started"),
        Err(err) => {
            error!(error = %err, "Failed to write pid file");
            std::process::exit(1);
        }
    }

    let _pid_guard = PidGuard(storage);

    Coordinator::new(store, config, &transport).run();
}

/// Drops the pid file if the loop unwinds.
struct PidGuard(StorageConfig);

impl Drop for PidGuard {
    fn drop(&mut self) {
        liveness::remove_pid_file(&self.0);
    }
}

fn init_logging() {
    let debug_enabled = env::var("HOOKLINE_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
