//! hookline-hook: relays Claude Code hook events to Telegram.
//!
//! Called directly by hooks configured in ~/.claude/settings.json.
//!
//! ## Subcommands
//!
//! - `handle`: Main hook handler, reads JSON from stdin
//! - `on` / `off` / `reset`: Manage relaying for a project (`all` = global)
//! - `status`: Show enabled scopes, daemon and relay state
//! - `doctor`: Self-diagnostics

mod approval_flow;
mod control;
mod doctor;
mod handle;
mod logging;

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use hookline_core::HooklineError;

#[derive(Parser)]
#[command(name = "hookline-hook")]
#[command(about = "Relay Claude Code hook events to Telegram")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Handle a hook event (reads JSON from stdin)
    Handle {
        /// Print messages instead of sending them and auto-approve tools
        #[arg(long)]
        dry_run: bool,
    },

    /// Enable relaying (defaults to the current directory's project)
    On {
        #[arg(value_name = "SCOPE")]
        scope: Option<String>,
    },

    /// Disable relaying
    Off {
        #[arg(value_name = "SCOPE")]
        scope: Option<String>,
    },

    /// Clear thread, task, batch and mute state
    Reset {
        #[arg(value_name = "SCOPE")]
        scope: Option<String>,
    },

    /// Show what is enabled and whether the daemon runs
    Status,

    /// Check configuration and state files
    Doctor,
}

fn main() -> ExitCode {
    let _logging_guard = logging::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Handle { dry_run } => {
            // Hook failures must not disturb the agent: log and exit 0.
            if let Err(e) = handle::run(dry_run) {
                tracing::error!(error = %e, "hookline-hook handle failed");
            }
            ExitCode::SUCCESS
        }
        Commands::On { scope } => with_store(|store, _| {
            control::on(store, &control::resolve_scope(scope.as_deref()))
        }),
        Commands::Off { scope } => with_store(|store, _| {
            control::off(store, &control::resolve_scope(scope.as_deref()))
        }),
        Commands::Reset { scope } => with_store(|store, _| {
            control::reset(store, &control::resolve_scope(scope.as_deref()))
        }),
        Commands::Status => with_store(control::status),
        Commands::Doctor => {
            let storage = match hookline_core::StorageConfig::resolve() {
                Ok(storage) => storage,
                Err(e) => {
                    eprintln!("hookline: {}", e);
                    return ExitCode::FAILURE;
                }
            };
            let checks = doctor::checks(&storage);
            for line in doctor::render(&checks) {
                println!("{}", line);
            }
            if checks.iter().all(|check| check.ok) {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

fn with_store<F>(command: F) -> ExitCode
where
    F: FnOnce(&hookline_core::Store, &hookline_core::HooklineConfig) -> Result<Vec<String>, HooklineError>,
{
    let result = control::open().and_then(|(store, config)| command(&store, &config));
    match result {
        Ok(lines) => {
            for line in lines {
                println!("{}", line);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "hookline-hook command failed");
            eprintln!("hookline: {}", e);
            ExitCode::FAILURE
        }
    }
}
