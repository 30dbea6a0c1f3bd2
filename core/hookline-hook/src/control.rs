//! Terminal commands that switch relaying on and off and report state.
//!
//! Each command returns the lines to print so the output can be checked
//! without a terminal.

use std::env;

use chrono::{SecondsFormat, Utc};
use hookline_core::scheduler::Scheduler;
use hookline_core::{
    liveness, mute, relay, sentinel, ApprovalGate, HooklineConfig, HooklineError, Scope,
    StorageConfig, Store,
};

/// Loads config and opens the store the same way the hook does.
pub fn open() -> Result<(Store, HooklineConfig), HooklineError> {
    let storage = StorageConfig::resolve()?;
    let config = HooklineConfig::load(&storage)?;
    let store = Store::new(storage).with_lock_timeout(config.lock_timeout());
    Ok((store, config))
}

/// Explicit token, else the current directory's project, else global.
pub fn resolve_scope(token: Option<&str>) -> Scope {
    match token {
        Some(token) => Scope::parse(token),
        None => env::current_dir()
            .ok()
            .and_then(|dir| dir.file_name().map(|name| name.to_string_lossy().to_string()))
            .map(|name| Scope::project(&name))
            .unwrap_or(Scope::Global),
    }
}

pub fn on(store: &Store, scope: &Scope) -> Result<Vec<String>, HooklineError> {
    let record = sentinel::enable(store, scope, Utc::now())?;
    let since = record.enabled_at.to_rfc3339_opts(SecondsFormat::Secs, true);
    Ok(vec![format!("hookline ON for {} (since {})", label(scope), since)])
}

pub fn off(store: &Store, scope: &Scope) -> Result<Vec<String>, HooklineError> {
    let was_on = sentinel::list(store)?.iter().any(|(enabled, _)| enabled == scope);
    sentinel::disable(store, scope)?;
    Ok(vec![if was_on {
        format!("hookline OFF for {}", label(scope))
    } else {
        format!("hookline already OFF for {}", label(scope))
    }])
}

/// Clears session records and mutes; `global` resets every project too.
pub fn reset(store: &Store, scope: &Scope) -> Result<Vec<String>, HooklineError> {
    let scopes: Vec<Scope> = if scope.is_global() {
        std::iter::once(Scope::Global)
            .chain(store.storage().project_scopes())
            .collect()
    } else {
        vec![scope.clone()]
    };

    for target in &scopes {
        sentinel::reset_session_state(store, target)?;
        mute::unmute(store, target)?;
    }

    Ok(vec![if scope.is_global() {
        format!("Reset state for {} scope(s)", scopes.len())
    } else {
        format!("Reset state for {}", label(scope))
    }])
}

pub fn status(store: &Store, config: &HooklineConfig) -> Result<Vec<String>, HooklineError> {
    let mut lines = vec!["hookline status".to_string()];

    let enabled = sentinel::list(store)?;
    if enabled.is_empty() {
        lines.push("  all relaying disabled".to_string());
    }
    for (scope, record) in &enabled {
        lines.push(format!(
            "  {:<12} ON  (since {})",
            scope.as_str(),
            record.enabled_at.to_rfc3339_opts(SecondsFormat::Secs, true)
        ));
    }

    lines.push(String::new());
    lines.push(match liveness::running_daemon(store.storage()) {
        Some(daemon) => format!("  daemon       running (pid {})", daemon.pid),
        None => "  daemon       stopped".to_string(),
    });

    if config.approval_enabled {
        let pending = ApprovalGate::new(store.clone()).pending_count()?;
        lines.push(format!("  approvals    ON ({} pending)", pending));
    } else {
        lines.push("  approvals    OFF".to_string());
    }

    if config.relay_enabled {
        let sessions = relay::active_sessions(store)?;
        lines.push(format!("  relay        ON ({} session(s))", sessions.len()));
        for session in sessions {
            let mut notes = Vec::new();
            if session.paused {
                notes.push("paused".to_string());
            }
            if session.unread > 0 {
                notes.push(format!("{} unread", session.unread));
            }
            let extra = if notes.is_empty() {
                String::new()
            } else {
                format!(" ({})", notes.join(", "))
            };
            lines.push(format!("    - {}{}", session.scope, extra));
        }
    } else {
        lines.push("  relay        OFF".to_string());
    }

    if config.schedule_enabled {
        let log = Scheduler::new(store.clone()).run_log()?;
        lines.push(format!("  scheduler    ON ({} task(s) run)", log.tasks.len()));
        for (name, last_run) in &log.tasks {
            lines.push(format!(
                "    - {} last ran {}",
                name,
                last_run.to_rfc3339_opts(SecondsFormat::Secs, true)
            ));
        }
    } else {
        lines.push("  scheduler    OFF".to_string());
    }

    Ok(lines)
}

fn label(scope: &Scope) -> String {
    match scope {
        Scope::Global => "global".to_string(),
        Scope::Project(name) => format!("'{}'", name),
    }
}
