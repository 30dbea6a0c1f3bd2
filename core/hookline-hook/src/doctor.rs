//! `hookline-hook doctor`: offline self-diagnostics.

use hookline_core::scheduler::CronExpr;
use hookline_core::{liveness, ApprovalGate, HooklineConfig, StorageConfig, Store};

#[derive(Debug, Clone, PartialEq)]
pub struct Check {
    pub name: &'static str,
    pub ok: bool,
    pub detail: String,
}

impl Check {
    fn new(name: &'static str, ok: bool, detail: impl Into<String>) -> Self {
        Self {
            name,
            ok,
            detail: detail.into(),
        }
    }
}

/// Runs every check against `storage`. Never fails; problems become checks.
pub fn checks(storage: &StorageConfig) -> Vec<Check> {
    let mut checks = Vec::new();

    let config = match HooklineConfig::load(storage) {
        Ok(config) => {
            checks.push(Check::new(
                "config",
                true,
                storage.config_file().display().to_string(),
            ));
            config
        }
        Err(err) => {
            checks.push(Check::new("config", false, err.to_string()));
            HooklineConfig::default()
        }
    };

    let credential_errors = config.credential_errors();
    checks.push(Check::new(
        "credentials",
        credential_errors.is_empty(),
        if credential_errors.is_empty() {
            "bot_token and chat_id set".to_string()
        } else {
            credential_errors.join("; ")
        },
    ));

    if config.schedule_enabled {
        for (name, expression) in [
            ("briefing_cron", config.briefing_cron.as_deref()),
            ("digest_cron", config.digest_cron.as_deref()),
        ] {
            let Some(expression) = expression else {
                continue;
            };
            let check = match CronExpr::parse(expression) {
                Ok(_) => Check::new(name, true, expression),
                Err(err) => Check::new(name, false, err.to_string()),
            };
            checks.push(check);
        }
    }

    checks.push(state_dir_check(storage));

    let store = Store::new(storage.clone()).with_lock_timeout(config.lock_timeout());
    let corrupt = store.corrupt_records();
    checks.push(Check::new(
        "state files",
        corrupt.is_empty(),
        if corrupt.is_empty() {
            "all valid".to_string()
        } else {
            let names: Vec<String> = corrupt
                .iter()
                .take(3)
                .map(|path| {
                    path.strip_prefix(storage.state_dir())
                        .unwrap_or(path)
                        .display()
                        .to_string()
                })
                .collect();
            format!("corrupt: {}", names.join(", "))
        },
    ));

    let daemon = liveness::running_daemon(storage);
    checks.push(Check::new(
        "daemon",
        daemon.is_some(),
        match daemon {
            Some(daemon) => format!("pid {}", daemon.pid),
            None => "not running".to_string(),
        },
    ));

    if config.approval_enabled {
        let check = match ApprovalGate::new(store).pending_count() {
            Ok(count) => Check::new("approvals", true, format!("{} pending", count)),
            Err(err) => Check::new("approvals", false, err.to_string()),
        };
        checks.push(check);
    }

    checks
}

fn state_dir_check(storage: &StorageConfig) -> Check {
    let dir = storage.state_dir();
    let marker = dir.join(".doctor");
    let result = fs_err::create_dir_all(&dir)
        .and_then(|_| fs_err::write(&marker, "ok"))
        .and_then(|_| fs_err::remove_file(&marker));
    match result {
        Ok(()) => Check::new("state dir", true, dir.display().to_string()),
        Err(err) => Check::new("state dir", false, err.to_string()),
    }
}

pub fn render(checks: &[Check]) -> Vec<String> {
    let mut lines = vec![format!("hookline {} doctor", env!("CARGO_PKG_VERSION"))];
    for check in checks {
        let mark = if check.ok { "ok " } else { "ERR" };
        lines.push(format!("  [{}] {:<14} {}", mark, check.name, check.detail));
    }
    lines.push(if checks.iter().all(|check| check.ok) {
        "All checks passed".to_string()
    } else {
        "Issues detected".to_string()
    });
    lines
}
