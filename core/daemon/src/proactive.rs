//! Scheduled reports: morning briefing, evening digest and periodic check-in.

use std::time::Duration;

use chrono::{DateTime, Utc};
use hookline_core::format::escape;
use hookline_core::relay::{self, ActiveSession};
use hookline_core::scheduler::{Schedule, Scheduler};
use hookline_core::{audit, HooklineConfig, HooklineError, Store};

use crate::coordinator::Coordinator;

pub const BRIEFING: &str = "briefing";
pub const DIGEST: &str = "digest";
pub const CHECKIN: &str = "checkin";

/// Builds the daemon's scheduler from config. A malformed cron expression
/// only disables its own task.
pub fn scheduler(store: &Store, config: &HooklineConfig) -> Scheduler {
    let mut scheduler = Scheduler::new(store.clone());
    if !config.schedule_enabled {
        return scheduler;
    }

    for (name, expression) in [
        (BRIEFING, config.briefing_cron.as_deref()),
        (DIGEST, config.digest_cron.as_deref()),
    ] {
        if let Some(expression) = expression.filter(|e| !e.trim().is_empty()) {
            // Failure is logged by register_cron.
            let _ = scheduler.register_cron(name, expression);
        }
    }
    if config.checkin_interval > 0 {
        scheduler.register(
            CHECKIN,
            Schedule::Every(Duration::from_secs(config.checkin_interval.saturating_mul(60))),
        );
    }
    scheduler
}

/// Text for a due task, or `None` when there is nothing worth sending.
pub fn compose(c: &Coordinator<'_>, name: &str, now: DateTime<Utc>) -> Result<Option<String>, HooklineError> {
    match name {
        BRIEFING => briefing(c),
        DIGEST => digest(c, now),
        CHECKIN => checkin(c),
        other => Err(HooklineError::TaskFailed {
            name: other.to_string(),
            details: "no such task".to_string(),
        }),
    }
}

fn session_line(session: &ActiveSession) -> String {
    let mut line = format!("  {}", escape(session.scope.as_str()));
    if session.paused {
        line.push_str(" (paused)");
    }
    if session.unread > 0 {
        line.push_str(&format!(" · {} unread", session.unread));
    }
    line
}

fn briefing(c: &Coordinator<'_>) -> Result<Option<String>, HooklineError> {
    let sessions = relay::active_sessions(&c.store)?;
    let pending = c.gate.pending_count()?;
    if sessions.is_empty() && pending == 0 {
        return Ok(None);
    }

    let mut lines = vec!["<b>Morning briefing</b>".to_string()];
    if !sessions.is_empty() {
        lines.push(format!("{} active session(s):", sessions.len()));
        lines.extend(sessions.iter().map(session_line));
    }
    if pending > 0 {
        lines.push(format!("{} approval(s) waiting", pending));
    }
    Ok(Some(lines.join("\n")))
}

fn digest(c: &Coordinator<'_>, now: DateTime<Utc>) -> Result<Option<String>, HooklineError> {
    let sessions = relay::active_sessions(&c.store)?;
    let decisions = audit::since(&c.store, now - chrono::Duration::hours(24))?;
    if sessions.is_empty() && decisions.is_empty() {
        return Ok(None);
    }

    let count = |status: &str| decisions.iter().filter(|d| d.decision == status).count();
    let mut lines = vec!["<b>Daily digest</b>".to_string()];
    if !sessions.is_empty() {
        lines.push(format!("{} active session(s):", sessions.len()));
        lines.extend(sessions.iter().map(session_line));
    }
    if !decisions.is_empty() {
        lines.push(format!(
            "Approvals in the last 24h: {} approved, {} blocked, {} timed out",
            count("approved"),
            count("blocked"),
            count("timed_out")
        ));
    }
    Ok(Some(lines.join("\n")))
}

fn checkin(c: &Coordinator<'_>) -> Result<Option<String>, HooklineError> {
    let waiting: Vec<ActiveSession> = relay::active_sessions(&c.store)?
        .into_iter()
        .filter(|session| session.paused || session.unread > 0)
        .collect();
    let pending = c.gate.pending_count()?;
    if waiting.is_empty() && pending == 0 {
        return Ok(None);
    }

    let mut lines = vec!["<b>Check-in</b>".to_string()];
    lines.extend(waiting.iter().map(session_line));
    if pending > 0 {
        lines.push(format!("{} approval(s) waiting", pending));
    }
    Ok(Some(lines.join("\n")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hookline_core::audit::AuditEntry;
    use hookline_core::transport::RecordingTransport;
    use hookline_core::{sentinel, thread, Scope, StorageConfig};
    use tempfile::tempdir;

    fn scheduled() -> HooklineConfig {
        HooklineConfig {
            schedule_enabled: true,
            checkin_interval: 15,
            ..HooklineConfig::default()
        }
    }

    #[test]
    fn registers_tasks_only_when_enabled() {
        let temp = tempdir().unwrap();
        let store = Store::new(StorageConfig::with_root(temp.path().to_path_buf()));

        assert!(scheduler(&store, &HooklineConfig::default()).tasks().is_empty());
        let names: Vec<String> = scheduler(&store, &scheduled())
            .tasks()
            .iter()
            .map(|task| task.name.clone())
            .collect();
        assert_eq!(names, vec![BRIEFING, DIGEST, CHECKIN]);
    }

    #[test]
    fn bad_cron_disables_only_its_task() {
        let temp = tempdir().unwrap();
        let store = Store::new(StorageConfig::with_root(temp.path().to_path_buf()));
        let config = HooklineConfig {
            briefing_cron: Some("0 25 * * *".to_string()),
            ..scheduled()
        };
        let names: Vec<String> = scheduler(&store, &config)
            .tasks()
            .iter()
            .map(|task| task.name.clone())
            .collect();
        assert_eq!(names, vec![DIGEST, CHECKIN]);
    }

    #[test]
    fn quiet_day_reports_nothing() {
        let temp = tempdir().unwrap();
        let store = Store::new(StorageConfig::with_root(temp.path().to_path_buf()));
        let transport = RecordingTransport::new();
        let c = Coordinator::new(store, scheduled(), &transport);
        let now = Utc::now();

        for name in [BRIEFING, DIGEST, CHECKIN] {
            assert_eq!(compose(&c, name, now).unwrap(), None);
        }
        assert!(compose(&c, "nightly", now).is_err());
    }

    #[test]
    fn digest_counts_recent_decisions() {
        let temp = tempdir().unwrap();
        let store = Store::new(StorageConfig::with_root(temp.path().to_path_buf()));
        let transport = RecordingTransport::new();
        let c = Coordinator::new(store.clone(), scheduled(), &transport);
        let now = Utc::now();
        let entry = |decision: &str, hours_ago: i64| AuditEntry {
            timestamp: now - chrono::Duration::hours(hours_ago),
            request_id: format!("{}-{}", decision, hours_ago),
            scope: "demo".to_string(),
            tool_name: "Bash".to_string(),
            decision: decision.to_string(),
            responder: None,
            reason: None,
        };
        audit::record(&store, &entry("approved", 1)).unwrap();
        audit::record(&store, &entry("blocked", 2)).unwrap();
        audit::record(&store, &entry("approved", 30)).unwrap();

        let text = compose(&c, DIGEST, now).unwrap().unwrap();
        assert!(text.contains("1 approved, 1 blocked, 0 timed out"));
    }

    #[test]
    fn checkin_lists_sessions_needing_attention() {
        let temp = tempdir().unwrap();
        let store = Store::new(StorageConfig::with_root(temp.path().to_path_buf()));
        let transport = RecordingTransport::new();
        let c = Coordinator::new(store.clone(), scheduled(), &transport);
        let now = Utc::now();
        for (name, root) in [("alpha", 1), ("beta", 2)] {
            let scope = Scope::project(name);
            sentinel::enable(&store, &scope, now).unwrap();
            thread::bind(&store, &scope, root, None, now).unwrap();
        }
        relay::set_paused(&store, &Scope::project("beta"), true, Some("ana"), now).unwrap();

        let text = compose(&c, CHECKIN, now).unwrap().unwrap();
        assert!(text.contains("beta (paused)"));
        assert!(!text.contains("alpha"));
    }

    #[test]
    fn tick_sends_due_report_and_records_run() {
        let temp = tempdir().unwrap();
        let store = Store::new(StorageConfig::with_root(temp.path().to_path_buf()));
        let transport = RecordingTransport::new();
        let config = HooklineConfig {
            briefing_cron: Some("* * * * *".to_string()),
            digest_cron: None,
            ..scheduled()
        };
        let c = Coordinator::new(store.clone(), config, &transport);
        let now = Utc::now();
        let demo = Scope::project("demo");
        sentinel::enable(&store, &demo, now).unwrap();
        thread::bind(&store, &demo, 5, None, now).unwrap();

        let report = c.process(&[], now);
        assert_eq!(report.ran, vec![BRIEFING.to_string(), CHECKIN.to_string()]);
        assert_eq!(transport.sent().len(), 1);
        assert!(transport.sent()[0].1.text.contains("Morning briefing"));
        assert!(c.process(&[], now).ran.is_empty());
    }
}
