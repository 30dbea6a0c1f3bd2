//! Text commands sent from the chat.
//!
//! Each entry names the capability it needs; a disabled capability is
//! reported instead of dispatching.

use chrono::{DateTime, SecondsFormat, Utc};
use hookline_core::format::{escape, truncate};
use hookline_core::{relay, HooklineError, Scope};

use crate::coordinator::Coordinator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Send,
    Pause,
    Resume,
    Sessions,
    Inbox,
    Clear,
    Schedule,
    Help,
}

/// Config switch a command depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Relay,
    Schedule,
    None,
}

#[derive(Debug)]
pub struct CommandEntry {
    pub command: Command,
    pub name: &'static str,
    pub capability: Capability,
    /// Needs a session (from the replied-to thread or the only active one).
    pub scoped: bool,
    pub usage: &'static str,
    pub summary: &'static str,
}

pub const COMMANDS: &[CommandEntry] = &[
    CommandEntry {
        command: Command::Send,
        name: "send",
        capability: Capability::Relay,
        scoped: true,
        usage: "send <message>",
        summary: "Queue a message for the session",
    },
    CommandEntry {
        command: Command::Pause,
        name: "pause",
        capability: Capability::Relay,
        scoped: true,
        usage: "pause",
        summary: "Block the session's tool calls",
    },
    CommandEntry {
        command: Command::Resume,
        name: "resume",
        capability: Capability::Relay,
        scoped: true,
        usage: "resume",
        summary: "Let a paused session continue",
    },
    CommandEntry {
        command: Command::Sessions,
        name: "sessions",
        capability: Capability::None,
        scoped: false,
        usage: "sessions",
        summary: "List active sessions",
    },
    CommandEntry {
        command: Command::Inbox,
        name: "inbox",
        capability: Capability::None,
        scoped: true,
        usage: "inbox",
        summary: "Show unread queued messages",
    },
    CommandEntry {
        command: Command::Clear,
        name: "clear",
        capability: Capability::None,
        scoped: true,
        usage: "clear",
        summary: "Drop queued messages",
    },
    CommandEntry {
        command: Command::Schedule,
        name: "schedule",
        capability: Capability::Schedule,
        scoped: false,
        usage: "schedule",
        summary: "Show scheduled tasks",
    },
    CommandEntry {
        command: Command::Help,
        name: "help",
        capability: Capability::None,
        scoped: false,
        usage: "help",
        summary: "Show this list",
    },
];

const INBOX_LIMIT: usize = 10;

pub fn lookup(name: &str) -> Option<&'static CommandEntry> {
    let name = name.trim().to_ascii_lowercase();
    COMMANDS.iter().find(|entry| entry.name == name)
}

/// Splits `"send hello there"` into `("send", "hello there")`.
pub fn split(text: &str) -> (&str, &str) {
    let text = text.trim();
    match text.split_once(char::is_whitespace) {
        Some((name, args)) => (name, args.trim()),
        None => (text, ""),
    }
}

pub struct Invocation<'a> {
    pub scope: Option<Scope>,
    pub args: &'a str,
    pub sender: &'a str,
}

/// Runs a command and returns the reply text.
pub fn execute(
    coordinator: &Coordinator<'_>,
    entry: &CommandEntry,
    invocation: &Invocation<'_>,
    now: DateTime<Utc>,
) -> Result<String, HooklineError> {
    match entry.capability {
        Capability::Relay if !coordinator.config.relay_enabled => {
            return Ok("Relay is disabled. Set <code>relay_enabled: true</code> in config.json".to_string());
        }
        Capability::Schedule if !coordinator.config.schedule_enabled => {
            return Ok("Scheduling is disabled. Set <code>schedule_enabled: true</code> in config.json".to_string());
        }
        _ => {}
    }

    let scope = match (&invocation.scope, entry.scoped) {
        (Some(scope), _) => Some(scope),
        (None, true) => return Ok("No active session found for this thread.".to_string()),
        (None, false) => None,
    };

    let store = &coordinator.store;
    let text = match (entry.command, scope) {
        (Command::Send, Some(scope)) => {
            if invocation.args.is_empty() {
                return Ok(format!("Usage: <code>{}</code>", escape(entry.usage)));
            }
            let id = relay::write(store, scope, invocation.sender, invocation.args, now)?;
            format!("Queued to <b>{}</b> (id: <code>{}</code>)", escape(scope.as_str()), id)
        }
        (Command::Pause, Some(scope)) => {
            if relay::is_paused(store, scope)? {
                format!("<b>{}</b> is already paused.", escape(scope.as_str()))
            } else {
                relay::set_paused(store, scope, true, Some(invocation.sender), now)?;
                format!(
                    "Paused <b>{}</b>. Reply <code>resume</code> to continue.",
                    escape(scope.as_str())
                )
            }
        }
        (Command::Resume, Some(scope)) => {
            if relay::is_paused(store, scope)? {
                relay::set_paused(store, scope, false, Some(invocation.sender), now)?;
                format!("Resumed <b>{}</b>.", escape(scope.as_str()))
            } else {
                format!("<b>{}</b> is not paused.", escape(scope.as_str()))
            }
        }
        (Command::Inbox, Some(scope)) => inbox(coordinator, scope)?,
        (Command::Clear, Some(scope)) => {
            relay::clear_inbox(store, scope)?;
            format!("Cleared inbox for <b>{}</b>.", escape(scope.as_str()))
        }
        (Command::Sessions, _) => sessions(coordinator)?,
        (Command::Schedule, _) => schedule(coordinator)?,
        (Command::Help, _) => help(),
        (_, None) => "No active session found for this thread.".to_string(),
    };
    Ok(text)
}

fn inbox(coordinator: &Coordinator<'_>, scope: &Scope) -> Result<String, HooklineError> {
    let messages = relay::unread(&coordinator.store, scope)?;
    if messages.is_empty() {
        return Ok(format!("No unread messages for <b>{}</b>.", escape(scope.as_str())));
    }
    let mut lines = vec![format!(
        "<b>Inbox · {}</b> ({} unread)",
        escape(scope.as_str()),
        messages.len()
    )];
    for message in &messages[messages.len().saturating_sub(INBOX_LIMIT)..] {
        lines.push(format!(
            "[{}] {}  <i>{}</i>",
            escape(&message.sender),
            escape(&truncate(&message.text, 200)),
            message.at.to_rfc3339_opts(SecondsFormat::Secs, true)
        ));
    }
    Ok(lines.join("\n"))
}

fn sessions(coordinator: &Coordinator<'_>) -> Result<String, HooklineError> {
    let sessions = relay::active_sessions(&coordinator.store)?;
    if sessions.is_empty() {
        return Ok("No active sessions.".to_string());
    }
    let mut lines = vec!["<b>Active sessions</b>".to_string()];
    for session in sessions {
        let mut notes = Vec::new();
        if session.paused {
            notes.push("PAUSED".to_string());
        }
        if session.unread > 0 {
            notes.push(format!("{} unread", session.unread));
        }
        let extra = if notes.is_empty() {
            String::new()
        } else {
            format!(" ({})", notes.join(", "))
        };
        lines.push(format!("  {}{}", escape(session.scope.as_str()), extra));
    }
    Ok(lines.join("\n"))
}

fn schedule(coordinator: &Coordinator<'_>) -> Result<String, HooklineError> {
    let status = coordinator.scheduler.status()?;
    if status.is_empty() {
        return Ok("No scheduled tasks.".to_string());
    }
    let mut lines = vec!["<b>Scheduled tasks</b>".to_string()];
    for task in status {
        let last = task
            .last_run
            .map(|at| at.to_rfc3339_opts(SecondsFormat::Secs, true))
            .unwrap_or_else(|| "never".to_string());
        lines.push(format!("  {} ({}) last run: {}", escape(&task.name), task.kind, last));
    }
    Ok(lines.join("\n"))
}

fn help() -> String {
    let mut lines = vec!["<b>Commands</b>".to_string()];
    for entry in COMMANDS {
        lines.push(format!("  <code>{}</code> · {}", escape(entry.usage), entry.summary));
    }
    lines.push("Reply to a session's thread to target it.".to_string());
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use hookline_core::transport::RecordingTransport;
    use hookline_core::{HooklineConfig, StorageConfig, Store};
    use tempfile::tempdir;

    fn invocation<'a>(scope: Option<Scope>, args: &'a str) -> Invocation<'a> {
        Invocation {
            scope,
            args,
            sender: "ana",
        }
    }

    #[test]
    fn lookup_is_case_insensitive_and_split_trims() {
        assert_eq!(lookup("PAUSE").unwrap().command, Command::Pause);
        assert!(lookup("deploy").is_none());
        assert_eq!(split("  send  hello there "), ("send", "hello there"));
        assert_eq!(split("help"), ("help", ""));
    }

    #[test]
    fn relay_commands_require_capability() {
        let temp = tempdir().unwrap();
        let store = Store::new(StorageConfig::with_root(temp.path().to_path_buf()));
        let transport = RecordingTransport::new();
        let coordinator = Coordinator::new(store, HooklineConfig::default(), &transport);

        let reply = execute(
            &coordinator,
            lookup("send").unwrap(),
            &invocation(Some(Scope::project("demo")), "hi"),
            Utc::now(),
        )
        .unwrap();
        assert!(reply.contains("Relay is disabled"));
    }

    #[test]
    fn pause_resume_and_send_act_on_scope() {
        let temp = tempdir().unwrap();
        let store = Store::new(StorageConfig::with_root(temp.path().to_path_buf()));
        let transport = RecordingTransport::new();
        let config = HooklineConfig {
            relay_enabled: true,
            ..HooklineConfig::default()
        };
        let coordinator = Coordinator::new(store.clone(), config, &transport);
        let demo = Scope::project("demo");
        let now = Utc::now();

        let run = |name: &str, args: &str| {
            execute(&coordinator, lookup(name).unwrap(), &invocation(Some(demo.clone()), args), now)
                .unwrap()
        };

        assert!(run("pause", "").starts_with("Paused"));
        assert!(relay::is_paused(&store, &demo).unwrap());
        assert!(run("pause", "").contains("already paused"));
        assert!(run("resume", "").starts_with("Resumed"));
        assert!(!relay::is_paused(&store, &demo).unwrap());

        assert!(run("send", "").starts_with("Usage"));
        assert!(run("send", "run the linter").starts_with("Queued"));
        let unread = relay::unread(&store, &demo).unwrap();
        assert_eq!(unread[0].sender, "ana");
        assert!(run("inbox", "").contains("run the linter"));
        run("clear", "");
        assert!(relay::unread(&store, &demo).unwrap().is_empty());
    }

    #[test]
    fn scoped_command_without_session_is_explained() {
        let temp = tempdir().unwrap();
        let store = Store::new(StorageConfig::with_root(temp.path().to_path_buf()));
        let transport = RecordingTransport::new();
        let coordinator = Coordinator::new(store, HooklineConfig::default(), &transport);

        let reply = execute(&coordinator, lookup("inbox").unwrap(), &invocation(None, ""), Utc::now())
            .unwrap();
        assert!(reply.contains("No active session"));
        let help = execute(&coordinator, lookup("help").unwrap(), &invocation(None, ""), Utc::now())
            .unwrap();
        assert!(help.contains("send &lt;message&gt;"));
    }
}
