//! User configuration.
//!
//! Values come from `~/.hookline/config.json` (every field optional), then
//! `HOOKLINE_*` environment variables override individual settings. Booleans
//! in the environment are `"1"` for true and anything else for false; lists
//! are comma-separated.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::HooklineError;
use crate::storage::StorageConfig;

pub const DEFAULT_DEBOUNCE_EVENTS: [&str; 2] = ["SubagentStop", "TeammateIdle"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HooklineConfig {
    pub bot_token: String,
    pub chat_id: String,

    /// Seconds a debounce batch may stay open.
    pub debounce_window: u64,
    pub debounce_events: Vec<String>,

    pub approval_enabled: bool,
    /// Seconds a tool call waits for a decision.
    pub approval_timeout: u64,
    /// User allowed to press approval buttons; empty means `chat_id`.
    pub approval_user: String,

    pub relay_enabled: bool,

    pub schedule_enabled: bool,
    pub briefing_cron: Option<String>,
    pub digest_cron: Option<String>,
    /// Minutes between check-ins; 0 disables them.
    pub checkin_interval: u64,

    /// Event kinds never relayed.
    pub suppress: Vec<String>,
    /// Seconds a session must have run before events are relayed.
    pub min_session_age: u64,
    pub show_buttons: bool,

    pub lock_timeout_ms: u64,
    /// Seconds per long-poll request in the daemon.
    pub poll_timeout: u64,
}

impl Default for HooklineConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            chat_id: String::new(),
            debounce_window: 30,
            debounce_events: DEFAULT_DEBOUNCE_EVENTS.iter().map(|s| s.to_string()).collect(),
            approval_enabled: false,
            approval_timeout: 120,
            approval_user: String::new(),
            relay_enabled: false,
            schedule_enabled: false,
            briefing_cron: Some("0 9 * * 1-5".to_string()),
            digest_cron: Some("0 18 * * 1-5".to_string()),
            checkin_interval: 0,
            suppress: Vec::new(),
            min_session_age: 0,
            show_buttons: true,
            lock_timeout_ms: 2000,
            poll_timeout: 30,
        }
    }
}

impl HooklineConfig {
    /// Loads `config.json` from `storage` and applies the process environment.
    ///
    /// A missing file yields defaults; a malformed one is an error.
    pub fn load(storage: &StorageConfig) -> Result<Self, HooklineError> {
        let mut config = Self::from_file(&storage.config_file())?;
        config.apply_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, HooklineError> {
        let content = match fs_err::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => {
                return Err(HooklineError::ConfigMalformed {
                    path: path.to_path_buf(),
                    details: err.to_string(),
                })
            }
        };
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(&content).map_err(|e| HooklineError::ConfigMalformed {
            path: path.to_path_buf(),
            details: e.to_string(),
        })
    }

    /// Applies environment overrides. `lookup` returns a variable's value.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let either = |primary: &str, fallback: &str| lookup(primary).or_else(|| lookup(fallback));

        if let Some(token) = either("HOOKLINE_BOT_TOKEN", "TELEGRAM_BOT_TOKEN") {
            self.bot_token = token;
        }
        if let Some(chat) = either("HOOKLINE_CHAT_ID", "TELEGRAM_CHAT_ID") {
            self.chat_id = chat;
        }
        if let Some(user) = lookup("HOOKLINE_APPROVAL_USER") {
            self.approval_user = user;
        }

        let flag = |name: &str, target: &mut bool| {
            if let Some(value) = lookup(name) {
                *target = value.trim() == "1";
            }
        };
        flag("HOOKLINE_APPROVAL", &mut self.approval_enabled);
        flag("HOOKLINE_RELAY", &mut self.relay_enabled);
        flag("HOOKLINE_SCHEDULE", &mut self.schedule_enabled);
        flag("HOOKLINE_BUTTONS", &mut self.show_buttons);

        let number = |name: &str, target: &mut u64| {
            if let Some(value) = lookup(name) {
                match value.trim().parse() {
                    Ok(parsed) => *target = parsed,
                    Err(_) => tracing::warn!(variable = name, value = %value, "Ignoring non-numeric override"),
                }
            }
        };
        number("HOOKLINE_DEBOUNCE", &mut self.debounce_window);
        number("HOOKLINE_APPROVAL_TIMEOUT", &mut self.approval_timeout);
        number("HOOKLINE_MIN_AGE", &mut self.min_session_age);
        number("HOOKLINE_LOCK_TIMEOUT_MS", &mut self.lock_timeout_ms);
        number("HOOKLINE_CHECKIN_INTERVAL", &mut self.checkin_interval);

        if let Some(list) = lookup("HOOKLINE_SUPPRESS") {
            self.suppress = list
                .split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect();
        }
    }

    pub fn debounce_window(&self) -> chrono::Duration {
        bounded_seconds(self.debounce_window)
    }

    pub fn approval_timeout(&self) -> Duration {
        Duration::from_secs(self.approval_timeout)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout)
    }

    pub fn min_session_age(&self) -> chrono::Duration {
        bounded_seconds(self.min_session_age)
    }

    pub fn approval_user(&self) -> &str {
        if self.approval_user.is_empty() {
            &self.chat_id
        } else {
            &self.approval_user
        }
    }

    pub fn is_debounced(&self, kind: &str) -> bool {
        self.debounce_events.iter().any(|k| k == kind)
    }

    pub fn is_suppressed(&self, kind: &str) -> bool {
        self.suppress.iter().any(|k| k == kind)
    }

    pub fn has_credentials(&self) -> bool {
        !self.bot_token.is_empty() && !self.chat_id.is_empty()
    }

    /// Format problems with the configured credentials.
    pub fn credential_errors(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.bot_token.is_empty() {
            errors.push("bot_token: not set".to_string());
        } else if !self.bot_token.contains(':') {
            errors.push("bot_token: expected <digits>:<secret>".to_string());
        }
        let chat = self.chat_id.trim_start_matches('-');
        if self.chat_id.is_empty() {
            errors.push("chat_id: not set".to_string());
        } else if chat.is_empty() || !chat.chars().all(|c| c.is_ascii_digit()) {
            errors.push("chat_id: expected a numeric id".to_string());
        }
        errors
    }
}

/// Longest configurable window; larger values are clamped.
const MAX_WINDOW_SECS: u64 = 365 * 24 * 3600;

fn bounded_seconds(seconds: u64) -> chrono::Duration {
    chrono::Duration::seconds(seconds.min(MAX_WINDOW_SECS) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn missing_file_gives_defaults() {
        let temp = tempdir().unwrap();
        let config = HooklineConfig::from_file(&temp.path().join("config.json")).unwrap();
        assert_eq!(config, HooklineConfig::default());
        assert!(config.is_debounced("SubagentStop"));
        assert!(!config.is_debounced("Stop"));
    }

    #[test]
    fn file_values_then_env_overrides() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("config.json");
        fs_err::write(
            &path,
            r#"{"chat_id":"42","debounce_window":10,"approval_enabled":true,"suppress":["Notification"]}"#,
        )
        .unwrap();

        let mut config = HooklineConfig::from_file(&path).unwrap();
        assert_eq!(config.debounce_window, 10);
        assert!(config.is_suppressed("Notification"));

        config.apply_overrides(env(&[
            ("TELEGRAM_BOT_TOKEN", "1:abc"),
            ("HOOKLINE_APPROVAL", "0"),
            ("HOOKLINE_DEBOUNCE", "5"),
            ("HOOKLINE_SUPPRESS", "Stop, TaskCompleted"),
        ]));
        assert_eq!(config.bot_token, "1:abc");
        assert!(!config.approval_enabled);
        assert_eq!(config.debounce_window, 5);
        assert_eq!(config.suppress, vec!["Stop", "TaskCompleted"]);
        assert_eq!(config.approval_user(), "42");
        assert!(config.credential_errors().is_empty());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("config.json");
        fs_err::write(&path, "{oops").unwrap();
        assert!(matches!(
            HooklineConfig::from_file(&path),
            Err(HooklineError::ConfigMalformed { .. })
        ));
    }

    #[test]
    fn credential_format_is_checked() {
        let config = HooklineConfig {
            bot_token: "nocolon".to_string(),
            chat_id: "-100abc".to_string(),
            ..HooklineConfig::default()
        };
        assert_eq!(config.credential_errors().len(), 2);
    }

    #[test]
    fn huge_windows_are_clamped() {
        let mut config = HooklineConfig::default();
        config.apply_overrides(env(&[("HOOKLINE_DEBOUNCE", "18446744073709551615")]));
        config.min_session_age = u64::MAX;

        assert_eq!(config.debounce_window(), chrono::Duration::days(365));
        assert_eq!(config.min_session_age(), chrono::Duration::days(365));
    }
}
