//! Wire types shared by the hookline hook handler and daemon.
//!
//! Both processes speak through the filesystem and through the messaging
//! provider, never directly to each other. This crate keeps the payloads they
//! exchange (hook stdin, hook decisions, button callbacks, inbound replies) in
//! one place to prevent schema drift.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

/// Provider-assigned message identifier.
pub type MessageId = i64;

/// Maximum bytes of tool input echoed into an approval request.
pub const MAX_SUMMARY_CHARS: usize = 200;

// -----------------------------------------------------------------------------
// Hook input (Claude Code → hook stdin)
// -----------------------------------------------------------------------------

/// Raw JSON payload Claude Code writes to the hook's stdin.
///
/// Only the fields hookline consumes are modeled; unknown fields are ignored
/// because the runtime adds new ones freely.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct HookInput {
    #[serde(default)]
    pub hook_event_name: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub transcript_path: Option<String>,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub tool_input: Option<Value>,
    #[serde(default)]
    pub teammate_name: Option<String>,
    #[serde(default)]
    pub task_id: Option<Value>,
    #[serde(default)]
    pub task_description: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub notification_type: Option<String>,
    #[serde(default)]
    pub stop_hook_active: Option<bool>,
}

/// Parsed lifecycle event.
#[derive(Debug, Clone, PartialEq)]
pub enum HookEvent {
    SessionStart,
    Stop {
        stop_hook_active: bool,
    },
    SubagentStop,
    TeammateIdle {
        teammate_name: Option<String>,
    },
    TaskCompleted {
        task_id: Option<String>,
        description: Option<String>,
    },
    Notification {
        message: Option<String>,
        notification_type: Option<String>,
    },
    PreToolUse {
        tool_name: String,
        tool_input: Option<Value>,
    },
    Unknown {
        event_name: String,
    },
}

impl HookEvent {
    /// Event kind as named by the runtime (`"SubagentStop"`, ...).
    pub fn kind(&self) -> &str {
        match self {
            HookEvent::SessionStart => "SessionStart",
            HookEvent::Stop { .. } => "Stop",
            HookEvent::SubagentStop => "SubagentStop",
            HookEvent::TeammateIdle { .. } => "TeammateIdle",
            HookEvent::TaskCompleted { .. } => "TaskCompleted",
            HookEvent::Notification { .. } => "Notification",
            HookEvent::PreToolUse { .. } => "PreToolUse",
            HookEvent::Unknown { event_name } => event_name,
        }
    }

    /// Label recorded for a debounced entry, if the kind carries one.
    pub fn label(&self) -> Option<&str> {
        match self {
            HookEvent::TeammateIdle { teammate_name } => teammate_name.as_deref(),
            _ => None,
        }
    }

    /// True for the event that ends a session.
    pub fn ends_session(&self) -> bool {
        matches!(self, HookEvent::Stop { .. })
    }
}

impl HookInput {
    pub fn to_event(&self) -> Option<HookEvent> {
        let name = self.hook_event_name.as_deref()?.trim();
        if name.is_empty() {
            return None;
        }

        let event = match name {
            "SessionStart" => HookEvent::SessionStart,
            "Stop" => HookEvent::Stop {
                stop_hook_active: self.stop_hook_active.unwrap_or(false),
            },
            "SubagentStop" => HookEvent::SubagentStop,
            "TeammateIdle" => HookEvent::TeammateIdle {
                teammate_name: self.teammate_name.clone(),
            },
            "TaskCompleted" => HookEvent::TaskCompleted {
                task_id: self.task_id.as_ref().and_then(value_to_id),
                description: self.task_description.clone(),
            },
            "Notification" => HookEvent::Notification {
                message: self.message.clone(),
                notification_type: self.notification_type.clone(),
            },
            "PreToolUse" => HookEvent::PreToolUse {
                tool_name: self
                    .tool_name
                    .clone()
                    .unwrap_or_else(|| "unknown".to_string()),
                tool_input: self.tool_input.clone(),
            },
            other => HookEvent::Unknown {
                event_name: other.to_string(),
            },
        };
        Some(event)
    }

    /// Project name derived from the working directory (its basename).
    ///
    /// Returns `None` when the event carries no usable cwd.
    pub fn project_name(&self) -> Option<String> {
        let cwd = self.cwd.as_deref()?.trim();
        if cwd.is_empty() {
            return None;
        }
        Path::new(cwd.trim_end_matches('/'))
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .filter(|name| !name.is_empty())
    }

    /// One-line preview of the tool input for approval prompts.
    pub fn tool_summary(&self) -> String {
        let tool_name = self.tool_name.as_deref().unwrap_or("");
        let Some(input) = self.tool_input.as_ref().and_then(|v| v.as_object()) else {
            return String::new();
        };

        let preferred = match tool_name {
            "Bash" => input.get("command"),
            "Write" | "Edit" | "Read" => input.get("file_path"),
            _ => None,
        };

        let raw = preferred
            .and_then(|v| v.as_str())
            .or_else(|| {
                input
                    .values()
                    .filter_map(|v| v.as_str())
                    .find(|s| !s.trim().is_empty())
            })
            .unwrap_or("");

        raw.chars().take(MAX_SUMMARY_CHARS).collect()
    }
}

fn value_to_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// -----------------------------------------------------------------------------
// Hook output (hook stdout → Claude Code)
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Block,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Approve => "approve",
            Decision::Block => "block",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "approve" => Some(Decision::Approve),
            "block" => Some(Decision::Block),
            _ => None,
        }
    }
}

/// Decision printed on stdout for `PreToolUse`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookDecision {
    pub decision: Decision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl HookDecision {
    pub fn approve(reason: impl Into<String>) -> Self {
        Self::new(Decision::Approve, reason)
    }

    pub fn block(reason: impl Into<String>) -> Self {
        Self::new(Decision::Block, reason)
    }

    fn new(decision: Decision, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            decision,
            reason: if reason.is_empty() { None } else { Some(reason) },
        }
    }
}

// -----------------------------------------------------------------------------
// Buttons (callback payloads round-trip through the provider)
// -----------------------------------------------------------------------------

/// Action encoded in an inline button's callback payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ButtonAction {
    MuteThirtyMinutes { scope: String },
    MuteProject { scope: String },
    ResetThread { scope: String },
    Approve { request_id: String },
    Block { request_id: String },
}

impl ButtonAction {
    pub fn callback_data(&self) -> String {
        match self {
            ButtonAction::MuteThirtyMinutes { scope } => format!("mute_30_{}", scope),
            ButtonAction::MuteProject { scope } => format!("mute_proj_{}", scope),
            ButtonAction::ResetThread { scope } => format!("reset_{}", scope),
            ButtonAction::Approve { request_id } => format!("approve_{}", request_id),
            ButtonAction::Block { request_id } => format!("block_{}", request_id),
        }
    }

    pub fn parse(data: &str) -> Option<Self> {
        let non_empty = |rest: &str| (!rest.is_empty()).then(|| rest.to_string());

        if let Some(rest) = data.strip_prefix("mute_30_") {
            return non_empty(rest).map(|scope| ButtonAction::MuteThirtyMinutes { scope });
        }
        if let Some(rest) = data.strip_prefix("mute_proj_") {
            return non_empty(rest).map(|scope| ButtonAction::MuteProject { scope });
        }
        if let Some(rest) = data.strip_prefix("reset_") {
            return non_empty(rest).map(|scope| ButtonAction::ResetThread { scope });
        }
        if let Some(rest) = data.strip_prefix("approve_") {
            return non_empty(rest).map(|request_id| ButtonAction::Approve { request_id });
        }
        if let Some(rest) = data.strip_prefix("block_") {
            return non_empty(rest).map(|request_id| ButtonAction::Block { request_id });
        }
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub label: String,
    pub action: ButtonAction,
}

impl Button {
    pub fn new(label: impl Into<String>, action: ButtonAction) -> Self {
        Self {
            label: label.into(),
            action,
        }
    }
}

// -----------------------------------------------------------------------------
// Messages
// -----------------------------------------------------------------------------

/// A message handed to the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub text: String,
    pub reply_to: Option<MessageId>,
    /// Single row of inline buttons; empty for none.
    pub buttons: Vec<Button>,
}

impl OutboundMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            reply_to: None,
            buttons: Vec::new(),
        }
    }

    pub fn reply_to(mut self, message_id: Option<MessageId>) -> Self {
        self.reply_to = message_id;
        self
    }

    pub fn with_buttons(mut self, buttons: Vec<Button>) -> Self {
        self.buttons = buttons;
        self
    }
}

/// Who sent an inbound reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Responder {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyBody {
    Text(String),
    Button { callback_id: String, data: String },
}

/// A reply received by the daemon from the messaging provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundReply {
    pub from: Responder,
    pub body: ReplyBody,
    /// The message this reply answers (thread reference), if any.
    pub in_reply_to: Option<MessageId>,
    /// The reply's own id, used to answer it.
    pub message_id: Option<MessageId>,
    pub received_at: DateTime<Utc>,
}
