//! Message text. Output is provider HTML (`<b>`, `<i>`, escaped entities).

use chrono::{DateTime, Utc};
use hookline_protocol::HookEvent;

use crate::approval::ApprovalRequest;
use crate::debounce::BatchSummary;
use crate::relay::InboxMessage;
use crate::tasks::TaskProgress;

pub fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Removes tags and unescapes entities, for plain-text fallbacks.
pub fn strip_html(text: &str) -> String {
    let mut plain = String::with_capacity(text.len());
    let mut in_tag = false;
    for c in text.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => plain.push(c),
            _ => {}
        }
    }
    plain
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Collapses newlines and cuts to `max` characters with an ellipsis.
pub fn truncate(text: &str, max: usize) -> String {
    let flat = text.replace('\n', " ");
    let flat = flat.trim();
    if flat.chars().count() <= max {
        return flat.to_string();
    }
    let mut cut: String = flat.chars().take(max.saturating_sub(1)).collect();
    cut.push('…');
    cut
}

fn clock(now: DateTime<Utc>) -> String {
    now.format("%H:%M UTC").to_string()
}

/// One-line or short text for a single event.
pub fn event(event: &HookEvent, project: &str, progress: Option<TaskProgress>, now: DateTime<Utc>) -> String {
    let header = format!("<b>{}</b> · {}", escape(event.kind()), escape(project));
    let body = match event {
        HookEvent::TaskCompleted { description, .. } => {
            let mut line = description
                .as_deref()
                .map(|d| escape(&truncate(d, 200)))
                .unwrap_or_else(|| "Task completed".to_string());
            if let Some(progress) = progress {
                match progress.total {
                    Some(total) => line.push_str(&format!(" ({}/{})", progress.completed, total)),
                    None => line.push_str(&format!(" ({} done)", progress.completed)),
                }
            }
            Some(line)
        }
        HookEvent::Notification { message, .. } => {
            message.as_deref().map(|m| escape(&truncate(m, 300)))
        }
        HookEvent::TeammateIdle { teammate_name } => Some(format!(
            "{} is idle",
            escape(teammate_name.as_deref().unwrap_or("teammate"))
        )),
        _ => None,
    };

    match body {
        Some(body) => format!("{}\n{}\n<i>{}</i>", header, body, clock(now)),
        None => format!("{} · <i>{}</i>", header, clock(now)),
    }
}

pub fn batch(summary: &BatchSummary) -> String {
    let mut lines = vec![format!(
        "<b>{} events</b> · {}",
        summary.total,
        escape(&summary.scope)
    )];
    for kind in &summary.kinds {
        let mut line = format!("{}× {}", kind.count, escape(&kind.kind));
        if !kind.labels.is_empty() {
            let labels: Vec<String> = kind.labels.iter().map(|l| escape(l)).collect();
            line.push_str(&format!(" ({})", labels.join(", ")));
        }
        lines.push(line);
    }
    lines.push(format!(
        "<i>{} – {}</i>",
        clock(summary.first_seen),
        clock(summary.last_seen)
    ));
    lines.join("\n")
}

pub fn session_end(project: &str, duration: Option<chrono::Duration>, now: DateTime<Utc>) -> String {
    let mut footer = clock(now);
    if let Some(duration) = duration {
        footer.push_str(&format!(" · {}", human_duration(duration)));
    }
    format!("<b>Session finished</b> · {}\n<i>{}</i>", escape(project), footer)
}

pub fn approval_prompt(request: &ApprovalRequest) -> String {
    approval_preview(&request.scope, &request.tool_name, &request.payload_summary)
}

pub fn approval_preview(scope: &str, tool_name: &str, summary: &str) -> String {
    let mut text = format!(
        "<b>Approval needed</b> · {}\nTool: <b>{}</b>",
        escape(scope),
        escape(tool_name)
    );
    if !summary.is_empty() {
        text.push_str(&format!("\n<i>{}</i>", escape(&truncate(summary, 200))));
    }
    text
}

/// Posted to the thread when a tool was blocked because no daemon can
/// collect the decision.
pub fn approval_offline(scope: &str, tool_name: &str) -> String {
    format!(
        "<b>Approval needed but daemon offline</b>\nTool: <b>{}</b> · {}\n<i>Auto-blocked. Start it with: hookline-daemon</i>",
        escape(tool_name),
        escape(scope)
    )
}

/// Prompt text once the request reached a terminal state.
pub fn approval_result(request: &ApprovalRequest) -> String {
    let reason = request.reason.as_deref().unwrap_or(request.status.as_str());
    format!("{}\n\n<b>{}</b>", approval_prompt(request), escape(reason))
}

/// Messages shown in an inbox digest; older ones are only counted.
const INBOX_PREVIEW: usize = 5;

pub fn inbox(messages: &[InboxMessage]) -> String {
    let mut lines = vec![format!("<b>{} message(s) from Telegram</b>", messages.len())];
    let shown = &messages[messages.len().saturating_sub(INBOX_PREVIEW)..];
    for message in shown {
        lines.push(format!(
            "[{}] {}",
            escape(&message.sender),
            escape(&truncate(&message.text, 200))
        ));
    }
    if messages.len() > INBOX_PREVIEW {
        lines.push(format!("<i>… and {} more</i>", messages.len() - INBOX_PREVIEW));
    }
    lines.join("\n")
}

pub fn human_duration(duration: chrono::Duration) -> String {
    let minutes = duration.num_minutes();
    if minutes < 1 {
        format!("{}s", duration.num_seconds().max(0))
    } else if minutes < 60 {
        format!("{}m", minutes)
    } else {
        format!("{}h {}m", minutes / 60, minutes % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_and_strip_are_inverse_for_text() {
        let raw = "a < b && c > d";
        assert_eq!(strip_html(&format!("<b>{}</b>", escape(raw))), raw);
    }

    #[test]
    fn truncate_adds_ellipsis() {
        assert_eq!(truncate("hello\nworld", 20), "hello world");
        assert_eq!(truncate("abcdefghij", 5), "abcd…");
    }

    #[test]
    fn task_progress_is_rendered() {
        let event = HookEvent::TaskCompleted {
            task_id: Some("3".to_string()),
            description: Some("Write tests".to_string()),
        };
        let text = super::event(
            &event,
            "demo",
            Some(TaskProgress {
                completed: 2,
                total: Some(3),
            }),
            Utc::now(),
        );
        assert!(text.contains("Write tests (2/3)"));
    }

    #[test]
    fn durations_are_humanized() {
        assert_eq!(human_duration(chrono::Duration::seconds(42)), "42s");
        assert_eq!(human_duration(chrono::Duration::minutes(75)), "1h 15m");
    }
}
