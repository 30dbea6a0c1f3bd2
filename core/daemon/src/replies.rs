//! Handling of a single inbound reply: button presses and chat text.

use chrono::{DateTime, Duration, Utc};
use hookline_core::format::escape;
use hookline_core::{
    format, mute, relay, sentinel, thread, HooklineError, ResolveOutcome, Scope,
};
use hookline_protocol::{ButtonAction, Decision, InboundReply, MessageId, OutboundMessage, ReplyBody};
use tracing::{debug, info, warn};

use crate::commands::{self, Invocation};
use crate::coordinator::Coordinator;

const MUTE_MINUTES: i64 = 30;

pub fn handle(c: &Coordinator<'_>, reply: &InboundReply, now: DateTime<Utc>) -> Result<(), HooklineError> {
    match &reply.body {
        ReplyBody::Button { callback_id, data } => button(c, reply, callback_id, data, now),
        ReplyBody::Text(text) => text_reply(c, reply, text, now),
    }
}

fn button(
    c: &Coordinator<'_>,
    reply: &InboundReply,
    callback_id: &str,
    data: &str,
    now: DateTime<Utc>,
) -> Result<(), HooklineError> {
    let Some(action) = ButtonAction::parse(data) else {
        warn!(data, "Unknown button payload");
        acknowledge(c, callback_id, "Unknown action");
        return Ok(());
    };

    match action {
        ButtonAction::Approve { request_id } => decide(c, reply, callback_id, &request_id, Decision::Approve, now),
        ButtonAction::Block { request_id } => decide(c, reply, callback_id, &request_id, Decision::Block, now),
        scoped => {
            if reply.from.id != c.config.chat_id {
                warn!(from = %reply.from.id, "Button press from unknown chat");
                acknowledge(c, callback_id, "Unauthorized");
                return Ok(());
            }
            scoped_button(c, callback_id, scoped, now)
        }
    }
}

fn decide(
    c: &Coordinator<'_>,
    reply: &InboundReply,
    callback_id: &str,
    request_id: &str,
    decision: Decision,
    now: DateTime<Utc>,
) -> Result<(), HooklineError> {
    if reply.from.id != c.config.approval_user() {
        warn!(from = %reply.from.id, request_id, "Approval press from unauthorized user");
        acknowledge(c, callback_id, "Unauthorized");
        return Ok(());
    }

    match c.gate.resolve(request_id, decision, &reply.from.name, now)? {
        ResolveOutcome::Resolved(record) => {
            let label = match decision {
                Decision::Approve => "Approved",
                Decision::Block => "Blocked",
            };
            acknowledge(c, callback_id, label);
            if let Some(message_id) = record.message_id.or(reply.in_reply_to) {
                if let Err(err) = c.transport.edit(message_id, &format::approval_result(&record)) {
                    warn!(error = %err, message_id, "Failed to update approval message");
                }
            }
        }
        ResolveOutcome::AlreadyResolved(status) => {
            acknowledge(c, callback_id, &format!("Already {}", status.as_str()));
            clear_buttons(c, reply.in_reply_to);
        }
        ResolveOutcome::Unknown => {
            acknowledge(c, callback_id, "Request expired");
            clear_buttons(c, reply.in_reply_to);
        }
    }
    Ok(())
}

fn scoped_button(
    c: &Coordinator<'_>,
    callback_id: &str,
    action: ButtonAction,
    now: DateTime<Utc>,
) -> Result<(), HooklineError> {
    match action {
        ButtonAction::MuteThirtyMinutes { scope } => {
            let scope = Scope::parse(&scope);
            mute::mute_for(&c.store, &scope, Duration::minutes(MUTE_MINUTES), now)?;
            acknowledge(c, callback_id, &format!("Muted {} for 30 min", scope));
        }
        ButtonAction::MuteProject { scope } => {
            let scope = Scope::parse(&scope);
            sentinel::disable(&c.store, &scope)?;
            mute::unmute(&c.store, &scope)?;
            acknowledge(c, callback_id, &format!("Relaying off for {}", scope));
        }
        ButtonAction::ResetThread { scope } => {
            let scope = Scope::parse(&scope);
            sentinel::reset_session_state(&c.store, &scope)?;
            acknowledge(c, callback_id, "Thread reset, next message starts fresh");
        }
        ButtonAction::Approve { .. } | ButtonAction::Block { .. } => {}
    }
    Ok(())
}

fn text_reply(
    c: &Coordinator<'_>,
    reply: &InboundReply,
    text: &str,
    now: DateTime<Utc>,
) -> Result<(), HooklineError> {
    if reply.from.id != c.config.chat_id {
        warn!(from = %reply.from.id, "Ignoring message from unknown chat");
        return Ok(());
    }
    let text = text.trim();
    if text.is_empty() {
        return Ok(());
    }

    let threaded = match reply.in_reply_to {
        Some(message_id) => thread::find_scope(&c.store, message_id)?,
        None => None,
    };

    let (name, args) = commands::split(text);
    if let Some(entry) = commands::lookup(name) {
        let scope = match threaded {
            Some(scope) => Some(scope),
            None if entry.scoped => single_active_session(c)?,
            None => None,
        };
        let invocation = Invocation {
            scope,
            args,
            sender: &reply.from.name,
        };
        let response = commands::execute(c, entry, &invocation, now)?;
        info!(command = entry.name, "Command handled");
        respond(c, reply.message_id, &response);
        return Ok(());
    }

    if !c.config.relay_enabled {
        debug!("Relay disabled, ignoring free text");
        return Ok(());
    }

    if let Some(scope) = threaded {
        queue(c, reply, &scope, text, now)?;
        return Ok(());
    }

    let sessions = relay::active_sessions(&c.store)?;
    match sessions.as_slice() {
        [] => debug!("No active session for free text"),
        [only] => queue(c, reply, &only.scope, text, now)?,
        many => {
            let names: Vec<String> = many.iter().map(|s| escape(s.scope.as_str())).collect();
            respond(
                c,
                reply.message_id,
                &format!(
                    "Multiple sessions active: {}. Reply to a session's message to target it.",
                    names.join(", ")
                ),
            );
        }
    }
    Ok(())
}

fn single_active_session(c: &Coordinator<'_>) -> Result<Option<Scope>, HooklineError> {
    let mut sessions = relay::active_sessions(&c.store)?;
    Ok(if sessions.len() == 1 {
        sessions.pop().map(|session| session.scope)
    } else {
        None
    })
}

fn queue(
    c: &Coordinator<'_>,
    reply: &InboundReply,
    scope: &Scope,
    text: &str,
    now: DateTime<Utc>,
) -> Result<(), HooklineError> {
    relay::write(&c.store, scope, &reply.from.name, text, now)?;
    respond(c, reply.message_id, &format!("Queued to <b>{}</b>", escape(scope.as_str())));
    Ok(())
}

fn respond(c: &Coordinator<'_>, reply_to: Option<MessageId>, text: &str) {
    let message = OutboundMessage::text(text).reply_to(reply_to);
    if let Err(err) = c.transport.send(&message) {
        warn!(error = %err, "Failed to send response");
    }
}

fn acknowledge(c: &Coordinator<'_>, callback_id: &str, text: &str) {
    if let Err(err) = c.transport.acknowledge(callback_id, text) {
        warn!(error = %err, "Failed to acknowledge button");
    }
}

fn clear_buttons(c: &Coordinator<'_>, message_id: Option<MessageId>) {
    if let Some(message_id) = message_id {
        if let Err(err) = c.transport.clear_buttons(message_id) {
            warn!(error = %err, message_id, "Failed to clear buttons");
        }
    }
}
