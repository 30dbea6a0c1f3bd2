//! `PreToolUse` approvals: ask in the session thread, then block until a
//! button press or the timeout decides.
//!
//! Every path ends in a decision. Errors block the tool.

use hookline_core::approval::ApprovalStatus;
use hookline_core::{
    buttons, format, liveness, relay, sentinel, ApprovalGate, Buttons, HooklineError, Scope,
};
use hookline_protocol::{Decision, HookDecision, OutboundMessage};

use crate::handle::{retry, sent_or_logged, HookContext};

/// `None` when approvals are turned off and the runtime should decide alone.
pub fn run(
    ctx: &HookContext<'_>,
    scope: &Scope,
    tool_name: &str,
    summary: &str,
) -> Option<HookDecision> {
    if !ctx.config.approval_enabled {
        return None;
    }

    Some(match request(ctx, scope, tool_name, summary) {
        Ok(decision) => decision,
        Err(err) => {
            tracing::error!(error = %err, tool = tool_name, "Approval flow failed, blocking");
            HookDecision::block(format!("Internal error: {}", err))
        }
    })
}

fn request(
    ctx: &HookContext<'_>,
    scope: &Scope,
    tool_name: &str,
    summary: &str,
) -> Result<HookDecision, HooklineError> {
    if ctx.dry_run {
        let preview = format::approval_preview(scope.as_str(), tool_name, summary);
        ctx.transport.send(&OutboundMessage::text(preview))?;
        return Ok(HookDecision::approve("dry-run auto-approve"));
    }

    if retry(|| relay::is_paused(ctx.store, scope))? {
        tracing::info!(scope = %scope, tool = tool_name, "Session paused, blocking tool");
        return Ok(HookDecision::block("Session paused from Telegram"));
    }

    if !liveness::is_daemon_running(ctx.store.storage()) {
        tracing::warn!(scope = %scope, tool = tool_name, "Daemon not running, blocking tool");
        if retry(|| sentinel::is_enabled(ctx.store, scope))? {
            let text = format::approval_offline(scope.as_str(), tool_name);
            sent_or_logged(
                ctx.notifier()
                    .send_threaded(scope, &text, Buttons::None, None, ctx.now),
                "daemon offline notice",
            )?;
        }
        return Ok(HookDecision::block("Daemon not running"));
    }

    let gate = ApprovalGate::new(ctx.store.clone()).with_timeout(ctx.config.approval_timeout());
    let pending = gate.open(scope, tool_name, summary, ctx.now)?;
    let request_id = pending.request_id().to_string();

    let prompt = format::approval_prompt(pending.request());
    let row = buttons::approval_buttons(&request_id);
    let message_id = match ctx
        .notifier()
        .send_threaded(scope, &prompt, Buttons::Custom(row), None, ctx.now)
    {
        Ok(message_id) => message_id,
        Err(err) => {
            tracing::warn!(error = %err, request_id = %request_id, "Failed to send approval request");
            gate.expire(&request_id, "Failed to send approval request", chrono::Utc::now())?;
            return Ok(HookDecision::block("Failed to send approval request"));
        }
    };
    gate.attach_message(&request_id, message_id)?;

    let outcome = pending.wait()?;

    // Decisions are written back to the message by the daemon; a timeout is
    // only observed here.
    if outcome.status == ApprovalStatus::TimedOut {
        if let Some(record) = gate.load(&request_id)? {
            if let Err(err) = ctx.transport.edit(message_id, &format::approval_result(&record)) {
                tracing::warn!(error = %err, message_id, "Failed to mark approval as timed out");
            }
        }
    }

    let reason = outcome.reason.clone();
    Ok(match outcome.decision() {
        Decision::Approve => HookDecision::approve(reason),
        Decision::Block => HookDecision::block(reason),
    })
}
