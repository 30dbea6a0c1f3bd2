//! Event handler for Claude Code hooks.
//!
//! Reads one JSON event from stdin and relays it according to the scope's
//! shared state.
//!
//! ## Flow
//!
//! ```text
//! PreToolUse      → approval flow, decision printed on stdout
//! gate            → enabled, not muted, not suppressed, session old enough
//! stale batch     → flushed and sent before anything else
//! debounced kind  → accumulated, nothing sent
//! Stop            → pending batch + final message, session state cleared
//! anything else   → pending batch + event message, relay inbox digest
//! ```
//!
//! A failure here must never break the agent, so `main` logs errors and
//! exits 0.

use std::io::{self, Read};
use std::time::Duration;

use chrono::{DateTime, Utc};
use hookline_core::debounce::{self, DebounceBatch};
use hookline_core::transport::{DryRunTransport, TelegramTransport};
use hookline_core::{
    format, mute, relay, sentinel, tasks, Buttons, HooklineConfig, HooklineError, Notifier, Scope,
    StorageConfig, Store, StoreError, Transport,
};
use hookline_protocol::{HookDecision, HookEvent, HookInput, MessageId};

use crate::approval_flow;

const STORE_ATTEMPTS: u32 = 3;
const RETRY_PAUSE: Duration = Duration::from_millis(25);

#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("Failed to read stdin: {0}")]
    Stdin(#[source] io::Error),

    #[error("Failed to parse hook input: {0}")]
    Parse(#[source] serde_json::Error),

    #[error("Failed to encode hook decision: {0}")]
    Output(#[source] serde_json::Error),

    #[error(transparent)]
    Hookline(#[from] HooklineError),
}

/// Everything one invocation works with.
pub struct HookContext<'a> {
    pub store: &'a Store,
    pub config: &'a HooklineConfig,
    pub transport: &'a dyn Transport,
    pub dry_run: bool,
    pub now: DateTime<Utc>,
}

impl<'a> HookContext<'a> {
    pub fn notifier(&self) -> Notifier<'a> {
        Notifier::new(self.store, self.transport, self.config.show_buttons)
    }
}

pub fn run(dry_run: bool) -> Result<(), HookError> {
    let mut raw = String::new();
    io::stdin()
        .read_to_string(&mut raw)
        .map_err(HookError::Stdin)?;

    if raw.trim().is_empty() {
        tracing::debug!("Empty stdin, nothing to do");
        return Ok(());
    }

    let input: HookInput = serde_json::from_str(&raw).map_err(HookError::Parse)?;

    let storage = StorageConfig::resolve().map_err(HooklineError::from)?;
    let config = HooklineConfig::load(&storage)?;
    let store = Store::new(storage).with_lock_timeout(config.lock_timeout());

    let transport: Box<dyn Transport> = if dry_run {
        Box::new(DryRunTransport::default())
    } else {
        match TelegramTransport::new(&config.bot_token, &config.chat_id) {
            Ok(transport) => Box::new(transport),
            Err(err) => {
                tracing::warn!(error = %err, "Telegram credentials missing");
                if config.approval_enabled && input.hook_event_name.as_deref() == Some("PreToolUse") {
                    print_decision(&HookDecision::block("hookline is not configured"))?;
                }
                return Ok(());
            }
        }
    };

    let ctx = HookContext {
        store: &store,
        config: &config,
        transport: transport.as_ref(),
        dry_run,
        now: Utc::now(),
    };

    if let Some(decision) = handle_input(&ctx, &input)? {
        print_decision(&decision)?;
    }
    Ok(())
}

fn print_decision(decision: &HookDecision) -> Result<(), HookError> {
    let encoded = serde_json::to_string(decision).map_err(HookError::Output)?;
    println!("{}", encoded);
    Ok(())
}

/// Processes one event. Returns the decision to print, if the event takes one.
pub fn handle_input(
    ctx: &HookContext<'_>,
    input: &HookInput,
) -> Result<Option<HookDecision>, HooklineError> {
    let Some(event) = input.to_event() else {
        tracing::debug!("Skipping input without an event name");
        return Ok(None);
    };
    let scope = input
        .project_name()
        .map(|name| Scope::project(&name))
        .unwrap_or(Scope::Global);

    if let HookEvent::PreToolUse { tool_name, .. } = &event {
        return Ok(approval_flow::run(ctx, &scope, tool_name, &input.tool_summary()));
    }

    if !passes_gate(ctx, &scope, &event)? {
        return Ok(None);
    }

    let transcript = input.transcript_path.as_deref().filter(|path| !path.is_empty());
    let notifier = ctx.notifier();
    let window = ctx.config.debounce_window();

    if let Some(batch) = retry(|| debounce::flush_if_stale(ctx.store, &scope, window, ctx.now))? {
        send_batch(ctx, &notifier, &scope, batch, transcript)?;
    }

    if ctx.config.is_debounced(event.kind()) {
        let pending = retry(|| {
            debounce::accumulate(ctx.store, &scope, event.kind(), event.label(), ctx.now)
        })?;
        tracing::debug!(scope = %scope, kind = event.kind(), pending, "Event debounced");
        return Ok(None);
    }

    if let Some(batch) = retry(|| debounce::flush(ctx.store, &scope))? {
        send_batch(ctx, &notifier, &scope, batch, transcript)?;
    }

    if event.ends_session() {
        finish_session(ctx, &notifier, &scope, transcript)?;
        return Ok(None);
    }

    let progress = match &event {
        HookEvent::TaskCompleted { task_id, .. } => {
            Some(retry(|| tasks::track(ctx.store, &scope, task_id.as_deref()))?)
        }
        _ => None,
    };
    let text = format::event(&event, scope.as_str(), progress, ctx.now);
    sent_or_logged(
        notifier.send_threaded(&scope, &text, Buttons::Event, transcript, ctx.now),
        "event",
    )?;

    if ctx.config.relay_enabled {
        surface_inbox(ctx, &notifier, &scope, transcript)?;
    }
    Ok(None)
}

fn passes_gate(
    ctx: &HookContext<'_>,
    scope: &Scope,
    event: &HookEvent,
) -> Result<bool, HooklineError> {
    if !ctx.dry_run && !retry(|| sentinel::is_enabled(ctx.store, scope))? {
        tracing::debug!(scope = %scope, "Relay disabled for scope");
        return Ok(false);
    }
    if retry(|| mute::is_muted(ctx.store, scope, ctx.now))? {
        tracing::debug!(scope = %scope, "Scope muted");
        return Ok(false);
    }
    if ctx.config.is_suppressed(event.kind()) {
        tracing::debug!(kind = event.kind(), "Event kind suppressed");
        return Ok(false);
    }

    let min_age = ctx.config.min_session_age();
    if min_age > chrono::Duration::zero() {
        if let Some(age) = retry(|| sentinel::session_age(ctx.store, scope, ctx.now))? {
            if age < min_age {
                tracing::debug!(scope = %scope, age_secs = age.num_seconds(), "Session too young");
                return Ok(false);
            }
        }
    }
    Ok(true)
}

/// Sends a flushed batch; on a failed send the batch goes back to the store.
fn send_batch(
    ctx: &HookContext<'_>,
    notifier: &Notifier<'_>,
    scope: &Scope,
    batch: DebounceBatch,
    transcript: Option<&str>,
) -> Result<(), HooklineError> {
    let text = format::batch(&batch.summary());
    match notifier.send_threaded(scope, &text, Buttons::Event, transcript, ctx.now) {
        Ok(_) => Ok(()),
        Err(HooklineError::Transport(err)) => {
            tracing::warn!(error = %err, scope = %scope, "Failed to send batch, keeping it pending");
            retry(|| debounce::restore(ctx.store, scope, batch.clone()))?;
            Ok(())
        }
        Err(err) => Err(err),
    }
}

fn finish_session(
    ctx: &HookContext<'_>,
    notifier: &Notifier<'_>,
    scope: &Scope,
    transcript: Option<&str>,
) -> Result<(), HooklineError> {
    let duration = sentinel::session_age(ctx.store, scope, ctx.now)?;
    let text = format::session_end(scope.as_str(), duration, ctx.now);
    sent_or_logged(
        notifier.send_threaded(scope, &text, Buttons::Final, transcript, ctx.now),
        "session end",
    )?;

    retry(|| sentinel::reset_session_state(ctx.store, scope))?;
    if ctx.config.relay_enabled {
        retry(|| relay::clear(ctx.store, scope))?;
    }
    tracing::info!(scope = %scope, "Session finished");
    Ok(())
}

/// Posts unread relay messages to the thread, marking them read once sent.
fn surface_inbox(
    ctx: &HookContext<'_>,
    notifier: &Notifier<'_>,
    scope: &Scope,
    transcript: Option<&str>,
) -> Result<(), HooklineError> {
    let messages = relay::unread(ctx.store, scope)?;
    let Some(last) = messages.last() else {
        return Ok(());
    };

    let text = format::inbox(&messages);
    let sent = sent_or_logged(
        notifier.send_threaded(scope, &text, Buttons::None, transcript, ctx.now),
        "inbox digest",
    )?;
    if sent.is_some() {
        relay::mark_read_through(ctx.store, scope, last.read_through)?;
    }
    Ok(())
}

/// Transport failures are logged and swallowed; store failures propagate.
pub(crate) fn sent_or_logged(
    result: Result<MessageId, HooklineError>,
    what: &str,
) -> Result<Option<MessageId>, HooklineError> {
    match result {
        Ok(message_id) => Ok(Some(message_id)),
        Err(HooklineError::Transport(err)) => {
            tracing::warn!(error = %err, what, "Send failed");
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

/// Retries transient store failures (lock timeouts, I/O) a few times.
pub(crate) fn retry<T>(mut op: impl FnMut() -> Result<T, StoreError>) -> Result<T, StoreError> {
    let mut attempt = 1;
    loop {
        match op() {
            Err(err) if err.is_transient() && attempt < STORE_ATTEMPTS => {
                tracing::debug!(error = %err, attempt, "Retrying store operation");
                std::thread::sleep(RETRY_PAUSE * attempt);
                attempt += 1;
            }
            result => return result,
        }
    }
}
