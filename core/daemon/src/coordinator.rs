//! The daemon's single-threaded loop.
//!
//! Each cycle long-polls for replies, handles every reply in isolation, then
//! flushes stale debounce batches, sweeps approvals and ticks the scheduler.
//! Nothing is cached between cycles; every step reads the store fresh.

use std::time::Duration;

use chrono::{DateTime, Utc};
use hookline_core::debounce;
use hookline_core::scheduler::Scheduler;
use hookline_core::{
    format, ApprovalGate, Buttons, HooklineConfig, HooklineError, Notifier, Store, Transport,
};
use hookline_protocol::{InboundReply, OutboundMessage};

use crate::{proactive, replies};

/// Pause after a failed poll before trying again.
const TRANSPORT_BACKOFF: Duration = Duration::from_secs(5);

/// What one cycle did, for logging and tests.
#[derive(Debug, Default)]
pub struct CycleReport {
    pub replies: usize,
    pub failed_replies: usize,
    pub flushed: usize,
    pub expired: usize,
    pub ran: Vec<String>,
}

pub struct Coordinator<'a> {
    pub(crate) store: Store,
    pub(crate) config: HooklineConfig,
    pub(crate) transport: &'a dyn Transport,
    pub(crate) gate: ApprovalGate,
    pub(crate) scheduler: Scheduler,
    error_backoff: Duration,
}

impl<'a> Coordinator<'a> {
    pub fn new(store: Store, config: HooklineConfig, transport: &'a dyn Transport) -> Self {
        let gate = ApprovalGate::new(store.clone()).with_timeout(config.approval_timeout());
        let scheduler = proactive::scheduler(&store, &config);
        Self {
            store,
            config,
            transport,
            gate,
            scheduler,
            error_backoff: TRANSPORT_BACKOFF,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }

    pub(crate) fn notifier(&self) -> Notifier<'_> {
        Notifier::new(&self.store, self.transport, self.config.show_buttons)
    }

    pub fn run(&self) {
        tracing::info!(
            tasks = self.scheduler.tasks().len(),
            relay = self.config.relay_enabled,
            approvals = self.config.approval_enabled,
            "Coordinator loop started"
        );
        loop {
            let report = self.run_once();
            if report.replies > 0 || report.flushed > 0 || report.expired > 0 || !report.ran.is_empty() {
                tracing::debug!(?report, "Cycle finished");
            }
        }
    }

    pub fn run_once(&self) -> CycleReport {
        let replies = self.poll();
        self.process(&replies, Utc::now())
    }

    fn poll(&self) -> Vec<InboundReply> {
        match self.transport.poll_replies(self.config.poll_timeout()) {
            Ok(replies) => replies,
            Err(err) => {
                tracing::warn!(error = %err, "Polling failed, backing off");
                std::thread::sleep(self.error_backoff);
                Vec::new()
            }
        }
    }

    /// Everything after the poll. A failing step never stops the others.
    pub(crate) fn process(&self, replies: &[InboundReply], now: DateTime<Utc>) -> CycleReport {
        let mut report = CycleReport {
            replies: replies.len(),
            ..CycleReport::default()
        };

        for reply in replies {
            if let Err(err) = replies::handle(self, reply, now) {
                tracing::warn!(error = %err, from = %reply.from.id, "Failed to handle reply");
                report.failed_replies += 1;
            }
        }

        report.flushed = self.flush_stale(now);
        report.expired = self.sweep_approvals(now);
        report.ran = self.tick(now);
        report
    }

    /// Sends batches nobody flushed because no further event arrived.
    fn flush_stale(&self, now: DateTime<Utc>) -> usize {
        let window = self.config.debounce_window();
        let scopes = match debounce::stale_scopes(&self.store, window, now) {
            Ok(scopes) => scopes,
            Err(err) => {
                tracing::warn!(error = %err, "Failed to scan debounce batches");
                return 0;
            }
        };

        let notifier = self.notifier();
        let mut flushed = 0;
        for scope in scopes {
            // A hook may have flushed it in the meantime.
            let batch = match debounce::flush_if_stale(&self.store, &scope, window, now) {
                Ok(Some(batch)) => batch,
                Ok(None) => continue,
                Err(err) => {
                    tracing::warn!(error = %err, scope = %scope, "Failed to take stale batch");
                    continue;
                }
            };

            let text = format::batch(&batch.summary());
            match notifier.send_gated(&scope, &text, Buttons::Event, now) {
                Ok(Some(message_id)) => {
                    tracing::info!(scope = %scope, message_id, entries = batch.entries.len(), "Stale batch sent");
                    flushed += 1;
                }
                Ok(None) => {
                    tracing::debug!(scope = %scope, "Scope gated, dropping stale batch");
                }
                Err(HooklineError::Transport(err)) => {
                    tracing::warn!(error = %err, scope = %scope, "Failed to send stale batch");
                    if let Err(err) = debounce::restore(&self.store, &scope, batch) {
                        tracing::warn!(error = %err, scope = %scope, "Failed to restore batch");
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, scope = %scope, "Stale batch sent but thread state failed");
                    flushed += 1;
                }
            }
        }
        flushed
    }

    fn sweep_approvals(&self, now: DateTime<Utc>) -> usize {
        let report = match self.gate.sweep(now) {
            Ok(report) => report,
            Err(err) => {
                tracing::warn!(error = %err, "Approval sweep failed");
                return 0;
            }
        };
        if report.removed > 0 {
            tracing::debug!(removed = report.removed, "Old approval records removed");
        }
        // A live requester edits its own prompt when it wakes on the timeout.
        for expired in &report.abandoned {
            if let Some(message_id) = expired.message_id {
                if let Err(err) = self.transport.edit(message_id, &format::approval_result(expired)) {
                    tracing::warn!(error = %err, message_id, "Failed to mark approval as expired");
                }
            }
        }
        report.timed_out.len()
    }

    fn tick(&self, now: DateTime<Utc>) -> Vec<String> {
        let result = self.scheduler.tick(now, |name| {
            match proactive::compose(self, name, now)? {
                Some(text) => {
                    self.transport.send(&OutboundMessage::text(text))?;
                }
                None => tracing::debug!(task = name, "Nothing to report"),
            }
            Ok(())
        });
        match result {
            Ok(report) => report.ran,
            Err(err) => {
                tracing::warn!(error = %err, "Scheduler tick failed");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hookline_core::transport::{RecordedCall, RecordingTransport};
    use hookline_core::{sentinel, thread, ApprovalRequest, RecordKey, Scope, StorageConfig};
    use hookline_protocol::Decision;
    use tempfile::tempdir;

    fn store(root: &std::path::Path) -> Store {
        Store::new(StorageConfig::with_root(root.to_path_buf()))
    }

    #[test]
    fn stale_batch_is_flushed_once_and_threaded() {
        let temp = tempdir().unwrap();
        let store = store(temp.path());
        let transport = RecordingTransport::new();
        let coordinator = Coordinator::new(store.clone(), HooklineConfig::default(), &transport);
        let demo = Scope::project("demo");
        let start = Utc::now();
        sentinel::enable(&store, &demo, start).unwrap();
        thread::bind(&store, &demo, 500, None, start).unwrap();

        debounce::accumulate(&store, &demo, "SubagentStop", None, start).unwrap();
        debounce::accumulate(&store, &demo, "SubagentStop", None, start).unwrap();

        assert_eq!(coordinator.process(&[], start + chrono::Duration::seconds(5)).flushed, 0);
        let later = start + chrono::Duration::seconds(31);
        assert_eq!(coordinator.process(&[], later).flushed, 1);
        assert_eq!(coordinator.process(&[], later).flushed, 0);

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1.reply_to, Some(500));
        assert!(sent[0].1.text.contains("2 events"));
    }

    #[test]
    fn failed_flush_keeps_the_batch() {
        let temp = tempdir().unwrap();
        let store = store(temp.path());
        let transport = RecordingTransport::new();
        let coordinator = Coordinator::new(store.clone(), HooklineConfig::default(), &transport);
        let demo = Scope::project("demo");
        let start = Utc::now();
        sentinel::enable(&store, &demo, start).unwrap();
        debounce::accumulate(&store, &demo, "TeammateIdle", Some("ana"), start).unwrap();

        transport.fail_next_sends(1);
        let later = start + chrono::Duration::seconds(40);
        assert_eq!(coordinator.process(&[], later).flushed, 0);
        assert!(debounce::pending(&store, &demo).unwrap().is_some());
        assert_eq!(coordinator.process(&[], later).flushed, 1);
    }

    #[test]
    fn orphaned_approval_is_expired_and_message_edited() {
        let temp = tempdir().unwrap();
        let store = store(temp.path());
        let transport = RecordingTransport::new();
        let coordinator = Coordinator::new(store.clone(), HooklineConfig::default(), &transport);

        let gate = ApprovalGate::new(store.clone()).with_timeout(Duration::from_secs(1));
        let pending = gate
            .open(&Scope::project("demo"), "Bash", "ls", Utc::now())
            .unwrap();
        gate.attach_message(pending.request_id(), 77).unwrap();
        let request_id = pending.request_id().to_string();
        // Hand the request to a requester that has already exited.
        let key = RecordKey::approval(&request_id);
        let mut record: ApprovalRequest = store.load(&key).unwrap().unwrap();
        record.requester_pid = u32::MAX - 1;
        record.requester_started = None;
        store.save(&key, &record).unwrap();

        assert_eq!(coordinator.process(&[], Utc::now()).expired, 1);
        assert!(transport
            .calls()
            .iter()
            .any(|call| matches!(call, RecordedCall::Edit { id: 77, .. })));
        assert!(gate.load(&request_id).unwrap().unwrap().status.is_terminal());
    }

    #[test]
    fn overdue_approval_with_live_requester_is_left_to_the_hook() {
        let temp = tempdir().unwrap();
        let store = store(temp.path());
        let transport = RecordingTransport::new();
        let coordinator = Coordinator::new(store.clone(), HooklineConfig::default(), &transport);

        let gate = ApprovalGate::new(store.clone()).with_timeout(Duration::from_secs(1));
        let pending = gate
            .open(&Scope::project("demo"), "Bash", "ls", Utc::now())
            .unwrap();
        gate.attach_message(pending.request_id(), 77).unwrap();
        let request_id = pending.request_id().to_string();
        // Keep the requester alive but let its deadline pass well beyond grace.
        let later = Utc::now() + chrono::Duration::seconds(60);

        assert_eq!(coordinator.process(&[], later).expired, 1);
        assert!(!transport
            .calls()
            .iter()
            .any(|call| matches!(call, RecordedCall::Edit { .. })));
        let outcome = pending.wait().unwrap();
        assert_eq!(outcome.decision(), Decision::Block);
        assert!(gate.load(&request_id).unwrap().unwrap().status.is_terminal());
    }

    #[test]
    fn poll_failure_backs_off_and_continues() {
        let temp = tempdir().unwrap();
        let store = store(temp.path());
        let transport = RecordingTransport::new();
        transport.fail_next_polls(1);
        let coordinator = Coordinator::new(store, HooklineConfig::default(), &transport)
            .with_error_backoff(Duration::from_millis(1));

        let report = coordinator.run_once();
        assert_eq!(report.replies, 0);
        let report = coordinator.run_once();
        assert_eq!(report.failed_replies, 0);
    }
}
