//! Threaded delivery: every message of a session replies to the session's
//! root message, and the first confirmed send becomes that root.

use chrono::{DateTime, Utc};
use hookline_protocol::{Button, MessageId, OutboundMessage};

use crate::buttons;
use crate::error::HooklineError;
use crate::mute;
use crate::scope::Scope;
use crate::sentinel;
use crate::store::Store;
use crate::thread::{self, BindOutcome};
use crate::transport::Transport;

/// Which inline buttons a message carries.
#[derive(Debug, Clone, PartialEq)]
pub enum Buttons {
    None,
    /// Mute buttons on an ordinary event.
    Event,
    /// Session-end buttons.
    Final,
    /// Explicit buttons that are not tracked as the session's last buttons.
    Custom(Vec<Button>),
}

pub struct Notifier<'a> {
    store: &'a Store,
    transport: &'a dyn Transport,
    show_buttons: bool,
}

impl<'a> Notifier<'a> {
    pub fn new(store: &'a Store, transport: &'a dyn Transport, show_buttons: bool) -> Self {
        Self {
            store,
            transport,
            show_buttons,
        }
    }

    pub fn transport(&self) -> &'a dyn Transport {
        self.transport
    }

    /// Relaying is on for the scope and it is not muted.
    pub fn allowed(&self, scope: &Scope, now: DateTime<Utc>) -> Result<bool, HooklineError> {
        Ok(sentinel::is_enabled(self.store, scope)? && !mute::is_muted(self.store, scope, now)?)
    }

    /// Sends only if [`Notifier::allowed`]; `None` when gated.
    pub fn send_gated(
        &self,
        scope: &Scope,
        text: &str,
        buttons: Buttons,
        now: DateTime<Utc>,
    ) -> Result<Option<MessageId>, HooklineError> {
        if !self.allowed(scope, now)? {
            tracing::debug!(scope = %scope, "Send gated");
            return Ok(None);
        }
        self.send_threaded(scope, text, buttons, None, now).map(Some)
    }

    pub fn send_threaded(
        &self,
        scope: &Scope,
        text: &str,
        buttons: Buttons,
        transcript_path: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<MessageId, HooklineError> {
        let reply_to = thread::get(self.store, scope)?;
        let (row, tracked) = match buttons {
            Buttons::None => (Vec::new(), false),
            Buttons::Event if self.show_buttons => (buttons::event_buttons(scope), true),
            Buttons::Final if self.show_buttons => (buttons::final_buttons(scope), true),
            Buttons::Event | Buttons::Final => (Vec::new(), false),
            Buttons::Custom(row) => (row, false),
        };

        let message = OutboundMessage::text(text)
            .reply_to(reply_to)
            .with_buttons(row);
        let message_id = self.transport.send(&message)?;
        tracing::info!(scope = %scope, message_id, reply_to = ?reply_to, "Message sent");

        if reply_to.is_none() {
            match thread::bind(self.store, scope, message_id, transcript_path, now)? {
                BindOutcome::Bound(_) => {}
                BindOutcome::AlreadyBound(root) => {
                    tracing::info!(scope = %scope, root, message_id, "Another process bound the thread first");
                }
            }
        }

        if tracked {
            if let Some(previous) = buttons::replace_last(self.store, scope, message_id)? {
                if let Err(err) = self.transport.clear_buttons(previous) {
                    tracing::warn!(error = %err, message_id = previous, "Failed to clear old buttons");
                }
            }
        }
        Ok(message_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageConfig;
    use crate::transport::{RecordedCall, RecordingTransport};
    use tempfile::tempdir;

    #[test]
    fn first_send_binds_and_later_sends_reply() {
        let temp = tempdir().unwrap();
        let store = Store::new(StorageConfig::with_root(temp.path().to_path_buf()));
        let transport = RecordingTransport::new();
        let notifier = Notifier::new(&store, &transport, true);
        let demo = Scope::project("demo");
        let now = Utc::now();

        let root = notifier.send_threaded(&demo, "one", Buttons::Event, None, now).unwrap();
        let second = notifier.send_threaded(&demo, "two", Buttons::Event, None, now).unwrap();

        let sent = transport.sent();
        assert_eq!(sent[0].1.reply_to, None);
        assert_eq!(sent[1].1.reply_to, Some(root));
        assert_eq!(thread::get(&store, &demo).unwrap(), Some(root));
        assert!(transport
            .calls()
            .contains(&RecordedCall::ClearButtons { id: root }));
        assert_ne!(root, second);
    }

    #[test]
    fn failed_send_leaves_no_binding() {
        let temp = tempdir().unwrap();
        let store = Store::new(StorageConfig::with_root(temp.path().to_path_buf()));
        let transport = RecordingTransport::new();
        transport.fail_next_sends(1);
        let notifier = Notifier::new(&store, &transport, true);
        let demo = Scope::project("demo");

        assert!(notifier
            .send_threaded(&demo, "one", Buttons::Event, None, Utc::now())
            .is_err());
        assert_eq!(thread::get(&store, &demo).unwrap(), None);
    }

    #[test]
    fn gated_send_respects_sentinel_and_mute() {
        let temp = tempdir().unwrap();
        let store = Store::new(StorageConfig::with_root(temp.path().to_path_buf()));
        let transport = RecordingTransport::new();
        let notifier = Notifier::new(&store, &transport, false);
        let demo = Scope::project("demo");
        let now = Utc::now();

        assert_eq!(notifier.send_gated(&demo, "x", Buttons::None, now).unwrap(), None);
        sentinel::enable(&store, &demo, now).unwrap();
        mute::mute_for(&store, &demo, chrono::Duration::minutes(5), now).unwrap();
        assert_eq!(notifier.send_gated(&demo, "x", Buttons::None, now).unwrap(), None);
        mute::unmute(&store, &demo).unwrap();
        assert!(notifier.send_gated(&demo, "x", Buttons::None, now).unwrap().is_some());
        assert_eq!(transport.sent().len(), 1);
    }
}
