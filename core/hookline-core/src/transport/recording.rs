//! In-memory transport for tests: records calls and replays queued replies.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use hookline_protocol::{InboundReply, MessageId, OutboundMessage};

use super::Transport;
use crate::error::TransportError;

#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCall {
    Send { id: MessageId, message: OutboundMessage },
    Edit { id: MessageId, text: String },
    ClearButtons { id: MessageId },
    Acknowledge { callback_id: String, text: String },
}

#[derive(Debug, Default)]
struct Inner {
    calls: Vec<RecordedCall>,
    next_id: MessageId,
    replies: VecDeque<Vec<InboundReply>>,
    fail_sends: usize,
    fail_polls: usize,
}

#[derive(Debug, Default)]
pub struct RecordingTransport {
    inner: Mutex<Inner>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Makes the next `count` sends fail.
    pub fn fail_next_sends(&self, count: usize) {
        self.inner().fail_sends = count;
    }

    pub fn fail_next_polls(&self, count: usize) {
        self.inner().fail_polls = count;
    }

    /// Queues one batch of replies for the next `poll_replies`.
    pub fn push_replies(&self, replies: Vec<InboundReply>) {
        self.inner().replies.push_back(replies);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.inner().calls.clone()
    }

    pub fn sent(&self) -> Vec<(MessageId, OutboundMessage)> {
        self.inner()
            .calls
            .iter()
            .filter_map(|call| match call {
                RecordedCall::Send { id, message } => Some((*id, message.clone())),
                _ => None,
            })
            .collect()
    }
}

impl Transport for RecordingTransport {
    fn send(&self, message: &OutboundMessage) -> Result<MessageId, TransportError> {
        let mut inner = self.inner();
        if inner.fail_sends > 0 {
            inner.fail_sends -= 1;
            return Err(TransportError::Request {
                method: "send".to_string(),
                details: "injected failure".to_string(),
            });
        }
        inner.next_id += 1;
        let id = inner.next_id;
        inner.calls.push(RecordedCall::Send {
            id,
            message: message.clone(),
        });
        Ok(id)
    }

    fn edit(&self, message_id: MessageId, text: &str) -> Result<(), TransportError> {
        self.inner().calls.push(RecordedCall::Edit {
            id: message_id,
            text: text.to_string(),
        });
        Ok(())
    }

    fn clear_buttons(&self, message_id: MessageId) -> Result<(), TransportError> {
        self.inner()
            .calls
            .push(RecordedCall::ClearButtons { id: message_id });
        Ok(())
    }

    fn acknowledge(&self, callback_id: &str, text: &str) -> Result<(), TransportError> {
        self.inner().calls.push(RecordedCall::Acknowledge {
            callback_id: callback_id.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }

    fn poll_replies(&self, _timeout: Duration) -> Result<Vec<InboundReply>, TransportError> {
        let mut inner = self.inner();
        if inner.fail_polls > 0 {
            inner.fail_polls -= 1;
            return Err(TransportError::Request {
                method: "poll".to_string(),
                details: "injected failure".to_string(),
            });
        }
        Ok(inner.replies.pop_front().unwrap_or_default())
    }
}
