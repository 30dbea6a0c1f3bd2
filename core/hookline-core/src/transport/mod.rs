//! Messaging transports.
//!
//! The coordination engine only needs five operations from a provider; the
//! rest of its wire format stays behind this trait.

use std::time::Duration;

use hookline_protocol::{InboundReply, MessageId, OutboundMessage};

use crate::error::TransportError;

mod dry_run;
#[cfg(any(test, feature = "test-helpers"))]
mod recording;
mod telegram;

pub use dry_run::DryRunTransport;
#[cfg(any(test, feature = "test-helpers"))]
pub use recording::{RecordedCall, RecordingTransport};
pub use telegram::TelegramTransport;

pub trait Transport {
    /// Sends a message and returns the provider's id for it.
    fn send(&self, message: &OutboundMessage) -> Result<MessageId, TransportError>;

    /// Replaces a message's text (and drops its buttons).
    fn edit(&self, message_id: MessageId, text: &str) -> Result<(), TransportError>;

    fn clear_buttons(&self, message_id: MessageId) -> Result<(), TransportError>;

    /// Answers a button press so the client stops its spinner.
    fn acknowledge(&self, callback_id: &str, text: &str) -> Result<(), TransportError>;

    /// Long-polls for replies, waiting at most `timeout`.
    fn poll_replies(&self, timeout: Duration) -> Result<Vec<InboundReply>, TransportError>;
}
