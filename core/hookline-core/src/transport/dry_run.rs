//! Prints messages instead of sending them.

use std::io::Write;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use hookline_protocol::{InboundReply, MessageId, OutboundMessage};

use super::Transport;
use crate::error::TransportError;
use crate::format;

const FIRST_ID: MessageId = 90_000;

/// Writes every outgoing call to `out` (stdout by default).
pub struct DryRunTransport {
    out: Mutex<Box<dyn Write + Send>>,
    next_id: AtomicI64,
}

impl std::fmt::Debug for DryRunTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DryRunTransport")
            .field("next_id", &self.next_id)
            .finish_non_exhaustive()
    }
}

impl Default for DryRunTransport {
    fn default() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }
}

impl DryRunTransport {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
            next_id: AtomicI64::new(FIRST_ID),
        }
    }

    fn emit(&self, line: String) {
        if let Ok(mut out) = self.out.lock() {
            let _ = writeln!(out, "{}", line);
            let _ = out.flush();
        }
    }
}

impl Transport for DryRunTransport {
    fn send(&self, message: &OutboundMessage) -> Result<MessageId, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let buttons: Vec<String> = message
            .buttons
            .iter()
            .map(|b| format!("[{}]", b.label))
            .collect();
        self.emit(format!(
            "[dry-run] send #{} reply_to={:?} {}\n{}",
            id,
            message.reply_to,
            buttons.join(" "),
            format::strip_html(&message.text)
        ));
        Ok(id)
    }

    fn edit(&self, message_id: MessageId, text: &str) -> Result<(), TransportError> {
        self.emit(format!("[dry-run] edit #{}\n{}", message_id, format::strip_html(text)));
        Ok(())
    }

    fn clear_buttons(&self, message_id: MessageId) -> Result<(), TransportError> {
        self.emit(format!("[dry-run] clear buttons #{}", message_id));
        Ok(())
    }

    fn acknowledge(&self, callback_id: &str, text: &str) -> Result<(), TransportError> {
        self.emit(format!("[dry-run] ack {} {}", callback_id, text));
        Ok(())
    }

    fn poll_replies(&self, timeout: Duration) -> Result<Vec<InboundReply>, TransportError> {
        std::thread::sleep(timeout.min(Duration::from_secs(1)));
        Ok(Vec::new())
    }
}
