//! Telegram Bot API transport over blocking HTTP.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::Utc;
use hookline_protocol::{Button, InboundReply, MessageId, OutboundMessage, ReplyBody, Responder};
use serde_json::{json, Value};

use super::Transport;
use crate::error::TransportError;
use crate::format;

const API_BASE: &str = "https://api.telegram.org";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub struct TelegramTransport {
    agent: ureq::Agent,
    base_url: String,
    chat_id: String,
    /// Next `getUpdates` offset; acknowledges everything before it.
    next_update: AtomicI64,
}

impl TelegramTransport {
    pub fn new(bot_token: &str, chat_id: &str) -> Result<Self, TransportError> {
        if bot_token.is_empty() || chat_id.is_empty() {
            return Err(TransportError::NotConfigured(
                "bot_token and chat_id are required".to_string(),
            ));
        }
        Ok(Self::with_base_url(
            &format!("{}/bot{}", API_BASE, bot_token),
            chat_id,
        ))
    }

    /// Points the transport at an arbitrary Bot API compatible endpoint.
    pub fn with_base_url(base_url: &str, chat_id: &str) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(REQUEST_TIMEOUT)
            .build();
        Self {
            agent,
            base_url: base_url.trim_end_matches('/').to_string(),
            chat_id: chat_id.to_string(),
            next_update: AtomicI64::new(0),
        }
    }

    fn call(&self, method: &str, payload: Value, timeout: Duration) -> Result<Value, TransportError> {
        let url = format!("{}/{}", self.base_url, method);
        let response = self
            .agent
            .post(&url)
            .timeout(timeout)
            .send_json(payload);

        let body: Value = match response {
            Ok(resp) => resp.into_json().map_err(|e| TransportError::MalformedResponse {
                method: method.to_string(),
                details: e.to_string(),
            })?,
            Err(ureq::Error::Status(code, resp)) => {
                let text = resp.into_string().unwrap_or_default();
                let description = serde_json::from_str::<Value>(&text)
                    .ok()
                    .and_then(|v| v.get("description").and_then(Value::as_str).map(str::to_string))
                    .unwrap_or(text);
                return Err(TransportError::Rejected {
                    method: method.to_string(),
                    description: format!("{}: {}", code, description),
                });
            }
            Err(ureq::Error::Transport(err)) => {
                return Err(TransportError::Request {
                    method: method.to_string(),
                    details: err.to_string(),
                });
            }
        };

        if body.get("ok").and_then(Value::as_bool) != Some(true) {
            return Err(TransportError::Rejected {
                method: method.to_string(),
                description: body
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string(),
            });
        }
        Ok(body.get("result").cloned().unwrap_or(Value::Null))
    }

    fn send_payload(&self, message: &OutboundMessage, html: bool) -> Value {
        let mut payload = json!({ "chat_id": self.chat_id });
        if html {
            payload["text"] = json!(message.text);
            payload["parse_mode"] = json!("HTML");
        } else {
            payload["text"] = json!(format::strip_html(&message.text));
        }
        if let Some(reply_to) = message.reply_to {
            payload["reply_to_message_id"] = json!(reply_to);
            payload["allow_sending_without_reply"] = json!(true);
        }
        if !message.buttons.is_empty() {
            payload["reply_markup"] = keyboard(&message.buttons);
        }
        payload
    }
}

fn keyboard(buttons: &[Button]) -> Value {
    let row: Vec<Value> = buttons
        .iter()
        .map(|button| {
            json!({
                "text": button.label,
                "callback_data": button.action.callback_data(),
            })
        })
        .collect();
    json!({ "inline_keyboard": [row] })
}

fn message_id_of(method: &str, result: &Value) -> Result<MessageId, TransportError> {
    result
        .get("message_id")
        .and_then(Value::as_i64)
        .ok_or_else(|| TransportError::MalformedResponse {
            method: method.to_string(),
            details: "missing message_id".to_string(),
        })
}

fn responder(from: Option<&Value>) -> Responder {
    let from = from.cloned().unwrap_or(Value::Null);
    let id = from
        .get("id")
        .map(|id| match id {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .unwrap_or_default();
    let name = from
        .get("username")
        .or_else(|| from.get("first_name"))
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();
    Responder { id, name }
}

/// Converts one `getUpdates` entry; unsupported update kinds yield `None`.
fn parse_update(update: &Value) -> Option<InboundReply> {
    if let Some(callback) = update.get("callback_query") {
        return Some(InboundReply {
            from: responder(callback.get("from")),
            body: ReplyBody::Button {
                callback_id: callback.get("id")?.as_str()?.to_string(),
                data: callback.get("data").and_then(Value::as_str).unwrap_or("").to_string(),
            },
            in_reply_to: callback
                .get("message")
                .and_then(|m| m.get("message_id"))
                .and_then(Value::as_i64),
            message_id: None,
            received_at: Utc::now(),
        });
    }

    let message = update.get("message")?;
    let text = message.get("text")?.as_str()?.to_string();
    Some(InboundReply {
        from: responder(message.get("from")),
        body: ReplyBody::Text(text),
        in_reply_to: message
            .get("reply_to_message")
            .and_then(|m| m.get("message_id"))
            .and_then(Value::as_i64),
        message_id: message.get("message_id").and_then(Value::as_i64),
        received_at: Utc::now(),
    })
}

impl Transport for TelegramTransport {
    fn send(&self, message: &OutboundMessage) -> Result<MessageId, TransportError> {
        match self.call("sendMessage", self.send_payload(message, true), REQUEST_TIMEOUT) {
            Ok(result) => message_id_of("sendMessage", &result),
            Err(TransportError::Rejected { description, .. }) => {
                tracing::warn!(error = %description, "HTML send rejected, retrying as plain text");
                let result = self.call("sendMessage", self.send_payload(message, false), REQUEST_TIMEOUT)?;
                message_id_of("sendMessage", &result)
            }
            Err(err) => Err(err),
        }
    }

    fn edit(&self, message_id: MessageId, text: &str) -> Result<(), TransportError> {
        let payload = json!({
            "chat_id": self.chat_id,
            "message_id": message_id,
            "text": text,
            "parse_mode": "HTML",
            "reply_markup": { "inline_keyboard": [] },
        });
        self.call("editMessageText", payload, REQUEST_TIMEOUT).map(|_| ())
    }

    fn clear_buttons(&self, message_id: MessageId) -> Result<(), TransportError> {
        let payload = json!({
            "chat_id": self.chat_id,
            "message_id": message_id,
            "reply_markup": { "inline_keyboard": [] },
        });
        self.call("editMessageReplyMarkup", payload, REQUEST_TIMEOUT).map(|_| ())
    }

    fn acknowledge(&self, callback_id: &str, text: &str) -> Result<(), TransportError> {
        let payload = json!({
            "callback_query_id": callback_id,
            "text": text,
            "show_alert": false,
        });
        self.call("answerCallbackQuery", payload, REQUEST_TIMEOUT).map(|_| ())
    }

    fn poll_replies(&self, timeout: Duration) -> Result<Vec<InboundReply>, TransportError> {
        let payload = json!({
            "offset": self.next_update.load(Ordering::SeqCst),
            "timeout": timeout.as_secs(),
            "allowed_updates": ["message", "callback_query"],
        });
        let result = self.call("getUpdates", payload, timeout + REQUEST_TIMEOUT)?;
        let updates = result.as_array().cloned().unwrap_or_default();

        let mut replies = Vec::new();
        for update in &updates {
            if let Some(update_id) = update.get("update_id").and_then(Value::as_i64) {
                self.next_update.fetch_max(update_id + 1, Ordering::SeqCst);
            }
            match parse_update(update) {
                Some(reply) => replies.push(reply),
                None => tracing::debug!("Ignoring unsupported update"),
            }
        }
        Ok(replies)
    }
}
