//! Inline button sets and the per-session record of the last message that
//! carries buttons.
//!
//! Only the newest message in a thread keeps its buttons. Before a new
//! button-bearing message is sent, the previous one is recorded here so the
//! sender can strip it.

use hookline_protocol::{Button, ButtonAction, MessageId};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::scope::Scope;
use crate::sentinel::{self, SessionKey};
use crate::store::{RecordKey, RecordKind, Store};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastButtons {
    pub scope: String,
    #[serde(default)]
    pub session: Option<SessionKey>,
    pub message_id: MessageId,
}

/// Buttons for an ordinary event message.
pub fn event_buttons(scope: &Scope) -> Vec<Button> {
    vec![
        Button::new(
            "Mute 30m",
            ButtonAction::MuteThirtyMinutes {
                scope: scope.to_string(),
            },
        ),
        Button::new(
            "Mute project",
            ButtonAction::MuteProject {
                scope: scope.to_string(),
            },
        ),
    ]
}

/// Buttons for the session-end message.
pub fn final_buttons(scope: &Scope) -> Vec<Button> {
    vec![
        Button::new(
            "Mute project",
            ButtonAction::MuteProject {
                scope: scope.to_string(),
            },
        ),
        Button::new(
            "New thread",
            ButtonAction::ResetThread {
                scope: scope.to_string(),
            },
        ),
    ]
}

pub fn approval_buttons(request_id: &str) -> Vec<Button> {
    vec![
        Button::new(
            "Approve",
            ButtonAction::Approve {
                request_id: request_id.to_string(),
            },
        ),
        Button::new(
            "Block",
            ButtonAction::Block {
                request_id: request_id.to_string(),
            },
        ),
    ]
}

fn key(scope: &Scope) -> RecordKey {
    RecordKey::scoped(scope, RecordKind::LastButtons)
}

/// Records `message_id` as the scope's button-bearing message and returns the
/// previous one of the same session, whose buttons should now be removed.
pub fn replace_last(
    store: &Store,
    scope: &Scope,
    message_id: MessageId,
) -> Result<Option<MessageId>, StoreError> {
    let session = sentinel::session_key(store, scope)?;
    store.with_lock(&key(scope), |last: &mut Option<LastButtons>| {
        let previous = last
            .take()
            .filter(|last| last.session == session && last.message_id != message_id)
            .map(|last| last.message_id);
        *last = Some(LastButtons {
            scope: scope.to_string(),
            session: session.clone(),
            message_id,
        });
        previous
    })
}

pub fn clear(store: &Store, scope: &Scope) -> Result<(), StoreError> {
    store.clear(&key(scope))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageConfig;
    use tempfile::tempdir;

    #[test]
    fn replace_returns_previous_message() {
        let temp = tempdir().unwrap();
        let store = Store::new(StorageConfig::with_root(temp.path().to_path_buf()));
        let demo = Scope::project("demo");

        assert_eq!(replace_last(&store, &demo, 1).unwrap(), None);
        assert_eq!(replace_last(&store, &demo, 2).unwrap(), Some(1));
        clear(&store, &demo).unwrap();
        assert_eq!(replace_last(&store, &demo, 3).unwrap(), None);
    }

    #[test]
    fn button_payloads_carry_scope() {
        let demo = Scope::project("demo");
        let data: Vec<String> = final_buttons(&demo)
            .iter()
            .map(|b| b.action.callback_data())
            .collect();
        assert_eq!(data, vec!["mute_proj_demo", "reset_demo"]);
    }
}
