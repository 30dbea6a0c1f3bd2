//! Relay: messages sent from chat back to a running session.
//!
//! Each scope has an append-only `inbox.jsonl` and an `inbox_cursor.json`
//! holding the byte offset up to which messages have been surfaced. Advancing
//! the cursor is the only way a message becomes read, so a message is never
//! surfaced twice. The scope's `relay.json` records whether relaying is paused.

use chrono::{DateTime, Utc};
use hookline_protocol::MessageId;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::scope::Scope;
use crate::store::{RecordKey, RecordKind, Store};
use crate::thread;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct InboxLine {
    sender: String,
    text: String,
    at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InboxMessage {
    pub sender: String,
    pub text: String,
    pub at: DateTime<Utc>,
    /// Cursor value that marks this message (and everything before it) read.
    pub read_through: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct InboxCursor {
    pub offset: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelayState {
    pub paused: bool,
    #[serde(default)]
    pub paused_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub paused_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActiveSession {
    pub scope: Scope,
    pub root_message_id: MessageId,
    pub paused: bool,
    pub unread: usize,
}

fn cursor_key(scope: &Scope) -> RecordKey {
    RecordKey::scoped(scope, RecordKind::InboxCursor)
}

fn relay_key(scope: &Scope) -> RecordKey {
    RecordKey::scoped(scope, RecordKind::Relay)
}

/// Queues a message for a session. Returns its id (byte offset in the log).
pub fn write(
    store: &Store,
    scope: &Scope,
    sender: &str,
    text: &str,
    now: DateTime<Utc>,
) -> Result<u64, StoreError> {
    let id = store.append_line(
        &store.storage().inbox_file(scope),
        &InboxLine {
            sender: sender.to_string(),
            text: text.to_string(),
            at: now,
        },
    )?;
    tracing::debug!(scope = %scope, id, "Relay message queued");
    Ok(id)
}

/// Messages past the read cursor, oldest first.
pub fn unread(store: &Store, scope: &Scope) -> Result<Vec<InboxMessage>, StoreError> {
    let cursor = store
        .load::<InboxCursor>(&cursor_key(scope))?
        .unwrap_or_default();
    let lines: Vec<(u64, InboxLine)> =
        store.read_lines_from(&store.storage().inbox_file(scope), cursor.offset)?;
    Ok(lines
        .into_iter()
        .map(|(read_through, line)| InboxMessage {
            sender: line.sender,
            text: line.text,
            at: line.at,
            read_through,
        })
        .collect())
}

/// Advances the cursor; it never moves backwards.
pub fn mark_read_through(store: &Store, scope: &Scope, offset: u64) -> Result<(), StoreError> {
    store.with_lock(&cursor_key(scope), |cursor: &mut Option<InboxCursor>| {
        let current = cursor.unwrap_or_default();
        if offset > current.offset {
            *cursor = Some(InboxCursor { offset });
        }
    })
}

/// Returns unread messages and marks them read in one step.
pub fn take_unread(store: &Store, scope: &Scope) -> Result<Vec<InboxMessage>, StoreError> {
    let messages = unread(store, scope)?;
    if let Some(last) = messages.last() {
        mark_read_through(store, scope, last.read_through)?;
    }
    Ok(messages)
}

/// Drops queued messages and the read cursor.
pub fn clear_inbox(store: &Store, scope: &Scope) -> Result<(), StoreError> {
    store.truncate_log(&store.storage().inbox_file(scope))?;
    store.clear(&cursor_key(scope))
}

/// Drops the inbox, its cursor and the pause flag.
pub fn clear(store: &Store, scope: &Scope) -> Result<(), StoreError> {
    clear_inbox(store, scope)?;
    store.clear(&relay_key(scope))
}

pub fn set_paused(
    store: &Store,
    scope: &Scope,
    paused: bool,
    by: Option<&str>,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    if paused {
        store.save(
            &relay_key(scope),
            &RelayState {
                paused: true,
                paused_at: Some(now),
                paused_by: by.map(str::to_string),
            },
        )
    } else {
        store.clear(&relay_key(scope))
    }
}

pub fn is_paused(store: &Store, scope: &Scope) -> Result<bool, StoreError> {
    Ok(store
        .load::<RelayState>(&relay_key(scope))?
        .is_some_and(|state| state.paused))
}

/// Scopes with a live thread, i.e. sessions that can receive messages.
pub fn active_sessions(store: &Store) -> Result<Vec<ActiveSession>, StoreError> {
    let mut sessions = Vec::new();
    for scope in std::iter::once(Scope::Global).chain(store.storage().project_scopes()) {
        let Some(root_message_id) = thread::get(store, &scope)? else {
            continue;
        };
        sessions.push(ActiveSession {
            paused: is_paused(store, &scope)?,
            unread: unread(store, &scope)?.len(),
            root_message_id,
            scope,
        });
    }
    Ok(sessions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageConfig;
    use tempfile::tempdir;

    fn store(root: &std::path::Path) -> Store {
        Store::new(StorageConfig::with_root(root.to_path_buf()))
    }

    #[test]
    fn read_messages_never_resurface() {
        let temp = tempdir().unwrap();
        let store = store(temp.path());
        let demo = Scope::project("demo");
        let now = Utc::now();

        write(&store, &demo, "ana", "first", now).unwrap();
        write(&store, &demo, "ana", "second", now).unwrap();

        let taken = take_unread(&store, &demo).unwrap();
        assert_eq!(taken.len(), 2);
        assert!(unread(&store, &demo).unwrap().is_empty());

        write(&store, &demo, "bo", "third", now).unwrap();
        let taken = take_unread(&store, &demo).unwrap();
        assert_eq!(taken.len(), 1);
        assert_eq!(taken[0].text, "third");

        // Stale cursor values are ignored.
        mark_read_through(&store, &demo, 0).unwrap();
        assert!(unread(&store, &demo).unwrap().is_empty());
    }

    #[test]
    fn clear_resets_inbox_and_pause() {
        let temp = tempdir().unwrap();
        let store = store(temp.path());
        let demo = Scope::project("demo");
        let now = Utc::now();

        write(&store, &demo, "ana", "hello", now).unwrap();
        set_paused(&store, &demo, true, Some("ana"), now).unwrap();
        assert!(is_paused(&store, &demo).unwrap());

        clear(&store, &demo).unwrap();
        assert!(!is_paused(&store, &demo).unwrap());
        assert!(unread(&store, &demo).unwrap().is_empty());

        write(&store, &demo, "ana", "again", now).unwrap();
        assert_eq!(unread(&store, &demo).unwrap().len(), 1);
    }

    #[test]
    fn active_sessions_require_live_thread() {
        let temp = tempdir().unwrap();
        let store = store(temp.path());
        let now = Utc::now();
        let demo = Scope::project("demo");

        thread::bind(&store, &demo, 7, None, now).unwrap();
        write(&store, &demo, "ana", "hi", now).unwrap();
        write(&store, &Scope::project("idle"), "ana", "hi", now).unwrap();

        let sessions = active_sessions(&store).unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].scope, demo);
        assert_eq!(sessions[0].root_message_id, 7);
        assert_eq!(sessions[0].unread, 1);
    }
}
