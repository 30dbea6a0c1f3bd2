//! Thread binder: maps a scope's session to the root message of its
//! conversation thread.
//!
//! Binding is compare-and-set. The first confirmed send of a session binds its
//! message as the root; later binders see `AlreadyBound` and must reply under
//! the existing root. A binding written under an older session key is treated
//! as absent and may be replaced.

use chrono::{DateTime, Utc};
use hookline_protocol::MessageId;
use serde::{Deserialize, Serialize};

use crate::buttons::LastButtons;
use crate::error::StoreError;
use crate::scope::Scope;
use crate::sentinel::{self, SessionKey};
use crate::store::{RecordKey, RecordKind, Store};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadBinding {
    pub scope: String,
    pub root_message_id: MessageId,
    #[serde(default)]
    pub session: Option<SessionKey>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript_path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindOutcome {
    /// This caller's message became the root.
    Bound(MessageId),
    /// A live binding already existed; the caller's id was not recorded.
    AlreadyBound(MessageId),
}

impl BindOutcome {
    pub fn root(&self) -> MessageId {
        match self {
            BindOutcome::Bound(id) | BindOutcome::AlreadyBound(id) => *id,
        }
    }
}

fn key(scope: &Scope) -> RecordKey {
    RecordKey::scoped(scope, RecordKind::Thread)
}

/// The live binding of a scope, if its session matches the current one.
pub fn binding(store: &Store, scope: &Scope) -> Result<Option<ThreadBinding>, StoreError> {
    let session = sentinel::session_key(store, scope)?;
    Ok(store
        .load::<ThreadBinding>(&key(scope))?
        .filter(|binding| binding.session == session))
}

pub fn get(store: &Store, scope: &Scope) -> Result<Option<MessageId>, StoreError> {
    Ok(binding(store, scope)?.map(|binding| binding.root_message_id))
}

pub fn bind(
    store: &Store,
    scope: &Scope,
    message_id: MessageId,
    transcript_path: Option<&str>,
    now: DateTime<Utc>,
) -> Result<BindOutcome, StoreError> {
    let session = sentinel::session_key(store, scope)?;
    let outcome = store.with_lock(&key(scope), |binding: &mut Option<ThreadBinding>| {
        if let Some(existing) = binding.as_ref().filter(|b| b.session == session) {
            return BindOutcome::AlreadyBound(existing.root_message_id);
        }
        *binding = Some(ThreadBinding {
            scope: scope.to_string(),
            root_message_id: message_id,
            session: session.clone(),
            created_at: now,
            transcript_path: transcript_path.map(str::to_string),
        });
        BindOutcome::Bound(message_id)
    })?;

    if let BindOutcome::AlreadyBound(root) = outcome {
        tracing::debug!(scope = %scope, root, lost = message_id, "Thread already bound");
    }
    Ok(outcome)
}

pub fn reset(store: &Store, scope: &Scope) -> Result<(), StoreError> {
    store.clear(&key(scope))
}

/// Finds the scope whose thread contains `message_id` (its root, or the
/// last button-bearing message of the session).
pub fn find_scope(store: &Store, message_id: MessageId) -> Result<Option<Scope>, StoreError> {
    for scope in std::iter::once(Scope::Global).chain(store.storage().project_scopes()) {
        let matches_root = store
            .load::<ThreadBinding>(&key(&scope))?
            .is_some_and(|binding| binding.root_message_id == message_id);
        let matches_buttons = store
            .load::<LastButtons>(&RecordKey::scoped(&scope, RecordKind::LastButtons))?
            .is_some_and(|last| last.message_id == message_id);
        if matches_root || matches_buttons {
            return Ok(Some(scope));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageConfig;
    use chrono::Duration;
    use tempfile::tempdir;

    fn store(root: &std::path::Path) -> Store {
        Store::new(StorageConfig::with_root(root.to_path_buf()))
    }

    #[test]
    fn second_bind_keeps_first_root() {
        let temp = tempdir().unwrap();
        let store = store(temp.path());
        let demo = Scope::project("demo");
        let now = Utc::now();
        sentinel::enable(&store, &demo, now).unwrap();

        assert_eq!(bind(&store, &demo, 10, None, now).unwrap(), BindOutcome::Bound(10));
        assert_eq!(
            bind(&store, &demo, 11, None, now).unwrap(),
            BindOutcome::AlreadyBound(10)
        );
        assert_eq!(get(&store, &demo).unwrap(), Some(10));
    }

    #[test]
    fn binding_from_previous_session_is_replaced() {
        let temp = tempdir().unwrap();
        let store = store(temp.path());
        let demo = Scope::project("demo");
        let t0 = Utc::now();
        sentinel::enable(&store, &demo, t0).unwrap();
        bind(&store, &demo, 10, Some("/tmp/t.jsonl"), t0).unwrap();

        // New session without going through enable's reset.
        store
            .save(
                &RecordKey::scoped(&demo, RecordKind::Sentinel),
                &sentinel::SentinelRecord {
                    scope: "demo".to_string(),
                    enabled: true,
                    enabled_at: t0 + Duration::seconds(1),
                },
            )
            .unwrap();

        assert_eq!(get(&store, &demo).unwrap(), None);
        assert_eq!(bind(&store, &demo, 20, None, t0).unwrap(), BindOutcome::Bound(20));
    }

    #[test]
    fn find_scope_by_root_message() {
        let temp = tempdir().unwrap();
        let store = store(temp.path());
        let now = Utc::now();
        bind(&store, &Scope::project("alpha"), 1, None, now).unwrap();
        bind(&store, &Scope::project("beta"), 2, None, now).unwrap();

        assert_eq!(find_scope(&store, 2).unwrap(), Some(Scope::project("beta")));
        assert_eq!(find_scope(&store, 3).unwrap(), None);
    }
}
