//! Sentinel gate: whether relaying is switched on for a scope.
//!
//! A scope is enabled when it has its own sentinel record or when the global
//! sentinel exists. The `enabled_at` timestamp of whichever record grants
//! enablement doubles as the scope's *session key*: thread bindings, task
//! counters and button records remember the key they were created under and
//! are ignored once it changes.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::scope::Scope;
use crate::store::{RecordKey, RecordKind, Store};

/// Opaque session identifier derived from a sentinel's `enabled_at`.
pub type SessionKey = String;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentinelRecord {
    pub scope: String,
    pub enabled: bool,
    pub enabled_at: DateTime<Utc>,
}

impl SentinelRecord {
    pub fn session_key(&self) -> SessionKey {
        self.enabled_at.to_rfc3339_opts(SecondsFormat::Nanos, true)
    }
}

fn key(scope: &Scope) -> RecordKey {
    RecordKey::scoped(scope, RecordKind::Sentinel)
}

fn load(store: &Store, scope: &Scope) -> Result<Option<SentinelRecord>, StoreError> {
    Ok(store
        .load::<SentinelRecord>(&key(scope))?
        .filter(|record| record.enabled))
}

/// The record that currently grants enablement to `scope`, if any.
pub fn effective(store: &Store, scope: &Scope) -> Result<Option<SentinelRecord>, StoreError> {
    if let Some(record) = load(store, scope)? {
        return Ok(Some(record));
    }
    if scope.is_global() {
        return Ok(None);
    }
    load(store, &Scope::Global)
}

pub fn is_enabled(store: &Store, scope: &Scope) -> Result<bool, StoreError> {
    Ok(effective(store, scope)?.is_some())
}

pub fn session_key(store: &Store, scope: &Scope) -> Result<Option<SessionKey>, StoreError> {
    Ok(effective(store, scope)?.map(|record| record.session_key()))
}

/// Time since the effective sentinel was written.
pub fn session_age(
    store: &Store,
    scope: &Scope,
    now: DateTime<Utc>,
) -> Result<Option<chrono::Duration>, StoreError> {
    Ok(effective(store, scope)?.map(|record| now - record.enabled_at))
}

/// Enables a scope, starting a new session for it.
///
/// Enabling the global scope also starts a new session for every known
/// project that has no sentinel of its own, since their session key derives
/// from the global record.
pub fn enable(store: &Store, scope: &Scope, now: DateTime<Utc>) -> Result<SentinelRecord, StoreError> {
    let record = SentinelRecord {
        scope: scope.to_string(),
        enabled: true,
        enabled_at: now,
    };
    store.save(&key(scope), &record)?;
    reset_session_state(store, scope)?;

    if scope.is_global() {
        for project in store.storage().project_scopes() {
            if load(store, &project)?.is_none() {
                reset_session_state(store, &project)?;
            }
        }
    }

    tracing::info!(scope = %scope, "Relay enabled");
    Ok(record)
}

/// Disables a scope. Disabling global clears every project sentinel as well.
///
/// In-flight approvals are not affected.
pub fn disable(store: &Store, scope: &Scope) -> Result<(), StoreError> {
    store.clear(&key(scope))?;
    if scope.is_global() {
        for project in store.storage().project_scopes() {
            store.clear(&key(&project))?;
        }
    }
    tracing::info!(scope = %scope, "Relay disabled");
    Ok(())
}

/// Every scope with its own sentinel, global first.
pub fn list(store: &Store) -> Result<Vec<(Scope, SentinelRecord)>, StoreError> {
    let mut enabled = Vec::new();
    for scope in std::iter::once(Scope::Global).chain(store.storage().project_scopes()) {
        if let Some(record) = load(store, &scope)? {
            enabled.push((scope, record));
        }
    }
    Ok(enabled)
}

/// Drops the per-session records of a scope: pending batch, thread binding,
/// task progress and the last button-bearing message.
pub fn reset_session_state(store: &Store, scope: &Scope) -> Result<(), StoreError> {
    for kind in [
        RecordKind::Debounce,
        RecordKind::Thread,
        RecordKind::Tasks,
        RecordKind::LastButtons,
    ] {
        store.clear(&RecordKey::scoped(scope, kind))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageConfig;
    use crate::thread::{self, BindOutcome};
    use chrono::Duration;
    use tempfile::tempdir;

    fn store(root: &std::path::Path) -> Store {
        Store::new(StorageConfig::with_root(root.to_path_buf()))
    }

    #[test]
    fn scope_or_global_enables() {
        let temp = tempdir().unwrap();
        let store = store(temp.path());
        let demo = Scope::project("demo");
        let now = Utc::now();

        assert!(!is_enabled(&store, &demo).unwrap());
        enable(&store, &Scope::Global, now).unwrap();
        assert!(is_enabled(&store, &demo).unwrap());

        disable(&store, &Scope::Global).unwrap();
        enable(&store, &demo, now).unwrap();
        assert!(is_enabled(&store, &demo).unwrap());
        assert!(!is_enabled(&store, &Scope::project("other")).unwrap());
    }

    #[test]
    fn disabling_global_clears_project_sentinels() {
        let temp = tempdir().unwrap();
        let store = store(temp.path());
        let demo = Scope::project("demo");
        let now = Utc::now();

        enable(&store, &demo, now).unwrap();
        enable(&store, &Scope::Global, now).unwrap();
        disable(&store, &Scope::Global).unwrap();

        assert!(!is_enabled(&store, &demo).unwrap());
        assert!(list(&store).unwrap().is_empty());
    }

    #[test]
    fn session_key_prefers_scope_record() {
        let temp = tempdir().unwrap();
        let store = store(temp.path());
        let demo = Scope::project("demo");
        let t0 = Utc::now();

        let global = enable(&store, &Scope::Global, t0).unwrap();
        assert_eq!(session_key(&store, &demo).unwrap(), Some(global.session_key()));

        let own = enable(&store, &demo, t0 + Duration::seconds(5)).unwrap();
        assert_eq!(session_key(&store, &demo).unwrap(), Some(own.session_key()));
        assert_eq!(
            session_age(&store, &demo, t0 + Duration::seconds(65)).unwrap(),
            Some(Duration::seconds(60))
        );
    }

    #[test]
    fn reenabling_scope_resets_thread_binding() {
        let temp = tempdir().unwrap();
        let store = store(temp.path());
        let demo = Scope::project("demo");
        let t0 = Utc::now();

        enable(&store, &demo, t0).unwrap();
        assert_eq!(
            thread::bind(&store, &demo, 42, None, t0).unwrap(),
            BindOutcome::Bound(42)
        );
        assert_eq!(thread::get(&store, &demo).unwrap(), Some(42));

        enable(&store, &demo, t0 + Duration::seconds(1)).unwrap();
        assert_eq!(thread::get(&store, &demo).unwrap(), None);
    }

    #[test]
    fn global_reenable_resets_only_projects_without_own_sentinel() {
        let temp = tempdir().unwrap();
        let store = store(temp.path());
        let inherited = Scope::project("inherited");
        let pinned = Scope::project("pinned");
        let t0 = Utc::now();

        enable(&store, &Scope::Global, t0).unwrap();
        enable(&store, &pinned, t0).unwrap();
        thread::bind(&store, &inherited, 1, None, t0).unwrap();
        thread::bind(&store, &pinned, 2, None, t0).unwrap();

        enable(&store, &Scope::Global, t0 + Duration::seconds(1)).unwrap();

        assert_eq!(thread::get(&store, &inherited).unwrap(), None);
        assert_eq!(thread::get(&store, &pinned).unwrap(), Some(2));
    }
}
