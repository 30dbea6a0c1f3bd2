//! Temporary per-scope mute. Expired mutes are cleared lazily on read.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::scope::Scope;
use crate::store::{RecordKey, RecordKind, Store};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MuteState {
    pub scope: String,
    #[serde(default)]
    pub mute_until: Option<DateTime<Utc>>,
}

fn key(scope: &Scope) -> RecordKey {
    RecordKey::scoped(scope, RecordKind::Mute)
}

pub fn is_muted(store: &Store, scope: &Scope, now: DateTime<Utc>) -> Result<bool, StoreError> {
    let Some(state) = store.load::<MuteState>(&key(scope))? else {
        return Ok(false);
    };
    match state.mute_until {
        Some(until) if now < until => Ok(true),
        _ => {
            // Re-check under the lock; a concurrent mute may have extended it.
            store.with_lock(&key(scope), |state: &mut Option<MuteState>| {
                let expired = state
                    .as_ref()
                    .map_or(true, |s| s.mute_until.map_or(true, |until| now >= until));
                if expired {
                    *state = None;
                }
                !expired
            })
        }
    }
}

/// Mutes a scope for `duration` from `now`, returning the expiry.
pub fn mute_for(
    store: &Store,
    scope: &Scope,
    duration: Duration,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, StoreError> {
    let until = now + duration;
    store.save(
        &key(scope),
        &MuteState {
            scope: scope.to_string(),
            mute_until: Some(until),
        },
    )?;
    tracing::info!(scope = %scope, until = %until, "Scope muted");
    Ok(until)
}

pub fn unmute(store: &Store, scope: &Scope) -> Result<(), StoreError> {
    store.clear(&key(scope))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageConfig;
    use tempfile::tempdir;

    #[test]
    fn mute_expires_and_is_cleared() {
        let temp = tempdir().unwrap();
        let store = Store::new(StorageConfig::with_root(temp.path().to_path_buf()));
        let demo = Scope::project("demo");
        let now = Utc::now();

        mute_for(&store, &demo, Duration::minutes(30), now).unwrap();
        assert!(is_muted(&store, &demo, now + Duration::minutes(29)).unwrap());
        assert!(!is_muted(&store, &demo, now + Duration::minutes(30)).unwrap());
        assert!(store.load::<MuteState>(&key(&demo)).unwrap().is_none());
    }

    #[test]
    fn unmute_clears_immediately() {
        let temp = tempdir().unwrap();
        let store = Store::new(StorageConfig::with_root(temp.path().to_path_buf()));
        let demo = Scope::project("demo");
        let now = Utc::now();

        mute_for(&store, &demo, Duration::minutes(30), now).unwrap();
        unmute(&store, &demo).unwrap();
        assert!(!is_muted(&store, &demo, now).unwrap());
    }
}
