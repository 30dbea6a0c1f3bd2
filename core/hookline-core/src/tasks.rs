//! Per-session task completion counter.

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::scope::Scope;
use crate::sentinel::{self, SessionKey};
use crate::store::{RecordKey, RecordKind, Store};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskCounter {
    pub scope: String,
    #[serde(default)]
    pub session: Option<SessionKey>,
    #[serde(default)]
    pub completed: Vec<String>,
    #[serde(default)]
    pub total: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskProgress {
    pub completed: usize,
    /// Largest numeric task id seen, when ids are numeric.
    pub total: Option<u64>,
}

fn key(scope: &Scope) -> RecordKey {
    RecordKey::scoped(scope, RecordKind::Tasks)
}

/// Records a completed task. Repeated ids are counted once per session.
pub fn track(store: &Store, scope: &Scope, task_id: Option<&str>) -> Result<TaskProgress, StoreError> {
    let session = sentinel::session_key(store, scope)?;
    store.with_lock(&key(scope), |counter: &mut Option<TaskCounter>| {
        if counter.as_ref().is_some_and(|c| c.session != session) {
            *counter = None;
        }
        let counter = counter.get_or_insert_with(|| TaskCounter {
            scope: scope.to_string(),
            session: session.clone(),
            completed: Vec::new(),
            total: None,
        });

        match task_id.map(str::trim).filter(|id| !id.is_empty()) {
            Some(id) => {
                if !counter.completed.iter().any(|done| done == id) {
                    counter.completed.push(id.to_string());
                }
                if let Ok(numeric) = id.parse::<u64>() {
                    counter.total = Some(counter.total.map_or(numeric, |t| t.max(numeric)));
                }
            }
            None => {
                // Anonymous completions still count.
                let anonymous = format!("#{}", counter.completed.len() + 1);
                counter.completed.push(anonymous);
            }
        }

        TaskProgress {
            completed: counter.completed.len(),
            total: counter.total,
        }
    })
}

pub fn reset(store: &Store, scope: &Scope) -> Result<(), StoreError> {
    store.clear(&key(scope))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageConfig;
    use chrono::Utc;
    use tempfile::tempdir;

    #[test]
    fn duplicate_ids_count_once_and_total_tracks_max() {
        let temp = tempdir().unwrap();
        let store = Store::new(StorageConfig::with_root(temp.path().to_path_buf()));
        let demo = Scope::project("demo");

        track(&store, &demo, Some("2")).unwrap();
        track(&store, &demo, Some("2")).unwrap();
        let progress = track(&store, &demo, Some("5")).unwrap();
        assert_eq!(
            progress,
            TaskProgress {
                completed: 2,
                total: Some(5)
            }
        );
    }

    #[test]
    fn new_session_starts_fresh_count() {
        let temp = tempdir().unwrap();
        let store = Store::new(StorageConfig::with_root(temp.path().to_path_buf()));
        let demo = Scope::project("demo");
        let t0 = Utc::now();

        sentinel::enable(&store, &demo, t0).unwrap();
        track(&store, &demo, Some("a")).unwrap();
        track(&store, &demo, Some("b")).unwrap();

        store
            .save(
                &RecordKey::scoped(&demo, RecordKind::Sentinel),
                &sentinel::SentinelRecord {
                    scope: "demo".to_string(),
                    enabled: true,
                    enabled_at: t0 + chrono::Duration::seconds(1),
                },
            )
            .unwrap();
        let progress = track(&store, &demo, Some("a")).unwrap();
        assert_eq!(progress.completed, 1);
        assert_eq!(progress.total, None);
    }
}
