//! Debounce aggregator: collapses bursts of high-frequency events per scope
//! into a single summary message.
//!
//! Entries accumulate in the scope's `debounce.json` record. A batch is
//! flushed (taken and cleared in one locked step) when its window has elapsed
//! since the first entry, when a non-batched event arrives for the same scope,
//! or when the session ends. Whoever takes the batch owns it; a second flusher
//! finds nothing.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::scope::Scope;
use crate::store::{RecordKey, RecordKind, Store};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebounceEntry {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebounceBatch {
    pub scope: String,
    pub entries: Vec<DebounceEntry>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl DebounceBatch {
    pub fn summary(&self) -> BatchSummary {
        let mut kinds: BTreeMap<&str, KindSummary> = BTreeMap::new();
        for entry in &self.entries {
            let summary = kinds.entry(entry.kind.as_str()).or_insert_with(|| KindSummary {
                kind: entry.kind.clone(),
                count: 0,
                labels: Vec::new(),
            });
            summary.count += 1;
            if let Some(label) = &entry.label {
                if !summary.labels.contains(label) {
                    summary.labels.push(label.clone());
                }
            }
        }

        BatchSummary {
            scope: self.scope.clone(),
            total: self.entries.len(),
            kinds: kinds.into_values().collect(),
            first_seen: self.first_seen,
            last_seen: self.last_seen,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct KindSummary {
    pub kind: String,
    pub count: usize,
    /// Distinct labels in arrival order.
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchSummary {
    pub scope: String,
    pub total: usize,
    pub kinds: Vec<KindSummary>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl BatchSummary {
    pub fn count_of(&self, kind: &str) -> usize {
        self.kinds
            .iter()
            .find(|k| k.kind == kind)
            .map_or(0, |k| k.count)
    }

    pub fn span(&self) -> Duration {
        self.last_seen - self.first_seen
    }
}

fn key(scope: &Scope) -> RecordKey {
    RecordKey::scoped(scope, RecordKind::Debounce)
}

/// Adds one event to the scope's pending batch. Returns the batch size.
pub fn accumulate(
    store: &Store,
    scope: &Scope,
    kind: &str,
    label: Option<&str>,
    now: DateTime<Utc>,
) -> Result<usize, StoreError> {
    store.with_lock(&key(scope), |batch: &mut Option<DebounceBatch>| {
        let batch = batch.get_or_insert_with(|| DebounceBatch {
            scope: scope.to_string(),
            entries: Vec::new(),
            first_seen: now,
            last_seen: now,
        });
        batch.entries.push(DebounceEntry {
            kind: kind.to_string(),
            label: label.map(str::to_string),
            at: now,
        });
        batch.last_seen = batch.last_seen.max(now);
        batch.entries.len()
    })
}

/// True once `window` has elapsed since the batch's first entry.
pub fn should_flush(batch: &DebounceBatch, window: Duration, now: DateTime<Utc>) -> bool {
    !batch.entries.is_empty() && now - batch.first_seen >= window
}

pub fn pending(store: &Store, scope: &Scope) -> Result<Option<DebounceBatch>, StoreError> {
    Ok(store
        .load::<DebounceBatch>(&key(scope))?
        .filter(|batch| !batch.entries.is_empty()))
}

/// Takes and clears the pending batch, if any.
pub fn flush(store: &Store, scope: &Scope) -> Result<Option<DebounceBatch>, StoreError> {
    store.with_lock(&key(scope), |batch: &mut Option<DebounceBatch>| {
        batch.take().filter(|batch| !batch.entries.is_empty())
    })
}

/// Takes the pending batch only if it is stale; check and take share a lock.
pub fn flush_if_stale(
    store: &Store,
    scope: &Scope,
    window: Duration,
    now: DateTime<Utc>,
) -> Result<Option<DebounceBatch>, StoreError> {
    // Lock-free pre-check keeps the common case from contending.
    match pending(store, scope)? {
        Some(batch) if should_flush(&batch, window, now) => {}
        _ => return Ok(None),
    }

    store.with_lock(&key(scope), |batch: &mut Option<DebounceBatch>| {
        let stale = batch
            .as_ref()
            .is_some_and(|current| should_flush(current, window, now));
        if stale {
            batch.take()
        } else {
            None
        }
    })
}

/// Puts a taken batch back, merging with anything accumulated since.
///
/// Used when delivering a flushed batch failed.
pub fn restore(store: &Store, scope: &Scope, taken: DebounceBatch) -> Result<(), StoreError> {
    store.with_lock(&key(scope), |batch: &mut Option<DebounceBatch>| {
        let merged = match batch.take() {
            Some(newer) => {
                let mut entries = taken.entries;
                entries.extend(newer.entries);
                DebounceBatch {
                    scope: taken.scope,
                    entries,
                    first_seen: taken.first_seen.min(newer.first_seen),
                    last_seen: taken.last_seen.max(newer.last_seen),
                }
            }
            None => taken,
        };
        *batch = Some(merged);
    })
}

/// Scopes (global included) whose pending batch is stale.
pub fn stale_scopes(
    store: &Store,
    window: Duration,
    now: DateTime<Utc>,
) -> Result<Vec<Scope>, StoreError> {
    let mut stale = Vec::new();
    for scope in std::iter::once(Scope::Global).chain(store.storage().project_scopes()) {
        if let Some(batch) = pending(store, &scope)? {
            if should_flush(&batch, window, now) {
                stale.push(scope);
            }
        }
    }
    Ok(stale)
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
    fn summary_counts_every_entry() {
        let temp = tempdir().unwrap();
        let store = store(temp.path());
        let demo = Scope::project("demo");
        let t0 = Utc::now();

        accumulate(&store, &demo, "SubagentStop", None, t0).unwrap();
        accumulate(&store, &demo, "TeammateIdle", Some("ana"), t0 + Duration::seconds(1)).unwrap();
        accumulate(&store, &demo, "TeammateIdle", Some("ana"), t0 + Duration::seconds(2)).unwrap();
        let size =
            accumulate(&store, &demo, "TeammateIdle", Some("bo"), t0 + Duration::seconds(3)).unwrap();
        assert_eq!(size, 4);

        let summary = flush(&store, &demo).unwrap().unwrap().summary();
        assert_eq!(summary.total, 4);
        assert_eq!(summary.count_of("SubagentStop"), 1);
        assert_eq!(summary.count_of("TeammateIdle"), 3);
        let idle = summary.kinds.iter().find(|k| k.kind == "TeammateIdle").unwrap();
        assert_eq!(idle.labels, vec!["ana".to_string(), "bo".to_string()]);
        assert_eq!(summary.span(), Duration::seconds(3));

        assert!(flush(&store, &demo).unwrap().is_none());
    }

    #[test]
    fn stale_flush_waits_for_window() {
        let temp = tempdir().unwrap();
        let store = store(temp.path());
        let demo = Scope::project("demo");
        let window = Duration::seconds(30);
        let t0 = Utc::now();

        accumulate(&store, &demo, "SubagentStop", None, t0).unwrap();
        assert!(flush_if_stale(&store, &demo, window, t0 + Duration::seconds(29))
            .unwrap()
            .is_none());
        assert!(stale_scopes(&store, window, t0 + Duration::seconds(29))
            .unwrap()
            .is_empty());

        assert_eq!(
            stale_scopes(&store, window, t0 + Duration::seconds(30)).unwrap(),
            vec![demo.clone()]
        );
        let batch = flush_if_stale(&store, &demo, window, t0 + Duration::seconds(30))
            .unwrap()
            .unwrap();
        assert_eq!(batch.entries.len(), 1);
        assert!(pending(&store, &demo).unwrap().is_none());
    }

    #[test]
    fn restore_merges_with_newer_entries() {
        let temp = tempdir().unwrap();
        let store = store(temp.path());
        let demo = Scope::project("demo");
        let t0 = Utc::now();

        accumulate(&store, &demo, "SubagentStop", None, t0).unwrap();
        let taken = flush(&store, &demo).unwrap().unwrap();
        accumulate(&store, &demo, "SubagentStop", None, t0 + Duration::seconds(5)).unwrap();

        restore(&store, &demo, taken).unwrap();
        let batch = pending(&store, &demo).unwrap().unwrap();
        assert_eq!(batch.entries.len(), 2);
        assert_eq!(batch.first_seen, t0);
    }
}
