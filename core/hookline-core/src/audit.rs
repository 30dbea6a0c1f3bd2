//! Append-only audit trail of approval decisions (`audit.jsonl`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::approval::ApprovalRequest;
use crate::error::StoreError;
use crate::store::Store;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub request_id: String,
    pub scope: String,
    pub tool_name: String,
    pub decision: String,
    #[serde(default)]
    pub responder: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl AuditEntry {
    pub fn from_request(request: &ApprovalRequest, now: DateTime<Utc>) -> Self {
        Self {
            timestamp: now,
            request_id: request.request_id.clone(),
            scope: request.scope.clone(),
            tool_name: request.tool_name.clone(),
            decision: request.status.as_str().to_string(),
            responder: request.responder.clone(),
            reason: request.reason.clone(),
        }
    }
}

pub fn record(store: &Store, entry: &AuditEntry) -> Result<(), StoreError> {
    store.append_line(&store.storage().audit_file(), entry)?;
    Ok(())
}

/// All entries at or after `since`, oldest first.
pub fn since(store: &Store, since: DateTime<Utc>) -> Result<Vec<AuditEntry>, StoreError> {
    let entries: Vec<(u64, AuditEntry)> =
        store.read_lines_from(&store.storage().audit_file(), 0)?;
    Ok(entries
        .into_iter()
        .map(|(_, entry)| entry)
        .filter(|entry| entry.timestamp >= since)
        .collect())
}
