//! Approval gate: a hook process blocks on a human decision made elsewhere.
//!
//! # Protocol
//!
//! 1. The requester creates a named pipe `approvals/approval_<id>`, opens its
//!    read end without blocking and persists a `pending` record under
//!    `state/approvals/<id>.json`.
//! 2. The daemon decides by compare-and-set on the record
//!    (`pending → approved | blocked`) and then writes the decision into the
//!    pipe to wake the requester. The record is authoritative; the pipe only
//!    shortens the wait.
//! 3. The requester polls the pipe in short slices and re-reads the record
//!    after every wake. At the deadline it tries `pending → timed_out` itself;
//!    if a decision landed first, the decision stands.
//!
//! Outcomes are fail-closed: anything other than `approved` blocks the tool.
//! The daemon's [`ApprovalGate::sweep`] times out requests whose requester
//! vanished and removes old terminal records with their pipes.

use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use hookline_protocol::{Decision, MessageId};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::audit::{self, AuditEntry};
use crate::error::{HooklineError, StoreError};
use crate::lock;
use crate::scope::Scope;
use crate::store::{RecordKey, Store};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Extra time past the deadline before the sweep gives up on a live requester.
const SWEEP_GRACE: Duration = Duration::from_secs(10);

/// How long terminal records are kept before the sweep deletes them.
const RETENTION: Duration = Duration::from_secs(3600);

/// Upper bound on a single `poll(2)` slice while waiting.
const WAIT_SLICE: Duration = Duration::from_millis(250);

const HANGUP_PAUSE: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Blocked,
    TimedOut,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Blocked => "blocked",
            ApprovalStatus::TimedOut => "timed_out",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ApprovalStatus::Pending)
    }
}

impl From<Decision> for ApprovalStatus {
    fn from(decision: Decision) -> Self {
        match decision {
            Decision::Approve => ApprovalStatus::Approved,
            Decision::Block => ApprovalStatus::Blocked,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub request_id: String,
    pub scope: String,
    pub tool_name: String,
    pub payload_summary: String,
    pub created_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub requester_pid: u32,
    #[serde(default)]
    pub requester_started: Option<u64>,
    #[serde(default)]
    pub message_id: Option<MessageId>,
    pub status: ApprovalStatus,
    #[serde(default)]
    pub responder: Option<String>,
    #[serde(default)]
    pub decided_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl ApprovalRequest {
    fn requester_alive(&self) -> bool {
        lock::is_pid_alive_verified(self.requester_pid, self.requester_started)
    }
}

/// Final result handed back to the requester.
#[derive(Debug, Clone, PartialEq)]
pub struct ApprovalOutcome {
    pub status: ApprovalStatus,
    pub responder: Option<String>,
    pub reason: String,
}

impl ApprovalOutcome {
    pub fn decision(&self) -> Decision {
        if self.status == ApprovalStatus::Approved {
            Decision::Approve
        } else {
            Decision::Block
        }
    }

    fn from_request(request: &ApprovalRequest) -> Self {
        let reason = request.reason.clone().unwrap_or_else(|| match request.status {
            ApprovalStatus::Approved => "Approved".to_string(),
            ApprovalStatus::Blocked => "Blocked".to_string(),
            ApprovalStatus::TimedOut => "Approval timed out".to_string(),
            ApprovalStatus::Pending => "Approval still pending".to_string(),
        });
        Self {
            status: request.status,
            responder: request.responder.clone(),
            reason,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResolveOutcome {
    Resolved(ApprovalRequest),
    AlreadyResolved(ApprovalStatus),
    Unknown,
}

#[derive(Debug, Default)]
pub struct SweepReport {
    /// Requests this sweep moved to `timed_out`.
    pub timed_out: Vec<ApprovalRequest>,
    /// Subset of `timed_out` whose requester had already exited; no hook
    /// process is left to update their prompts.
    pub abandoned: Vec<ApprovalRequest>,
    pub removed: usize,
}

#[derive(Debug, Clone)]
pub struct ApprovalGate {
    store: Store,
    timeout: Duration,
}

impl ApprovalGate {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn pipe_path(&self, request_id: &str) -> PathBuf {
        self.store.storage().approval_pipe(request_id)
    }

    pub fn load(&self, request_id: &str) -> Result<Option<ApprovalRequest>, StoreError> {
        self.store.load(&RecordKey::approval(request_id))
    }

    /// Registers a pending request and returns the handle to wait on.
    pub fn open(
        &self,
        scope: &Scope,
        tool_name: &str,
        payload_summary: &str,
        now: DateTime<Utc>,
    ) -> Result<PendingApproval, HooklineError> {
        let request_id = new_request_id();
        let pipe_path = self.pipe_path(&request_id);

        let pipes_dir = self.store.storage().pipes_dir();
        fs_err::create_dir_all(&pipes_dir).map_err(|source| HooklineError::ApprovalSetup {
            context: "create pipe directory".to_string(),
            source,
        })?;
        make_fifo(&pipe_path).map_err(|source| HooklineError::ApprovalSetup {
            context: format!("mkfifo {}", pipe_path.display()),
            source,
        })?;

        let reader = match File::options()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&pipe_path)
        {
            Ok(reader) => reader,
            Err(source) => {
                let _ = std::fs::remove_file(&pipe_path);
                return Err(HooklineError::ApprovalSetup {
                    context: "open pipe".to_string(),
                    source,
                });
            }
        };

        let pid = std::process::id();
        let request = ApprovalRequest {
            request_id: request_id.clone(),
            scope: scope.to_string(),
            tool_name: tool_name.to_string(),
            payload_summary: payload_summary.to_string(),
            created_at: now,
            deadline: now + to_chrono(self.timeout),
            requester_pid: pid,
            requester_started: lock::get_process_start_time(pid),
            message_id: None,
            status: ApprovalStatus::Pending,
            responder: None,
            decided_at: None,
            reason: None,
        };

        if let Err(err) = self.store.save(&RecordKey::approval(&request_id), &request) {
            let _ = std::fs::remove_file(&pipe_path);
            return Err(err.into());
        }

        tracing::info!(request_id = %request_id, scope = %scope, tool = %tool_name, "Approval requested");
        Ok(PendingApproval {
            gate: self.clone(),
            request,
            reader: Some(reader),
            pipe_path,
        })
    }

    /// Records the message that carries the approval prompt.
    pub fn attach_message(&self, request_id: &str, message_id: MessageId) -> Result<(), StoreError> {
        self.store
            .with_lock(&RecordKey::approval(request_id), |record: &mut Option<ApprovalRequest>| {
                if let Some(record) = record.as_mut() {
                    record.message_id = Some(message_id);
                }
            })
    }

    /// Applies a decision if the request is still pending, then wakes the
    /// requester.
    pub fn resolve(
        &self,
        request_id: &str,
        decision: Decision,
        responder: &str,
        now: DateTime<Utc>,
    ) -> Result<ResolveOutcome, StoreError> {
        let outcome = self.store.with_lock(
            &RecordKey::approval(request_id),
            |record: &mut Option<ApprovalRequest>| match record.as_mut() {
                None => ResolveOutcome::Unknown,
                Some(record) if record.status.is_terminal() => {
                    ResolveOutcome::AlreadyResolved(record.status)
                }
                Some(record) => {
                    record.status = decision.into();
                    record.responder = Some(responder.to_string());
                    record.decided_at = Some(now);
                    record.reason = Some(match decision {
                        Decision::Approve => format!("Approved by {}", responder),
                        Decision::Block => format!("Blocked by {}", responder),
                    });
                    ResolveOutcome::Resolved(record.clone())
                }
            },
        )?;

        match &outcome {
            ResolveOutcome::Resolved(_) => {
                tracing::info!(request_id, decision = decision.as_str(), responder, "Approval resolved");
                self.notify(request_id, decision.as_str());
            }
            ResolveOutcome::AlreadyResolved(status) => {
                tracing::info!(request_id, status = status.as_str(), "Approval already resolved");
            }
            ResolveOutcome::Unknown => {
                tracing::warn!(request_id, "Decision for unknown approval request");
            }
        }
        Ok(outcome)
    }

    /// Moves a pending request to `timed_out`. Returns the updated record, or
    /// `None` if it was no longer pending.
    pub fn expire(
        &self,
        request_id: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ApprovalRequest>, StoreError> {
        self.store.with_lock(
            &RecordKey::approval(request_id),
            |record: &mut Option<ApprovalRequest>| match record.as_mut() {
                Some(record) if record.status == ApprovalStatus::Pending => {
                    record.status = ApprovalStatus::TimedOut;
                    record.decided_at = Some(now);
                    record.reason = Some(reason.to_string());
                    Some(record.clone())
                }
                _ => None,
            },
        )
    }

    /// Best-effort wake-up of a waiting requester.
    fn notify(&self, request_id: &str, payload: &str) {
        let path = self.pipe_path(request_id);
        let writer = File::options()
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&path);
        match writer {
            Ok(mut writer) => {
                if let Err(err) = writer.write_all(format!("{}\n", payload).as_bytes()) {
                    tracing::debug!(error = %err, request_id, "Failed to write approval pipe");
                }
            }
            // ENXIO: nobody has the read end open; the requester re-reads the record anyway.
            Err(err) => {
                tracing::debug!(error = %err, request_id, "Approval pipe has no reader");
            }
        }
    }

    pub fn list(&self) -> Result<Vec<ApprovalRequest>, StoreError> {
        let dir = self.store.storage().approvals_state_dir();
        let mut requests = Vec::new();
        for entry in walkdir::WalkDir::new(&dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|entry| entry.ok())
        {
            let path = entry.path();
            if path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }
            let Some(request_id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Some(request) = self.load(request_id)? {
                requests.push(request);
            }
        }
        requests.sort_by_key(|request| request.created_at);
        Ok(requests)
    }

    pub fn pending_count(&self) -> Result<usize, StoreError> {
        Ok(self
            .list()?
            .iter()
            .filter(|request| request.status == ApprovalStatus::Pending)
            .count())
    }

    /// Times out orphaned requests and deletes expired terminal records.
    pub fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, StoreError> {
        let mut report = SweepReport::default();
        let grace = to_chrono(SWEEP_GRACE);
        let retention = to_chrono(RETENTION);

        for request in self.list()? {
            let id = request.request_id.as_str();
            if request.status == ApprovalStatus::Pending {
                let requester_gone = !request.requester_alive();
                let overdue = now > request.deadline + grace;
                if !requester_gone && !overdue {
                    continue;
                }
                let reason = if requester_gone {
                    "Requester exited before a decision"
                } else {
                    "Approval timed out"
                };
                if let Some(expired) = self.expire(id, reason, now)? {
                    tracing::info!(request_id = id, reason, "Approval expired by sweep");
                    if requester_gone {
                        // Nobody else will write the audit entry.
                        if let Err(err) = audit::record(&self.store, &AuditEntry::from_request(&expired, now)) {
                            tracing::warn!(error = %err, request_id = id, "Failed to audit expired approval");
                        }
                        report.abandoned.push(expired.clone());
                    } else {
                        self.notify(id, "timeout");
                    }
                    report.timed_out.push(expired);
                }
                continue;
            }

            let finished_at = request.decided_at.unwrap_or(request.created_at);
            if now - finished_at > retention {
                self.remove(id)?;
                report.removed += 1;
            }
        }
        Ok(report)
    }

    fn remove(&self, request_id: &str) -> Result<(), StoreError> {
        let key = RecordKey::approval(request_id);
        self.store.clear(&key)?;
        let record_path = self.store.record_path(&key);
        for path in [record_path.with_extension("lock"), self.pipe_path(request_id)] {
            if let Err(err) = std::fs::remove_file(&path) {
                if err.kind() != ErrorKind::NotFound {
                    tracing::debug!(error = %err, path = %path.display(), "Failed to remove approval file");
                }
            }
        }
        Ok(())
    }
}

/// A registered request owned by the hook process that is waiting on it.
#[derive(Debug)]
pub struct PendingApproval {
    gate: ApprovalGate,
    request: ApprovalRequest,
    reader: Option<File>,
    pipe_path: PathBuf,
}

impl PendingApproval {
    pub fn request_id(&self) -> &str {
        &self.request.request_id
    }

    pub fn request(&self) -> &ApprovalRequest {
        &self.request
    }

    /// Blocks until the request is decided or its deadline passes.
    pub fn wait(mut self) -> Result<ApprovalOutcome, StoreError> {
        let request_id = self.request.request_id.clone();
        let final_record = loop {
            let current = match self.gate.load(&request_id)? {
                Some(record) => record,
                None => {
                    tracing::warn!(request_id = %request_id, "Approval record disappeared; blocking");
                    let mut vanished = self.request.clone();
                    vanished.status = ApprovalStatus::Blocked;
                    vanished.reason = Some("Approval record missing".to_string());
                    break vanished;
                }
            };
            if current.status.is_terminal() {
                break current;
            }

            let now = Utc::now();
            if now >= current.deadline {
                match self.gate.expire(&request_id, "Approval timed out", now)? {
                    Some(expired) => break expired,
                    // A decision won the race; read it on the next pass.
                    None => continue,
                }
            }

            let until_deadline = (current.deadline - now).to_std().unwrap_or_default();
            self.wait_slice(until_deadline.min(WAIT_SLICE));
        };

        self.cleanup();
        let outcome = ApprovalOutcome::from_request(&final_record);
        if let Err(err) = audit::record(&self.gate.store, &AuditEntry::from_request(&final_record, Utc::now())) {
            tracing::warn!(error = %err, request_id = %request_id, "Failed to write audit entry");
        }
        tracing::info!(
            request_id = %request_id,
            status = final_record.status.as_str(),
            "Approval finished"
        );
        Ok(outcome)
    }

    fn wait_slice(&mut self, slice: Duration) {
        let started = Instant::now();
        let mut woke = false;
        if let Some(reader) = self.reader.as_mut() {
            let mut fds = libc::pollfd {
                fd: reader.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            };
            let rc = unsafe { libc::poll(&mut fds, 1, slice.as_millis() as libc::c_int) };
            if rc > 0 && fds.revents & libc::POLLIN != 0 {
                let mut buf = [0u8; 64];
                // Drain; content is only a hint.
                while let Ok(n) = reader.read(&mut buf) {
                    if n == 0 {
                        break;
                    }
                    woke = true;
                }
            }
        }

        // A hung-up pipe polls ready without data; pace the retries.
        if !woke {
            let elapsed = started.elapsed();
            if elapsed < slice {
                std::thread::sleep((slice - elapsed).min(HANGUP_PAUSE));
            }
        }
    }

    fn cleanup(&mut self) {
        self.reader.take();
        if let Err(err) = std::fs::remove_file(&self.pipe_path) {
            if err.kind() != ErrorKind::NotFound {
                tracing::debug!(error = %err, path = %self.pipe_path.display(), "Failed to remove approval pipe");
            }
        }
    }
}

impl Drop for PendingApproval {
    fn drop(&mut self) {
        self.cleanup();
    }
}

fn new_request_id() -> String {
    let value: u64 = rand::thread_rng().gen();
    format!("{:012x}", value & 0xffff_ffff_ffff)
}

fn make_fifo(path: &Path) -> std::io::Result<()> {
    let c_path = std::ffi::CString::new(path.as_os_str().as_bytes())
        .map_err(|e| std::io::Error::new(ErrorKind::InvalidInput, e))?;
    let rc = unsafe { libc::mkfifo(c_path.as_ptr(), 0o600) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(365))
}
