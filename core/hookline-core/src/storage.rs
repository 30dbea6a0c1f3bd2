//! Storage configuration and path management for hookline.
//!
//! `StorageConfig` is the single source of truth for where hookline keeps its
//! files. Production code resolves it from `HOOKLINE_HOME` or `~/.hookline`;
//! tests use `StorageConfig::with_root(temp_dir)` for isolation.
//!
//! ```text
//! ~/.hookline/
//! ├── config.json
//! ├── daemon.pid
//! ├── audit.jsonl
//! ├── logs/
//! ├── daemon/daemon-backoff.json
//! ├── approvals/approval_<id>        (named pipes)
//! └── state/
//!     ├── global/
//!     ├── approvals/<id>.json
//!     └── projects/<scope>/
//! ```

use std::path::{Path, PathBuf};

use crate::error::StoreError;
use crate::scope::Scope;

pub const HOME_ENV: &str = "HOOKLINE_HOME";

#[derive(Debug, Clone)]
pub struct StorageConfig {
    root: PathBuf,
}

impl StorageConfig {
    /// Resolves the root from `HOOKLINE_HOME`, falling back to `~/.hookline`.
    pub fn resolve() -> Result<Self, StoreError> {
        if let Some(root) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
            return Ok(Self::with_root(PathBuf::from(root)));
        }
        let home = dirs::home_dir().ok_or(StoreError::NoHome)?;
        Ok(Self::with_root(home.join(".hookline")))
    }

    /// Creates a StorageConfig with a custom root directory.
    pub fn with_root(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Top-level files
    // ─────────────────────────────────────────────────────────────────────────────

    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.json")
    }

    pub fn daemon_pid_file(&self) -> PathBuf {
        self.root.join("daemon.pid")
    }

    /// Append-only approval decision log.
    pub fn audit_file(&self) -> PathBuf {
        self.root.join("audit.jsonl")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn daemon_dir(&self) -> PathBuf {
        self.root.join("daemon")
    }

    /// Named pipes used to wake waiting approval requesters.
    pub fn pipes_dir(&self) -> PathBuf {
        self.root.join("approvals")
    }

    pub fn approval_pipe(&self, request_id: &str) -> PathBuf {
        self.pipes_dir().join(format!("approval_{}", request_id))
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // State tree
    // ─────────────────────────────────────────────────────────────────────────────

    pub fn state_dir(&self) -> PathBuf {
        self.root.join("state")
    }

    pub fn projects_dir(&self) -> PathBuf {
        self.state_dir().join("projects")
    }

    pub fn approvals_state_dir(&self) -> PathBuf {
        self.state_dir().join("approvals")
    }

    /// Directory holding every record of a scope.
    pub fn scope_dir(&self, scope: &Scope) -> PathBuf {
        match scope {
            Scope::Global => self.state_dir().join("global"),
            Scope::Project(name) => self.projects_dir().join(name),
        }
    }

    /// Relay inbox log for a scope.
    pub fn inbox_file(&self, scope: &Scope) -> PathBuf {
        self.scope_dir(scope).join("inbox.jsonl")
    }

    /// Every project scope that has a state directory.
    ///
    /// Missing or unreadable directories yield an empty list.
    pub fn project_scopes(&self) -> Vec<Scope> {
        let mut scopes: Vec<Scope> = walkdir::WalkDir::new(self.projects_dir())
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_dir())
            .filter_map(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .map(|name| Scope::Project(name.to_string()))
            })
            .collect();
        scopes.sort();
        scopes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn scope_dirs_are_partitioned() {
        let config = StorageConfig::with_root(PathBuf::from("/tmp/hl"));
        assert_eq!(
            config.scope_dir(&Scope::Global),
            PathBuf::from("/tmp/hl/state/global")
        );
        assert_eq!(
            config.scope_dir(&Scope::project("demo")),
            PathBuf::from("/tmp/hl/state/projects/demo")
        );
        assert_eq!(
            config.approval_pipe("abc"),
            PathBuf::from("/tmp/hl/approvals/approval_abc")
        );
    }

    #[test]
    fn project_scopes_lists_directories_only() {
        let temp = tempdir().unwrap();
        let config = StorageConfig::with_root(temp.path().to_path_buf());
        assert!(config.project_scopes().is_empty());

        fs_err::create_dir_all(config.projects_dir().join("beta")).unwrap();
        fs_err::create_dir_all(config.projects_dir().join("alpha")).unwrap();
        fs_err::write(config.projects_dir().join("stray.json"), "{}").unwrap();

        assert_eq!(
            config.project_scopes(),
            vec![Scope::project("alpha"), Scope::project("beta")]
        );
    }
}
