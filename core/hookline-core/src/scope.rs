//! Scopes partition all coordination state.
//!
//! A scope is either the process-wide `global` scope or a project, named after
//! the basename of the event's working directory.

use std::fmt;

/// Longest project name kept; callback payloads are length-limited by the
/// provider (64 bytes) and carry the scope after a short prefix.
const MAX_NAME_LEN: usize = 48;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Scope {
    Global,
    Project(String),
}

impl Scope {
    /// Scope for a project name. Unsafe path characters are replaced so the
    /// name can be used as a directory component, and the reserved tokens
    /// `global` and `all` get a `_` prefix.
    pub fn project(name: &str) -> Self {
        let sanitized: String = name
            .trim()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .take(MAX_NAME_LEN)
            .collect();

        let sanitized = sanitized.trim_start_matches('.').to_string();
        match sanitized.as_str() {
            "" => Scope::Global,
            // Would read back as the global scope from CLI tokens and button payloads.
            "global" | "all" => Scope::Project(format!("_{}", sanitized)),
            _ => Scope::Project(sanitized),
        }
    }

    /// Parses a user-supplied scope token (CLI argument or button payload).
    ///
    /// `all` and `global` name the global scope.
    pub fn parse(token: &str) -> Self {
        match token.trim() {
            "" | "all" | "global" => Scope::Global,
            other => Scope::project(other),
        }
    }

    pub fn is_global(&self) -> bool {
        matches!(self, Scope::Global)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Scope::Global => "global",
            Scope::Project(name) => name,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_and_global_tokens_are_global() {
        assert_eq!(Scope::parse("all"), Scope::Global);
        assert_eq!(Scope::parse("global"), Scope::Global);
        assert_eq!(Scope::parse("demo"), Scope::Project("demo".to_string()));
    }

    #[test]
    fn project_names_are_sanitized() {
        assert_eq!(Scope::project("my app/x"), Scope::Project("my_app_x".to_string()));
        assert_eq!(Scope::project("../etc"), Scope::Project("_etc".to_string()));
        assert_eq!(Scope::project("  "), Scope::Global);
    }

    #[test]
    fn reserved_project_names_never_read_back_as_global() {
        for name in ["global", "all"] {
            let project = Scope::project(name);
            assert!(!project.is_global());
            assert_eq!(Scope::parse(project.as_str()), project);
        }
        assert_eq!(Scope::project("all").as_str(), "_all");
    }

    #[test]
    fn long_names_are_truncated() {
        let long = "a".repeat(100);
        assert_eq!(Scope::project(&long).as_str().len(), MAX_NAME_LEN);
    }
}
