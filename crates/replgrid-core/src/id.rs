//! Workspace identifiers.
//!
//! A `WorkspaceId` names the compute resources, the storage prefix and the
//! session route of one workspace, so it must be a valid DNS label. Because
//! the validated alphabet is `[a-z0-9-]`, an id can be substituted into a
//! manifest template without escaping.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum length of a DNS label.
pub const MAX_LEN: usize = 63;

const FORK_INFIX: &str = "-fork-";
const FORK_SUFFIX_LEN: usize = 5;

/// Rejection reason for a candidate workspace id.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidWorkspaceId {
    #[error("workspace id is empty")]
    Empty,

    #[error("workspace id is longer than {MAX_LEN} characters")]
    TooLong,

    #[error("workspace id contains invalid character {0:?}")]
    InvalidChar(char),

    #[error("workspace id must start and end with a letter or digit")]
    BadBoundary,
}

/// Validated, DNS-safe workspace identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WorkspaceId(String);

impl WorkspaceId {
    /// Validate and normalize (lowercase) a candidate id.
    pub fn parse(raw: &str) -> Result<Self, InvalidWorkspaceId> {
        let id = raw.trim().to_ascii_lowercase();
        if id.is_empty() {
            return Err(InvalidWorkspaceId::Empty);
        }
        if id.len() > MAX_LEN {
            return Err(InvalidWorkspaceId::TooLong);
        }
        if let Some(c) = id
            .chars()
            .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-'))
        {
            return Err(InvalidWorkspaceId::InvalidChar(c));
        }
        if id.starts_with('-') || id.ends_with('-') {
            return Err(InvalidWorkspaceId::BadBoundary);
        }
        Ok(Self(id))
    }

    /// Derive a fresh id for a fork of `source`: `{source}-fork-{suffix}`.
    ///
    /// The source part is truncated so the result is still a valid label.
    pub fn fork_of(source: &WorkspaceId) -> Self {
        let suffix: String = uuid::Uuid::new_v4()
            .simple()
            .to_string()
            .chars()
            .take(FORK_SUFFIX_LEN)
            .collect();
        let budget = MAX_LEN - FORK_INFIX.len() - FORK_SUFFIX_LEN;
        let base = source.0[..source.0.len().min(budget)].trim_end_matches('-');
        Self(format!("{base}{FORK_INFIX}{suffix}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkspaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for WorkspaceId {
    type Err = InvalidWorkspaceId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for WorkspaceId {
    type Error = InvalidWorkspaceId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<WorkspaceId> for String {
    fn from(id: WorkspaceId) -> Self {
        id.0
    }
}

impl AsRef<str> for WorkspaceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_dns_label() {
        let id = WorkspaceId::parse("abc-def-ghi").unwrap();
        assert_eq!(id.as_str(), "abc-def-ghi");
    }

    #[test]
    fn lowercases_input() {
        let id = WorkspaceId::parse("My-Repl").unwrap();
        assert_eq!(id.as_str(), "my-repl");
    }

    #[test]
    fn rejects_empty() {
        assert_eq!(WorkspaceId::parse("  "), Err(InvalidWorkspaceId::Empty));
    }

    #[test]
    fn rejects_yaml_metacharacters() {
        assert_eq!(
            WorkspaceId::parse("abc\nkind: Secret"),
            Err(InvalidWorkspaceId::InvalidChar('\n'))
        );
        assert_eq!(
            WorkspaceId::parse("a:b"),
            Err(InvalidWorkspaceId::InvalidChar(':'))
        );
    }

    #[test]
    fn rejects_dots_and_slashes() {
        assert!(WorkspaceId::parse("abc.example").is_err());
        assert!(WorkspaceId::parse("../abc").is_err());
    }

    #[test]
    fn rejects_hyphen_boundaries() {
        assert_eq!(WorkspaceId::parse("-abc"), Err(InvalidWorkspaceId::BadBoundary));
        assert_eq!(WorkspaceId::parse("abc-"), Err(InvalidWorkspaceId::BadBoundary));
    }

    #[test]
    fn rejects_long_ids() {
        let raw = "a".repeat(MAX_LEN + 1);
        assert_eq!(WorkspaceId::parse(&raw), Err(InvalidWorkspaceId::TooLong));
    }

    #[test]
    fn fork_id_is_valid_and_prefixed() {
        let source = WorkspaceId::parse("abc-def-ghi").unwrap();
        let fork = WorkspaceId::fork_of(&source);
        assert!(fork.as_str().starts_with("abc-def-ghi-fork-"));
        assert!(WorkspaceId::parse(fork.as_str()).is_ok());
    }

    #[test]
    fn fork_of_long_id_stays_within_label() {
        let source = WorkspaceId::parse(&"x".repeat(MAX_LEN)).unwrap();
        let fork = WorkspaceId::fork_of(&source);
        assert!(fork.as_str().len() <= MAX_LEN);
        assert!(WorkspaceId::parse(fork.as_str()).is_ok());
    }

    #[test]
    fn serde_validates() {
        let ok: WorkspaceId = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(ok.as_str(), "abc");
        assert!(serde_json::from_str::<WorkspaceId>("\"a b\"").is_err());
    }
}
