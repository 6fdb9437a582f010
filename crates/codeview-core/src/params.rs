//! Parameters describing which review target a session analyses.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Session kinds the service knows how to create.
pub const SESSION_KINDS: [&str; 4] = ["pull", "file", "commit", "compare"];

/// Code host the repository lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GitService {
    Github,
    Bitbucket,
}

impl GitService {
    /// Wire name of the service.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Github => "github",
            Self::Bitbucket => "bitbucket",
        }
    }
}

impl fmt::Display for GitService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Repository a session is keyed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoRef {
    /// Owning organisation or user.
    pub organisation: String,
    /// Repository name.
    pub name: String,
    /// Code host.
    pub service: GitService,
}

impl RepoRef {
    #[must_use]
    pub fn new(organisation: impl Into<String>, name: impl Into<String>, service: GitService) -> Self {
        Self {
            organisation: organisation.into(),
            name: name.into(),
            service,
        }
    }
}

/// Review target of an analysis session.
///
/// Replaced wholesale on every new session; never mutated in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionParameters {
    /// A pull request.
    Pull {
        #[serde(flatten)]
        repo: RepoRef,
        pull_request_id: u64,
    },
    /// A compare range between two revisions.
    Compare {
        #[serde(flatten)]
        repo: RepoRef,
        head_sha: String,
        base_sha: String,
    },
    /// A single commit, analysed as a zero-width compare.
    Commit {
        #[serde(flatten)]
        repo: RepoRef,
        sha: String,
    },
    /// A file view, optionally pinned to a revision.
    File {
        #[serde(flatten)]
        repo: RepoRef,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sha: Option<String>,
    },
}

/// Error turning loosely-typed input into [`SessionParameters`].
#[derive(Debug, Error)]
pub enum ParamsError {
    #[error("No session to be created for kind {0:?}")]
    UnknownKind(Option<String>),
    #[error("Invalid {kind} session parameters: {source}")]
    Invalid {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

impl SessionParameters {
    /// Parse parameters handed over by a collaborator as JSON.
    ///
    /// # Errors
    /// Returns [`ParamsError::UnknownKind`] if `type` is missing or outside
    /// `pull`, `file`, `commit`, `compare`, and [`ParamsError::Invalid`] if
    /// the fields do not match the kind.
    pub fn from_value(value: Value) -> Result<Self, ParamsError> {
        let kind = value.get("type").and_then(Value::as_str).map(str::to_owned);
        match kind {
            Some(kind) if SESSION_KINDS.contains(&kind.as_str()) => {
                serde_json::from_value(value).map_err(|source| ParamsError::Invalid { kind, source })
            }
            other => Err(ParamsError::UnknownKind(other)),
        }
    }

    /// Repository the session targets.
    #[must_use]
    pub const fn repo(&self) -> &RepoRef {
        match self {
            Self::Pull { repo, .. }
            | Self::Compare { repo, .. }
            | Self::Commit { repo, .. }
            | Self::File { repo, .. } => repo,
        }
    }

    /// Wire name of the session kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Pull { .. } => "pull",
            Self::Compare { .. } => "compare",
            Self::Commit { .. } => "commit",
            Self::File { .. } => "file",
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_parse_pull() {
        let params = SessionParameters::from_value(json!({
            "type": "pull",
            "organisation": "acme",
            "name": "widgets",
            "service": "github",
            "pull_request_id": 42
        }))
        .unwrap();

        assert_eq!(
            params,
            SessionParameters::Pull {
                repo: RepoRef::new("acme", "widgets", GitService::Github),
                pull_request_id: 42,
            }
        );
        assert_eq!(params.kind(), "pull");
    }

    #[test]
    fn test_parse_file_without_sha() {
        let params = SessionParameters::from_value(json!({
            "type": "file",
            "organisation": "acme",
            "name": "widgets",
            "service": "bitbucket"
        }))
        .unwrap();

        assert!(matches!(params, SessionParameters::File { sha: None, .. }));
        assert_eq!(params.repo().service, GitService::Bitbucket);
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let err = SessionParameters::from_value(json!({
            "type": "tree",
            "organisation": "acme",
            "name": "widgets",
            "service": "github"
        }))
        .unwrap_err();
        assert!(matches!(err, ParamsError::UnknownKind(Some(ref k)) if k == "tree"));

        let err = SessionParameters::from_value(json!({"organisation": "acme"})).unwrap_err();
        assert!(matches!(err, ParamsError::UnknownKind(None)));
    }

    #[test]
    fn test_known_kind_with_bad_fields() {
        let err = SessionParameters::from_value(json!({
            "type": "compare",
            "organisation": "acme",
            "name": "widgets",
            "service": "github",
            "head_sha": "abc"
        }))
        .unwrap_err();
        assert!(matches!(err, ParamsError::Invalid { ref kind, .. } if kind == "compare"));
    }
}
