//! Session protocol client: builds and sends the session requests.

use codeview_core::{FileContents, QueryKind, SessionParameters, Side};
use codeview_transport::{
    Channel, ChannelError, RequestBody,
    protocol::{CreatePayload, LocationPayload},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Result of a query, typed by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "response", rename_all = "snake_case")]
pub enum QueryResponse {
    Hover(Value),
    Definition(Value),
    References(Value),
    FileContents(FileContents),
}

/// Build the `session.create` request for `params`.
#[must_use]
pub fn create_request(params: &SessionParameters) -> RequestBody {
    let repo = params.repo();
    let mut payload = CreatePayload {
        organisation: repo.organisation.clone(),
        name: repo.name.clone(),
        service: repo.service,
        pull_request_id: None,
        head_sha: None,
        base_sha: None,
    };

    match params {
        SessionParameters::Pull {
            pull_request_id, ..
        } => payload.pull_request_id = Some(*pull_request_id),
        SessionParameters::Compare {
            head_sha, base_sha, ..
        } => {
            payload.head_sha = Some(head_sha.clone());
            payload.base_sha = Some(base_sha.clone());
        }
        SessionParameters::Commit { sha, .. } => {
            payload.head_sha = Some(sha.clone());
            payload.base_sha = Some(sha.clone());
        }
        SessionParameters::File { sha, .. } => {
            payload.head_sha.clone_from(sha);
            payload.base_sha.clone_from(sha);
        }
    }

    RequestBody::Create(payload)
}

/// `{file_path}#L{line}#C{column}`.
#[must_use]
pub fn location_id(file_path: &str, line: u32, column: u32) -> String {
    format!("{file_path}#L{line}#C{column}")
}

/// Build a position query. `kind` must not be [`QueryKind::FileContents`].
#[must_use]
pub fn position_request(kind: QueryKind, side: Side, file_path: &str, line: u32, column: u32) -> RequestBody {
    let payload = LocationPayload {
        is_base_repo: side.is_base(),
        location_id: location_id(file_path, line, column),
    };
    match kind {
        QueryKind::Hover => RequestBody::Hover(payload),
        QueryKind::Definition => RequestBody::Definition(payload),
        QueryKind::References => RequestBody::References(payload),
        QueryKind::FileContents => file_contents_request(side, file_path),
    }
}

/// Build a file contents query.
#[must_use]
pub fn file_contents_request(side: Side, file_path: &str) -> RequestBody {
    RequestBody::FileContents(LocationPayload {
        is_base_repo: side.is_base(),
        location_id: file_path.to_owned(),
    })
}

/// Typed session operations over one channel.
pub struct ProtocolClient<'a> {
    channel: &'a Channel,
}

impl<'a> ProtocolClient<'a> {
    #[must_use]
    pub const fn new(channel: &'a Channel) -> Self {
        Self { channel }
    }

    /// Create the session; resolves with the response `result`.
    ///
    /// # Errors
    /// Returns the channel error, including the remote's `error` field.
    pub async fn create_session(&self, params: &SessionParameters) -> Result<Value, ChannelError> {
        self.channel.send(create_request(params)).await
    }

    /// Hover information at a position.
    ///
    /// # Errors
    /// Returns the channel error.
    pub async fn hover(&self, side: Side, file_path: &str, line: u32, column: u32) -> Result<Value, ChannelError> {
        self.channel
            .send(position_request(QueryKind::Hover, side, file_path, line, column))
            .await
    }

    /// Definition of the symbol at a position.
    ///
    /// # Errors
    /// Returns the channel error.
    pub async fn definition(
        &self,
        side: Side,
        file_path: &str,
        line: u32,
        column: u32,
    ) -> Result<Value, ChannelError> {
        self.channel
            .send(position_request(QueryKind::Definition, side, file_path, line, column))
            .await
    }

    /// References to the symbol at a position.
    ///
    /// # Errors
    /// Returns the channel error.
    pub async fn references(
        &self,
        side: Side,
        file_path: &str,
        line: u32,
        column: u32,
    ) -> Result<Value, ChannelError> {
        self.channel
            .send(position_request(QueryKind::References, side, file_path, line, column))
            .await
    }

    /// Contents of a file, annotated with the path and side asked for.
    ///
    /// # Errors
    /// Returns the channel error.
    pub async fn file_contents(&self, side: Side, file_path: &str) -> Result<FileContents, ChannelError> {
        let contents = self.channel.send(file_contents_request(side, file_path)).await?;
        Ok(FileContents {
            file_path: file_path.to_owned(),
            side,
            contents,
        })
    }
}

#[cfg(test)]
mod tests {
    use codeview_core::{GitService, RepoRef};
    use serde_json::json;

    use super::*;

    fn repo() -> RepoRef {
        RepoRef::new("acme", "widgets", GitService::Github)
    }

    fn payload(body: &RequestBody) -> Value {
        serde_json::to_value(body).unwrap()["payload"].clone()
    }

    #[test]
    fn test_pull_payload() {
        let body = create_request(&SessionParameters::Pull {
            repo: repo(),
            pull_request_id: 42,
        });
        assert_eq!(
            payload(&body),
            json!({"organisation": "acme", "name": "widgets", "service": "github", "pull_request_id": 42})
        );
    }

    #[test]
    fn test_compare_payload() {
        let body = create_request(&SessionParameters::Compare {
            repo: repo(),
            head_sha: "h".into(),
            base_sha: "b".into(),
        });
        assert_eq!(
            payload(&body),
            json!({"organisation": "acme", "name": "widgets", "service": "github", "head_sha": "h", "base_sha": "b"})
        );
    }

    #[test]
    fn test_commit_is_zero_width_compare() {
        let body = create_request(&SessionParameters::Commit {
            repo: repo(),
            sha: "c0ffee".into(),
        });
        let p = payload(&body);
        assert_eq!(p["head_sha"], "c0ffee");
        assert_eq!(p["base_sha"], "c0ffee");
        assert!(p.get("pull_request_id").is_none());
    }

    #[test]
    fn test_file_without_sha() {
        let body = create_request(&SessionParameters::File { repo: repo(), sha: None });
        assert_eq!(
            payload(&body),
            json!({"organisation": "acme", "name": "widgets", "service": "github"})
        );
    }

    #[test]
    fn test_position_requests() {
        let body = position_request(QueryKind::References, Side::Head, "src/app.py", 12, 7);
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({
                "type": "session.references",
                "payload": {"is_base_repo": "false", "location_id": "src/app.py#L12#C7"}
            })
        );

        let body = position_request(QueryKind::Hover, Side::Base, "a.rs", 1, 2);
        assert_eq!(body.method(), "session.hover");
        assert_eq!(payload(&body)["is_base_repo"], "true");
    }

    #[test]
    fn test_file_contents_request() {
        let body = file_contents_request(Side::Base, "docs/README.md");
        assert_eq!(
            payload(&body),
            json!({"is_base_repo": "true", "location_id": "docs/README.md"})
        );
    }
}
