//! Wire protocol for the sessions endpoint.
//!
//! Requests carry a correlation id, a `type` and a `payload`:
//! ```json
//! {"id": 1, "type": "session.hover", "payload": {"is_base_repo": "false", "location_id": "src/lib.rs#L10#C4"}}
//! ```
//! Responses echo the id with either `result` or `error`. Server pushes carry
//! no id, e.g. `{"status_update": "indexing", "progress": 0.4}`.

use codeview_core::{GitService, SessionStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Correlation id of a request on one channel.
pub type RequestId = u64;

/// Request sent to the service.
#[derive(Debug, Clone, Serialize)]
pub struct Request {
    pub id: RequestId,
    #[serde(flatten)]
    pub body: RequestBody,
}

/// Typed request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum RequestBody {
    #[serde(rename = "session.create")]
    Create(CreatePayload),
    #[serde(rename = "session.hover")]
    Hover(LocationPayload),
    #[serde(rename = "session.references")]
    References(LocationPayload),
    #[serde(rename = "session.definition")]
    Definition(LocationPayload),
    #[serde(rename = "session.file_contents")]
    FileContents(LocationPayload),
}

impl RequestBody {
    /// Wire `type` of the request.
    #[must_use]
    pub const fn method(&self) -> &'static str {
        match self {
            Self::Create(_) => "session.create",
            Self::Hover(_) => "session.hover",
            Self::References(_) => "session.references",
            Self::Definition(_) => "session.definition",
            Self::FileContents(_) => "session.file_contents",
        }
    }
}

/// Payload of `session.create`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePayload {
    pub organisation: String,
    pub name: String,
    pub service: GitService,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_request_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head_sha: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_sha: Option<String>,
}

/// Payload of the location-based queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationPayload {
    /// Which side of the diff; the service expects `"true"`/`"false"`.
    #[serde(with = "bool_string")]
    pub is_base_repo: bool,
    /// `{path}#L{line}#C{column}`, or just the path for file contents.
    pub location_id: String,
}

/// Response to a request.
#[derive(Debug, Clone, Deserialize)]
pub struct Response {
    pub id: RequestId,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
}

impl Response {
    /// Split into the result or the remote error.
    ///
    /// # Errors
    /// Returns the `error` field if the remote set one.
    pub fn into_result(self) -> Result<Value, Value> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// Out-of-band status push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub status_update: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
}

/// Message that does not answer a request.
#[derive(Debug, Clone, PartialEq)]
pub enum Unsolicited {
    Status(StatusUpdate),
    Other(Value),
}

/// Anything the server may send.
///
/// Messages with an `id` are responses; the rest are unsolicited.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Incoming {
    Response(Response),
    Status(StatusUpdate),
    Other(Value),
}

impl Incoming {
    /// Parse a text frame.
    ///
    /// # Errors
    /// Returns error if the frame is not JSON.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// URL of the sessions endpoint for `base_url`, authenticated by `token`.
///
/// `http(s)://host/` becomes `ws(s)://host/sessions/?token=...`.
#[must_use]
pub fn sessions_url(base_url: &str, token: &str) -> String {
    let base = base_url
        .strip_prefix("http")
        .map_or_else(|| base_url.to_owned(), |rest| format!("ws{rest}"));
    let sep = if base.ends_with('/') { "" } else { "/" };
    format!("{base}{sep}sessions/?token={}", urlencoding::encode(token))
}

/// URL with its query string removed, for logging.
#[must_use]
pub fn redact_url(url: &str) -> &str {
    url.split_once('?').map_or(url, |(path, _)| path)
}

mod bool_string {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    #[allow(clippy::trivially_copy_pass_by_ref)]
    pub fn serialize<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(if *value { "true" } else { "false" })
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        match String::deserialize(deserializer)?.as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(D::Error::custom(format!("expected \"true\" or \"false\", got {other:?}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_request_shape() {
        let request = Request {
            id: 3,
            body: RequestBody::Hover(LocationPayload {
                is_base_repo: true,
                location_id: "src/lib.rs#L10#C4".into(),
            }),
        };

        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "id": 3,
                "type": "session.hover",
                "payload": {"is_base_repo": "true", "location_id": "src/lib.rs#L10#C4"}
            })
        );
    }

    #[test]
    fn test_create_payload_omits_unset_fields() {
        let body = RequestBody::Create(CreatePayload {
            organisation: "acme".into(),
            name: "widgets".into(),
            service: GitService::Github,
            pull_request_id: Some(42),
            head_sha: None,
            base_sha: None,
        });

        assert_eq!(
            serde_json::to_value(&body).unwrap()["payload"],
            json!({"organisation": "acme", "name": "widgets", "service": "github", "pull_request_id": 42})
        );
        assert_eq!(body.method(), "session.create");
    }

    #[test]
    fn test_incoming_classification() {
        assert!(matches!(
            Incoming::parse(r#"{"id": 1, "result": {"ok": true}}"#).unwrap(),
            Incoming::Response(Response { id: 1, .. })
        ));

        match Incoming::parse(r#"{"status_update": "indexing", "progress": 0.25}"#).unwrap() {
            Incoming::Status(update) => {
                assert_eq!(update.status_update, SessionStatus::Other("indexing".into()));
                assert_eq!(update.progress, Some(0.25));
            }
            other => panic!("Expected status update, got {other:?}"),
        }

        assert!(matches!(
            Incoming::parse(r#"{"announcement": "maintenance"}"#).unwrap(),
            Incoming::Other(_)
        ));
    }

    #[test]
    fn test_response_into_result() {
        let ok: Response = serde_json::from_str(r#"{"id": 1, "result": {"ok": true}}"#).unwrap();
        assert_eq!(ok.into_result().unwrap(), json!({"ok": true}));

        let err: Response = serde_json::from_str(r#"{"id": 1, "error": "Branch not found"}"#).unwrap();
        assert_eq!(err.into_result().unwrap_err(), json!("Branch not found"));

        let empty: Response = serde_json::from_str(r#"{"id": 1}"#).unwrap();
        assert_eq!(empty.into_result().unwrap(), Value::Null);
    }

    #[test]
    fn test_sessions_url() {
        assert_eq!(
            sessions_url("https://www.codeview.io/", "abc.def"),
            "wss://www.codeview.io/sessions/?token=abc.def"
        );
        assert_eq!(
            sessions_url("http://localhost:8000", "a b"),
            "ws://localhost:8000/sessions/?token=a%20b"
        );
        assert_eq!(redact_url("wss://x/sessions/?token=secret"), "wss://x/sessions/");
    }
}
