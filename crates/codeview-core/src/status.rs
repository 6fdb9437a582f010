//! Session lifecycle states and the status events reported outward.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of the session manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No channel held.
    Disconnected,
    /// Channel being opened.
    Connecting,
    /// Channel open, session creation in flight.
    Creating,
    /// Session created; queries are admitted.
    Ready,
    /// Creation failed and was reported.
    Error,
}

impl SessionState {
    /// Status reported when the manager enters this state.
    #[must_use]
    pub const fn status(self) -> SessionStatus {
        match self {
            Self::Disconnected => SessionStatus::Disconnected,
            Self::Connecting => SessionStatus::Connecting,
            Self::Creating => SessionStatus::Creating,
            Self::Ready => SessionStatus::Ready,
            Self::Error => SessionStatus::Error,
        }
    }
}

/// Status value as seen by the collaborator.
///
/// Server-sent `status_update` values the client does not know are kept
/// verbatim in [`SessionStatus::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SessionStatus {
    Disconnected,
    Connecting,
    Creating,
    Ready,
    Error,
    NoAccess,
    UnsupportedLanguage,
    NoSession,
    Other(String),
}

impl SessionStatus {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Creating => "creating",
            Self::Ready => "ready",
            Self::Error => "error",
            Self::NoAccess => "no_access",
            Self::UnsupportedLanguage => "unsupported_language",
            Self::NoSession => "no_session",
            Self::Other(s) => s,
        }
    }
}

impl From<String> for SessionStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "disconnected" => Self::Disconnected,
            "connecting" => Self::Connecting,
            "creating" => Self::Creating,
            "ready" => Self::Ready,
            "error" => Self::Error,
            "no_access" => Self::NoAccess,
            "unsupported_language" => Self::UnsupportedLanguage,
            "no_session" => Self::NoSession,
            _ => Self::Other(value),
        }
    }
}

impl From<&str> for SessionStatus {
    fn from(value: &str) -> Self {
        Self::from(value.to_owned())
    }
}

impl From<SessionStatus> for String {
    fn from(value: SessionStatus) -> Self {
        match value {
            SessionStatus::Other(s) => s,
            known => known.as_str().to_owned(),
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status event forwarded to the collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
}

impl StatusEvent {
    #[must_use]
    pub const fn new(status: SessionStatus) -> Self {
        Self {
            status,
            progress: None,
        }
    }

    #[must_use]
    pub const fn with_progress(status: SessionStatus, progress: Option<f64>) -> Self {
        Self { status, progress }
    }
}

impl From<SessionState> for StatusEvent {
    fn from(state: SessionState) -> Self {
        Self::new(state.status())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_names() {
        let json = serde_json::to_string(&SessionStatus::UnsupportedLanguage).unwrap();
        assert_eq!(json, "\"unsupported_language\"");

        let parsed: SessionStatus = serde_json::from_str("\"no_access\"").unwrap();
        assert_eq!(parsed, SessionStatus::NoAccess);
    }

    #[test]
    fn test_unknown_status_kept_verbatim() {
        let parsed: SessionStatus = serde_json::from_str("\"indexing\"").unwrap();
        assert_eq!(parsed, SessionStatus::Other("indexing".into()));
        assert_eq!(serde_json::to_string(&parsed).unwrap(), "\"indexing\"");
    }

    #[test]
    fn test_event_omits_missing_progress() {
        let json = serde_json::to_value(StatusEvent::from(SessionState::Ready)).unwrap();
        assert_eq!(json, serde_json::json!({"status": "ready"}));
    }
}
