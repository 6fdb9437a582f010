//! Session errors and how creation failures are classified for reporting.

use codeview_core::{AuthError, ParamsError, QueryKind, SessionStatus};
use codeview_transport::{ChannelError, TransportError};

const NO_ACCESS_MARKERS: [&str; 3] = [
    "Repository not found",
    "Branch not found",
    "Pull Request not found",
];
const UNSUPPORTED_LANGUAGE_MARKER: &str = "Language not supported";

/// Session error.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The parameters do not describe a session the service can create.
    #[error(transparent)]
    NoSession(#[from] ParamsError),
    /// A query was issued while the session was not ready.
    #[error("Session not ready")]
    NotReady,
    /// A newer `create_new_session` or a teardown replaced this attempt.
    #[error("Session attempt superseded")]
    Superseded,
    #[error("{0:?} queries need a line and column")]
    MissingPosition(QueryKind),
    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),
}

/// How a failed session creation is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    NoAccess,
    UnsupportedLanguage,
    NoSession,
    /// Unclassified; also goes to the crash reporter.
    Error,
}

impl Classification {
    /// Status event value for this classification.
    #[must_use]
    pub const fn status(self) -> SessionStatus {
        match self {
            Self::NoAccess => SessionStatus::NoAccess,
            Self::UnsupportedLanguage => SessionStatus::UnsupportedLanguage,
            Self::NoSession => SessionStatus::NoSession,
            Self::Error => SessionStatus::Error,
        }
    }
}

impl SessionError {
    /// Classify a session-creation failure.
    #[must_use]
    pub fn classify(&self) -> Classification {
        match self {
            Self::NoSession(_) => Classification::NoSession,
            Self::Channel(err) => match err.remote_message() {
                Some(text) if text.contains(UNSUPPORTED_LANGUAGE_MARKER) => {
                    Classification::UnsupportedLanguage
                }
                Some(text) if NO_ACCESS_MARKERS.iter().any(|m| text.contains(m)) => {
                    Classification::NoAccess
                }
                _ => Classification::Error,
            },
            _ => Classification::Error,
        }
    }
}
