//! Traits for the collaborators a session manager depends on.

use std::error::Error as StdError;

use async_trait::async_trait;
use thiserror::Error;

/// Auth error.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("No token available")]
    MissingToken,
    #[error("Auth provider error: {0}")]
    Internal(String),
}

/// Source of the token and service root used when connecting.
///
/// Queried on every connect, so a refreshed token is picked up by the next
/// reconnection.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Current session token.
    async fn token(&self) -> Result<String, AuthError>;

    /// Service root, e.g. `https://www.codeview.io/`.
    fn base_url(&self) -> String;
}

/// Fixed token and base URL.
#[derive(Debug, Clone)]
pub struct StaticAuth {
    base_url: String,
    token: Option<String>,
}

impl StaticAuth {
    #[must_use]
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token,
        }
    }
}

#[async_trait]
impl AuthProvider for StaticAuth {
    async fn token(&self) -> Result<String, AuthError> {
        self.token.clone().ok_or(AuthError::MissingToken)
    }

    fn base_url(&self) -> String {
        self.base_url.clone()
    }
}

/// Sink for failures nobody classified.
pub trait CrashReporter: Send + Sync {
    /// Report an unclassified failure.
    fn report(&self, context: &str, error: &(dyn StdError + Send + Sync));
}

/// Crash reporter that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingCrashReporter;

impl CrashReporter for TracingCrashReporter {
    fn report(&self, context: &str, error: &(dyn StdError + Send + Sync)) {
        tracing::error!(context, error = %error, "unclassified session failure");
    }
}
