//! Core abstractions for codeview analysis sessions.
//!
//! This crate provides the fundamental building blocks:
//! - `SessionParameters` - What a session is created for
//! - `SessionStatus` / `StatusEvent` - Outbound status reporting
//! - `EventStore` - Broadcast + history for late subscribers
//! - `ClientConfig` - Tunables for reconnection and requests
//! - Auth and crash-reporting traits

pub mod config;
pub mod events;
pub mod params;
pub mod query;
pub mod status;
pub mod traits;

pub use config::{ClientConfig, ConfigError};
pub use events::{EventStore, SessionEvent};
pub use params::{GitService, ParamsError, RepoRef, SessionParameters};
pub use query::{FileContents, QueryKind, Side};
pub use status::{SessionState, SessionStatus, StatusEvent};
pub use traits::{AuthError, AuthProvider, CrashReporter, StaticAuth, TracingCrashReporter};
