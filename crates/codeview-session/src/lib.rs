//! Resilient analysis sessions for codeview.
//!
//! [`SessionManager`] owns one session at a time: it opens the channel,
//! creates the session, admits queries once ready, reports status to
//! subscribers and reconnects with jittered backoff after unexpected drops.

pub mod client;
pub mod error;
pub mod manager;
pub mod reconnect;

pub use client::{ProtocolClient, QueryResponse};
pub use error::{Classification, SessionError};
pub use manager::{SessionManager, SessionManagerBuilder};
pub use reconnect::{Jitter, Readiness, ReconnectPolicy};
