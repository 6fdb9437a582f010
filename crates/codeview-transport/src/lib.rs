//! Transport layer for codeview sessions.
//!
//! Provides:
//! - Wire protocol (JSON requests, responses and status updates)
//! - `Channel` - request/response correlation over a `Link`
//! - WebSocket connector (feature: websocket)
//! - In-memory connector (feature: memory)

pub mod channel;
pub mod error;
pub mod link;
pub mod pending;
pub mod protocol;

#[cfg(feature = "websocket")]
pub mod websocket;

#[cfg(feature = "memory")]
pub mod memory;

pub use channel::{Channel, ChannelEvent, ChannelOptions};
pub use error::{ChannelError, TransportError};
pub use link::{Connector, Frame, Link, LinkCommand, LinkPeer};
pub use protocol::{RequestBody, RequestId, StatusUpdate, Unsolicited, sessions_url};

#[cfg(feature = "websocket")]
pub use websocket::WebSocketConnector;

#[cfg(feature = "memory")]
pub use memory::{MemoryConnector, MemoryListener, MemoryPeer, PeerHandle, Reply};
