//! Raw bidirectional text link and the connector seam that produces it.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::TransportError;

/// Frame delivered by a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    /// The remote end went away. Sent at most once, last.
    Closed,
}

/// Command sent to a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkCommand {
    Send(String),
    Close,
}

/// Channel-facing half of a link.
#[derive(Debug)]
pub struct Link {
    pub commands: mpsc::UnboundedSender<LinkCommand>,
    pub frames: mpsc::UnboundedReceiver<Frame>,
}

/// Transport-facing half of a link.
#[derive(Debug)]
pub struct LinkPeer {
    pub commands: mpsc::UnboundedReceiver<LinkCommand>,
    pub frames: mpsc::UnboundedSender<Frame>,
}

impl Link {
    /// Create a connected link pair.
    #[must_use]
    pub fn pair() -> (Self, LinkPeer) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();

        let link = Self {
            commands: commands_tx,
            frames: frames_rx,
        };
        let peer = LinkPeer {
            commands: commands_rx,
            frames: frames_tx,
        };

        (link, peer)
    }
}

/// Trait for transports that can open a link to a URL.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a link.
    async fn connect(&self, url: &str) -> Result<Link, TransportError>;
}

#[async_trait]
impl<C: Connector + ?Sized> Connector for Arc<C> {
    async fn connect(&self, url: &str) -> Result<Link, TransportError> {
        (**self).connect(url).await
    }
}
