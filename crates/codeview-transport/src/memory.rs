//! In-memory connector.
//!
//! Useful for tests and offline demos: every `connect` hands the far end of
//! the link to a [`MemoryListener`], where it can be driven as a fake server.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::{sync::mpsc, task::JoinHandle};

use crate::{Connector, Frame, Link, LinkCommand, TransportError};

struct State {
    refuse: u32,
    urls: Vec<String>,
    peers: mpsc::UnboundedSender<MemoryPeer>,
}

/// Connector whose links end in this process.
#[derive(Clone)]
pub struct MemoryConnector {
    state: Arc<Mutex<State>>,
}

impl MemoryConnector {
    /// Create a connector and the listener receiving its peers.
    #[must_use]
    pub fn new() -> (Self, MemoryListener) {
        let (peers_tx, peers_rx) = mpsc::unbounded_channel();
        let connector = Self {
            state: Arc::new(Mutex::new(State {
                refuse: 0,
                urls: Vec::new(),
                peers: peers_tx,
            })),
        };
        (connector, MemoryListener { peers: peers_rx })
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Refuse the next `count` connection attempts.
    pub fn refuse_next(&self, count: u32) {
        self.lock().refuse = count;
    }

    /// URLs of every attempt so far, refused ones included.
    #[must_use]
    pub fn urls(&self) -> Vec<String> {
        self.lock().urls.clone()
    }

    /// Number of connection attempts so far.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.lock().urls.len()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, url: &str) -> Result<Link, TransportError> {
        let mut state = self.lock();
        state.urls.push(url.to_owned());

        if state.refuse > 0 {
            state.refuse -= 1;
            return Err(TransportError::Refused(url.to_owned()));
        }

        let (link, peer) = Link::pair();
        let peer = MemoryPeer {
            url: url.to_owned(),
            commands: peer.commands,
            frames: peer.frames,
        };
        state
            .peers
            .send(peer)
            .map_err(|_| TransportError::Refused(url.to_owned()))?;
        Ok(link)
    }
}

/// Receives the server side of every link the connector opens.
pub struct MemoryListener {
    peers: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl MemoryListener {
    /// Wait for the next connection.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.peers.recv().await
    }
}

/// How a served peer answers a request.
#[derive(Debug, Clone)]
pub enum Reply {
    Result(Value),
    Error(Value),
    /// Leave the request unanswered.
    Ignore,
}

/// Server side of an in-memory link.
pub struct MemoryPeer {
    /// URL the client connected to.
    pub url: String,
    commands: mpsc::UnboundedReceiver<LinkCommand>,
    frames: mpsc::UnboundedSender<Frame>,
}

impl MemoryPeer {
    /// Wait for the next request.
    ///
    /// Returns `None` once the client closes the link.
    pub async fn next_request(&mut self) -> Option<Value> {
        loop {
            match self.commands.recv().await? {
                LinkCommand::Send(text) => match serde_json::from_str(&text) {
                    Ok(value) => return Some(value),
                    Err(e) => tracing::warn!("Unparseable request on memory link: {e}"),
                },
                LinkCommand::Close => return None,
            }
        }
    }

    /// Handle for pushing frames without owning the peer.
    #[must_use]
    pub fn handle(&self) -> PeerHandle {
        PeerHandle {
            frames: self.frames.clone(),
        }
    }

    /// Answer requests with `respond` until the client closes the link.
    pub fn serve<F>(mut self, mut respond: F) -> JoinHandle<()>
    where
        F: FnMut(&Value) -> Reply + Send + 'static,
    {
        tokio::spawn(async move {
            while let Some(request) = self.next_request().await {
                let handle = self.handle();
                match respond(&request) {
                    Reply::Result(result) => handle.reply(&request["id"], result),
                    Reply::Error(error) => handle.reply_error(&request["id"], error),
                    Reply::Ignore => {}
                }
            }
        })
    }
}

/// Pushes frames to the client end of a memory link.
#[derive(Clone)]
pub struct PeerHandle {
    frames: mpsc::UnboundedSender<Frame>,
}

impl PeerHandle {
    /// Send a raw JSON message.
    pub fn push(&self, message: &Value) {
        let _ = self.frames.send(Frame::Text(message.to_string()));
    }

    /// Answer request `id` with a result.
    pub fn reply(&self, id: &Value, result: Value) {
        self.push(&json!({"id": id, "result": result}));
    }

    /// Answer request `id` with an error.
    pub fn reply_error(&self, id: &Value, error: Value) {
        self.push(&json!({"id": id, "error": error}));
    }

    /// Push a `status_update`.
    pub fn push_status(&self, status: &str, progress: Option<f64>) {
        let mut message = json!({"status_update": status});
        if let Some(progress) = progress {
            message["progress"] = json!(progress);
        }
        self.push(&message);
    }

    /// Drop the connection as if the server went away.
    pub fn disconnect(&self) {
        let _ = self.frames.send(Frame::Closed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Channel, ChannelOptions, RequestBody, protocol::LocationPayload};

    #[tokio::test]
    async fn test_served_round_trip() {
        let (connector, mut listener) = MemoryConnector::new();
        let (channel, _events) = Channel::open(&connector, "ws://memory/", ChannelOptions::default())
            .await
            .unwrap();

        let peer = listener.accept().await.unwrap();
        assert_eq!(peer.url, "ws://memory/");
        peer.serve(|req| Reply::Result(json!({"echo": req["type"]})));

        let result = channel
            .send(RequestBody::FileContents(LocationPayload {
                is_base_repo: true,
                location_id: "README.md".into(),
            }))
            .await
            .unwrap();
        assert_eq!(result, json!({"echo": "session.file_contents"}));
    }

    #[tokio::test]
    async fn test_refused_attempts_recorded() {
        let (connector, _listener) = MemoryConnector::new();
        connector.refuse_next(1);

        assert!(connector.connect("ws://a/").await.is_err());
        assert!(connector.connect("ws://b/").await.is_ok());
        assert_eq!(connector.urls(), vec!["ws://a/".to_owned(), "ws://b/".to_owned()]);
    }
}
