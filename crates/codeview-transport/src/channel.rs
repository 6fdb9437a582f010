//! Request/response correlation over a link.
//!
//! A `Channel` owns one link for its whole lifetime:
//! 1. `send()` allocates an id, registers a completion slot and writes the request
//! 2. The reader task parses every frame
//! 3. Responses complete the slot carrying their id, in whatever order they arrive
//! 4. Everything else is forwarded on the event receiver handed out by `open()`
//! 5. On closure all outstanding requests fail and a single `Closed` event is sent

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use serde_json::Value;
use tokio::{
    sync::{Mutex, Notify, mpsc},
    task::JoinHandle,
};
use uuid::Uuid;

use crate::{
    ChannelError, Connector, Frame, LinkCommand, RequestBody, RequestId, TransportError,
    pending::PendingRequests,
    protocol::{Incoming, Request, Unsolicited, redact_url},
};

/// Event delivered to the owner of a channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// A message that answers no request.
    Message(Unsolicited),
    /// The channel closed. `clean` is true iff `close()` was called first.
    Closed { clean: bool },
}

/// Channel options.
#[derive(Debug, Clone, Default)]
pub struct ChannelOptions {
    /// Fail a request that got no response within this long.
    pub request_timeout: Option<Duration>,
}

struct Shared {
    id: Uuid,
    pending: PendingRequests,
    events: mpsc::UnboundedSender<ChannelEvent>,
    close_requested: AtomicBool,
    finished: AtomicBool,
    shutdown: Notify,
}

impl Shared {
    fn dispatch(&self, text: &str) {
        let incoming = match Incoming::parse(text) {
            Ok(incoming) => incoming,
            Err(e) => {
                tracing::warn!(channel = %self.id, "Failed to parse message: {e}");
                return;
            }
        };

        match incoming {
            Incoming::Response(response) => {
                let id = response.id;
                let result = response.into_result().map_err(ChannelError::Remote);
                if !self.pending.complete(id, result) {
                    tracing::warn!(channel = %self.id, id, "Cannot find request to respond");
                }
            }
            Incoming::Status(update) => {
                let _ = self.events.send(ChannelEvent::Message(Unsolicited::Status(update)));
            }
            Incoming::Other(value) => {
                let _ = self.events.send(ChannelEvent::Message(Unsolicited::Other(value)));
            }
        }
    }

    /// Runs once per channel, whoever gets here first.
    fn finish(&self) {
        if self.finished.swap(true, Ordering::SeqCst) {
            return;
        }
        let failed = self.pending.fail_all();
        let clean = self.close_requested.load(Ordering::SeqCst);
        tracing::debug!(channel = %self.id, clean, failed, "channel closed");
        let _ = self.events.send(ChannelEvent::Closed { clean });
    }
}

/// Correlated message channel.
///
/// Shareable across tasks behind an `Arc`; any number of requests may be in
/// flight at once.
pub struct Channel {
    shared: Arc<Shared>,
    last_id: AtomicU64,
    commands: mpsc::UnboundedSender<LinkCommand>,
    reader: Mutex<Option<JoinHandle<()>>>,
    options: ChannelOptions,
}

impl Channel {
    /// Open a channel to `url` through `connector`.
    ///
    /// Returns the channel and the receiver for its unsolicited messages and
    /// its single closure notification.
    ///
    /// # Errors
    /// Returns error if the connector cannot establish a link.
    pub async fn open<C>(
        connector: &C,
        url: &str,
        options: ChannelOptions,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ChannelEvent>), TransportError>
    where
        C: Connector + ?Sized,
    {
        let link = connector.connect(url).await?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();

        let shared = Arc::new(Shared {
            id,
            pending: PendingRequests::new(),
            events: events_tx,
            close_requested: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            shutdown: Notify::new(),
        });

        let reader = tokio::spawn(read_loop(Arc::clone(&shared), link.frames));
        tracing::debug!(channel = %id, url = redact_url(url), "channel opened");

        let channel = Self {
            shared,
            last_id: AtomicU64::new(0),
            commands: link.commands,
            reader: Mutex::new(Some(reader)),
            options,
        };
        Ok((channel, events_rx))
    }

    /// Channel identifier, for logs.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    /// Whether the channel can still carry requests.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.shared.finished.load(Ordering::SeqCst)
            && !self.shared.close_requested.load(Ordering::SeqCst)
    }

    /// Number of requests awaiting a response.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.shared.pending.len()
    }

    /// Send a request and await its result.
    ///
    /// # Errors
    /// Returns [`ChannelError::Remote`] if the remote answered with an error,
    /// [`ChannelError::ChannelClosed`] if the channel closed first, and
    /// [`ChannelError::Timeout`] if the configured timeout elapsed.
    pub async fn send(&self, body: RequestBody) -> Result<Value, ChannelError> {
        let id = self.last_id.fetch_add(1, Ordering::SeqCst) + 1;
        let method = body.method();
        let rx = self.shared.pending.register(id)?;
        let _slot = SlotGuard {
            pending: &self.shared.pending,
            id,
        };

        let text = serde_json::to_string(&Request { id, body })?;
        tracing::debug!(channel = %self.shared.id, id, method, "sending request");
        self.commands
            .send(LinkCommand::Send(text))
            .map_err(|_| ChannelError::ChannelClosed)?;

        let outcome = match self.options.request_timeout {
            Some(limit) => tokio::time::timeout(limit, rx)
                .await
                .map_err(|_| ChannelError::Timeout(limit))?,
            None => rx.await,
        };

        outcome.map_err(|_| ChannelError::ChannelClosed)?
    }

    /// Close the channel.
    ///
    /// Idempotent; outstanding requests fail with `ChannelClosed`.
    pub async fn close(&self) {
        if !self.shared.close_requested.swap(true, Ordering::SeqCst) {
            let _ = self.commands.send(LinkCommand::Close);
            self.shared.shutdown.notify_one();
        }

        let reader = self.reader.lock().await.take();
        if let Some(handle) = reader {
            if let Err(e) = handle.await {
                tracing::warn!(channel = %self.shared.id, "Reader task failed: {e}");
            }
        }
        self.shared.finish();
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        if !self.shared.close_requested.swap(true, Ordering::SeqCst) {
            let _ = self.commands.send(LinkCommand::Close);
            self.shared.shutdown.notify_one();
        }
    }
}

/// Releases a request's slot however `send` exits.
struct SlotGuard<'a> {
    pending: &'a PendingRequests,
    id: RequestId,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.pending.cancel(self.id);
    }
}

async fn read_loop(shared: Arc<Shared>, mut frames: mpsc::UnboundedReceiver<Frame>) {
    loop {
        tokio::select! {
            biased;
            () = shared.shutdown.notified() => break,
            frame = frames.recv() => match frame {
                Some(Frame::Text(text)) => shared.dispatch(&text),
                Some(Frame::Closed) | None => break,
            },
        }
    }
    shared.finish();
}
