//! Broadcast + history store for session events.

use std::{
    collections::VecDeque,
    sync::{PoisonError, RwLock},
};

use futures::{StreamExt, stream::BoxStream};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::StatusEvent;

const CHANNEL_CAPACITY: usize = 1024;

/// Event emitted by a session manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Lifecycle transition, classification or forwarded `status_update`.
    Status(StatusEvent),
    /// Unsolicited server message passed through untouched.
    Message(Value),
}

/// Event store with broadcast and bounded history.
///
/// Subscribers that attach late (a UI opened after the session came up)
/// receive the retained history, then live events.
pub struct EventStore {
    history: RwLock<VecDeque<SessionEvent>>,
    capacity: usize,
    sender: broadcast::Sender<SessionEvent>,
}

impl Default for EventStore {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventStore {
    /// Create a store retaining at most `capacity` events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            history: RwLock::new(VecDeque::with_capacity(capacity.min(64))),
            capacity,
            sender,
        }
    }

    /// Push an event to live listeners and history.
    pub fn push(&self, event: SessionEvent) {
        let _ = self.sender.send(event.clone());

        if self.capacity == 0 {
            return;
        }
        let mut history = self.history.write().unwrap_or_else(PoisonError::into_inner);
        while history.len() >= self.capacity {
            history.pop_front();
        }
        history.push_back(event);
    }

    /// Push a status event.
    pub fn push_status(&self, status: StatusEvent) {
        tracing::debug!(status = %status.status, progress = ?status.progress, "session status");
        self.push(SessionEvent::Status(status));
    }

    /// Push an unsolicited message.
    pub fn push_message(&self, message: Value) {
        self.push(SessionEvent::Message(message));
    }

    /// Get a receiver for live events.
    #[must_use]
    pub fn get_receiver(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    /// Get a snapshot of the history.
    #[must_use]
    pub fn get_history(&self) -> Vec<SessionEvent> {
        self.history
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Statuses in the history, oldest first.
    #[must_use]
    pub fn status_history(&self) -> Vec<StatusEvent> {
        self.get_history()
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::Status(s) => Some(s),
                SessionEvent::Message(_) => None,
            })
            .collect()
    }

    /// Stream that yields history first, then live events.
    ///
    /// Lagged receivers skip the events they missed.
    #[must_use]
    pub fn history_plus_stream(&self) -> BoxStream<'static, SessionEvent> {
        let (history, rx) = {
            // Subscribe while holding the lock so nothing falls between the two.
            let guard = self.history.read().unwrap_or_else(PoisonError::into_inner);
            (guard.iter().cloned().collect::<Vec<_>>(), self.sender.subscribe())
        };

        let hist = futures::stream::iter(history);
        let live = BroadcastStream::new(rx).filter_map(|res| async move { res.ok() });

        hist.chain(live).boxed()
    }

    /// Live status events only.
    #[must_use]
    pub fn status_stream(&self) -> BoxStream<'static, StatusEvent> {
        BroadcastStream::new(self.get_receiver())
            .filter_map(|res| async move {
                match res {
                    Ok(SessionEvent::Status(s)) => Some(s),
                    _ => None,
                }
            })
            .boxed()
    }

    /// Drop retained history.
    pub fn clear_history(&self) {
        self.history
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SessionStatus;

    #[test]
    fn test_history_is_bounded() {
        let store = EventStore::new(2);
        store.push_status(StatusEvent::new(SessionStatus::Connecting));
        store.push_status(StatusEvent::new(SessionStatus::Creating));
        store.push_status(StatusEvent::new(SessionStatus::Ready));

        let statuses: Vec<_> = store.status_history().into_iter().map(|s| s.status).collect();
        assert_eq!(statuses, vec![SessionStatus::Creating, SessionStatus::Ready]);
    }

    #[tokio::test]
    async fn test_history_then_live() {
        let store = EventStore::new(8);
        store.push_status(StatusEvent::new(SessionStatus::Connecting));

        let mut stream = store.history_plus_stream();
        store.push_message(serde_json::json!({"hello": "world"}));

        assert_eq!(
            stream.next().await,
            Some(SessionEvent::Status(StatusEvent::new(SessionStatus::Connecting)))
        );
        assert_eq!(
            stream.next().await,
            Some(SessionEvent::Message(serde_json::json!({"hello": "world"})))
        );
    }

    #[tokio::test]
    async fn test_status_stream_skips_messages() {
        let store = EventStore::new(0);
        let mut statuses = store.status_stream();

        store.push_message(serde_json::json!({"noise": true}));
        store.push_status(StatusEvent::with_progress(SessionStatus::from("indexing"), Some(0.5)));

        let next = statuses.next().await.unwrap();
        assert_eq!(next.status, SessionStatus::Other("indexing".into()));
        assert_eq!(next.progress, Some(0.5));
        assert!(store.get_history().is_empty());
    }
}
