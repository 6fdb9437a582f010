//! Correlation map from request id to completion slot.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

use serde_json::Value;
use tokio::sync::oneshot;

use crate::{ChannelError, RequestId};

type Completion = oneshot::Sender<Result<Value, ChannelError>>;

struct State {
    waiting: HashMap<RequestId, Completion>,
    closed: bool,
}

/// Outstanding requests of one channel.
///
/// Every registered request is completed at most once: completing removes the
/// slot, so a duplicate response for the same id finds nothing. Once
/// [`PendingRequests::fail_all`] has run, new registrations are refused so no
/// request can be left waiting on a dead channel.
pub struct PendingRequests {
    state: Mutex<State>,
}

impl Default for PendingRequests {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingRequests {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                waiting: HashMap::new(),
                closed: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a request and get the receiver its result arrives on.
    ///
    /// # Errors
    /// Returns [`ChannelError::ChannelClosed`] after `fail_all`.
    pub fn register(
        &self,
        id: RequestId,
    ) -> Result<oneshot::Receiver<Result<Value, ChannelError>>, ChannelError> {
        let mut state = self.lock();
        if state.closed {
            return Err(ChannelError::ChannelClosed);
        }
        let (tx, rx) = oneshot::channel();
        state.waiting.insert(id, tx);
        Ok(rx)
    }

    /// Complete request `id`. Returns false if nothing was waiting on it.
    pub fn complete(&self, id: RequestId, result: Result<Value, ChannelError>) -> bool {
        let Some(tx) = self.lock().waiting.remove(&id) else {
            return false;
        };
        // Receiver dropped means the caller gave up; the slot is released either way.
        let _ = tx.send(result);
        true
    }

    /// Forget request `id` without completing it.
    pub fn cancel(&self, id: RequestId) -> bool {
        self.lock().waiting.remove(&id).is_some()
    }

    /// Fail every outstanding request and refuse new ones.
    ///
    /// Returns how many requests were failed.
    pub fn fail_all(&self) -> usize {
        let drained: Vec<Completion> = {
            let mut state = self.lock();
            state.closed = true;
            state.waiting.drain().map(|(_, tx)| tx).collect()
        };
        let count = drained.len();
        for tx in drained {
            let _ = tx.send(Err(ChannelError::ChannelClosed));
        }
        count
    }

    /// Number of outstanding requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().waiting.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}
