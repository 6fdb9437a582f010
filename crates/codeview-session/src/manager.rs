//! Session manager: owns the single analysis session and keeps it alive.
//!
//! Lifecycle: `disconnected → connecting → creating → ready`, falling back to
//! `disconnected` when the transport drops and to `error` when creation fails.
//! Only an unclean closure of a session that had been ready triggers
//! reconnection; explicit teardown never does.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use codeview_core::{
    AuthProvider, ClientConfig, CrashReporter, EventStore, FileContents, QueryKind, SessionEvent,
    SessionParameters, SessionState, Side, StatusEvent, TracingCrashReporter,
};
use codeview_transport::{
    Channel, ChannelError, ChannelEvent, ChannelOptions, Connector, Unsolicited, sessions_url,
};
use futures::stream::BoxStream;
use serde_json::Value;
use tokio::{sync::broadcast, task::JoinHandle};

use crate::{
    SessionError,
    client::{ProtocolClient, QueryResponse, file_contents_request, position_request},
    error::Classification,
    reconnect::{Readiness, ReconnectPolicy},
};

/// The open channel and the task pumping its events.
struct Connection {
    channel: Arc<Channel>,
    pump: JoinHandle<()>,
}

struct Shared {
    state: SessionState,
    params: Option<SessionParameters>,
    connection: Option<Connection>,
    /// Bumped by every new session and every teardown.
    generation: u64,
    readiness: Readiness,
    reconnect_attempts: u32,
    reconnect_timer: Option<JoinHandle<()>>,
}

impl Shared {
    fn holds(&self, generation: u64, channel: &Arc<Channel>) -> bool {
        self.generation == generation
            && self
                .connection
                .as_ref()
                .is_some_and(|c| Arc::ptr_eq(&c.channel, channel))
    }

    fn cancel_reconnect(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
    }
}

struct Inner<C, A> {
    connector: C,
    auth: A,
    crash: Arc<dyn CrashReporter>,
    policy: ReconnectPolicy,
    channel_options: ChannelOptions,
    events: EventStore,
    shared: Mutex<Shared>,
    /// Serialises teardown-then-open so at most one channel is ever open.
    connect_lock: tokio::sync::Mutex<()>,
}

/// Builder for [`SessionManager`].
pub struct SessionManagerBuilder<C, A> {
    connector: C,
    auth: A,
    config: ClientConfig,
    policy: Option<ReconnectPolicy>,
    crash: Arc<dyn CrashReporter>,
}

impl<C, A> SessionManagerBuilder<C, A>
where
    C: Connector,
    A: AuthProvider + 'static,
{
    /// Use `config` for timeouts, backoff and history.
    #[must_use]
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Override the reconnection policy derived from the config.
    #[must_use]
    pub fn policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Where unclassified failures are reported.
    #[must_use]
    pub fn crash_reporter(mut self, crash: Arc<dyn CrashReporter>) -> Self {
        self.crash = crash;
        self
    }

    #[must_use]
    pub fn build(self) -> SessionManager<C, A> {
        let policy = self
            .policy
            .unwrap_or_else(|| ReconnectPolicy::from_config(&self.config));

        SessionManager {
            inner: Arc::new(Inner {
                connector: self.connector,
                auth: self.auth,
                crash: self.crash,
                policy,
                channel_options: ChannelOptions {
                    request_timeout: self.config.request_timeout(),
                },
                events: EventStore::new(self.config.event_history),
                shared: Mutex::new(Shared {
                    state: SessionState::Disconnected,
                    params: None,
                    connection: None,
                    generation: 0,
                    readiness: Readiness::NeverReady,
                    reconnect_attempts: 0,
                    reconnect_timer: None,
                }),
                connect_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }
}

/// Manager of one resilient analysis session.
///
/// Cheap to clone; clones share the session. Background tasks keep the
/// session alive until [`SessionManager::teardown`] is called.
pub struct SessionManager<C, A> {
    inner: Arc<Inner<C, A>>,
}

impl<C, A> Clone for SessionManager<C, A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C, A> SessionManager<C, A>
where
    C: Connector,
    A: AuthProvider + 'static,
{
    /// Create a manager with default config.
    #[must_use]
    pub fn new(connector: C, auth: A) -> Self {
        Self::builder(connector, auth).build()
    }

    #[must_use]
    pub fn builder(connector: C, auth: A) -> SessionManagerBuilder<C, A> {
        SessionManagerBuilder {
            connector,
            auth,
            config: ClientConfig::default(),
            policy: None,
            crash: Arc::new(TracingCrashReporter),
        }
    }

    /// Start a new session, replacing any current one.
    ///
    /// Resolves with the service's creation result. A later call or a
    /// teardown supersedes this one, which then resolves
    /// [`SessionError::Superseded`] without touching the new session.
    ///
    /// # Errors
    /// Returns the creation failure after reporting its classification as a
    /// status event.
    pub async fn create_new_session(&self, params: SessionParameters) -> Result<Value, SessionError> {
        tracing::info!(session_event = "creating", kind = params.kind(), "creating session");
        let generation = self.inner.begin(Some(params.clone()));
        let result = self.inner.establish(generation, params).await;

        if matches!(result, Err(SessionError::Transport(_) | SessionError::Auth(_))) {
            self.inner.schedule_reconnect(generation);
        }
        self.inner.finish_attempt(generation, result)
    }

    /// Start a new session from loosely-typed parameters.
    ///
    /// Unknown kinds tear down the current session and are reported as
    /// `no_session`; nothing is sent.
    ///
    /// # Errors
    /// Returns [`SessionError::NoSession`] for unusable parameters, otherwise
    /// as [`SessionManager::create_new_session`].
    pub async fn create_new_session_from_value(&self, params: Value) -> Result<Value, SessionError> {
        match SessionParameters::from_value(params) {
            Ok(params) => self.create_new_session(params).await,
            Err(e) => {
                tracing::info!(session_event = "creating", "creating session");
                let generation = self.inner.begin(None);
                {
                    let _guard = self.inner.connect_lock.lock().await;
                    self.inner.release_connection(generation).await;
                }
                self.inner.finish_attempt(generation, Err(e.into()))
            }
        }
    }

    /// Close the session cleanly. Suppresses reconnection.
    ///
    /// Outstanding queries fail; the only status emitted is a final
    /// `disconnected`.
    pub async fn teardown(&self) {
        let generation = {
            let mut shared = self.inner.lock();
            shared.generation += 1;
            shared.readiness = Readiness::TornDown;
            shared.reconnect_attempts = 0;
            shared.cancel_reconnect();
            shared.generation
        };

        let held = self.inner.lock().connection.take();
        if let Some(conn) = held {
            conn.pump.abort();
            conn.channel.close().await;
        }

        let mut shared = self.inner.lock();
        if shared.generation == generation {
            shared.state = SessionState::Disconnected;
            self.inner.emit(SessionState::Disconnected.into());
        }
        tracing::info!("session torn down");
    }

    /// Run a query against the ready session.
    ///
    /// `line` and `column` are required for every kind but file contents.
    ///
    /// # Errors
    /// Returns [`SessionError::NotReady`] immediately, without sending, unless
    /// the session is ready; otherwise the channel error.
    pub async fn query(
        &self,
        kind: QueryKind,
        side: Side,
        file_path: &str,
        line: Option<u32>,
        column: Option<u32>,
    ) -> Result<QueryResponse, SessionError> {
        let request = match (kind, line, column) {
            (QueryKind::FileContents, _, _) => file_contents_request(side, file_path),
            (_, Some(line), Some(column)) => position_request(kind, side, file_path, line, column),
            _ => return Err(SessionError::MissingPosition(kind)),
        };

        let channel = self.inner.ready_channel()?;
        let value = channel.send(request).await?;

        Ok(match kind {
            QueryKind::Hover => QueryResponse::Hover(value),
            QueryKind::Definition => QueryResponse::Definition(value),
            QueryKind::References => QueryResponse::References(value),
            QueryKind::FileContents => QueryResponse::FileContents(FileContents {
                file_path: file_path.to_owned(),
                side,
                contents: value,
            }),
        })
    }

    /// Hover information at a position.
    ///
    /// # Errors
    /// As [`SessionManager::query`].
    pub async fn hover(&self, side: Side, file_path: &str, line: u32, column: u32) -> Result<Value, SessionError> {
        let channel = self.inner.ready_channel()?;
        Ok(ProtocolClient::new(&channel).hover(side, file_path, line, column).await?)
    }

    /// Definition of the symbol at a position.
    ///
    /// # Errors
    /// As [`SessionManager::query`].
    pub async fn definition(&self, side: Side, file_path: &str, line: u32, column: u32) -> Result<Value, SessionError> {
        let channel = self.inner.ready_channel()?;
        Ok(ProtocolClient::new(&channel)
            .definition(side, file_path, line, column)
            .await?)
    }

    /// References to the symbol at a position.
    ///
    /// # Errors
    /// As [`SessionManager::query`].
    pub async fn references(&self, side: Side, file_path: &str, line: u32, column: u32) -> Result<Value, SessionError> {
        let channel = self.inner.ready_channel()?;
        Ok(ProtocolClient::new(&channel)
            .references(side, file_path, line, column)
            .await?)
    }

    /// Contents of a file on one side of the diff.
    ///
    /// # Errors
    /// As [`SessionManager::query`].
    pub async fn file_contents(&self, side: Side, file_path: &str) -> Result<FileContents, SessionError> {
        let channel = self.inner.ready_channel()?;
        Ok(ProtocolClient::new(&channel).file_contents(side, file_path).await?)
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state() == SessionState::Ready
    }

    /// Parameters of the current session, if any.
    #[must_use]
    pub fn parameters(&self) -> Option<SessionParameters> {
        self.inner.lock().params.clone()
    }

    /// Reconnection attempts since the session was last ready.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.lock().reconnect_attempts
    }

    /// Whether a reconnection attempt is waiting on its backoff timer.
    #[must_use]
    pub fn reconnect_scheduled(&self) -> bool {
        self.inner
            .lock()
            .reconnect_timer
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }

    /// Retained events, then live ones.
    #[must_use]
    pub fn subscribe(&self) -> BoxStream<'static, SessionEvent> {
        self.inner.events.history_plus_stream()
    }

    /// Live events only.
    #[must_use]
    pub fn receiver(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.get_receiver()
    }

    /// Retained status events, oldest first.
    #[must_use]
    pub fn status_history(&self) -> Vec<StatusEvent> {
        self.inner.events.status_history()
    }
}

impl<C, A> Inner<C, A>
where
    C: Connector,
    A: AuthProvider + 'static,
{
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, status: StatusEvent) {
        self.events.push_status(status);
    }

    /// Start a new generation for `params`.
    fn begin(&self, params: Option<SessionParameters>) -> u64 {
        let mut shared = self.lock();
        shared.generation += 1;
        shared.params = params;
        shared.reconnect_attempts = 0;
        shared.readiness = Readiness::NeverReady;
        shared.cancel_reconnect();
        shared.generation
    }

    /// Move to `state` if `generation` is still current.
    fn transition(&self, generation: u64, state: SessionState) -> Result<(), SessionError> {
        let mut shared = self.lock();
        if shared.generation != generation {
            return Err(SessionError::Superseded);
        }
        shared.state = state;
        self.emit(state.into());
        Ok(())
    }

    fn ready_channel(&self) -> Result<Arc<Channel>, SessionError> {
        let shared = self.lock();
        match (&shared.state, &shared.connection) {
            (SessionState::Ready, Some(conn)) => Ok(Arc::clone(&conn.channel)),
            _ => Err(SessionError::NotReady),
        }
    }

    /// Close the held channel if `generation` is still current. Reports
    /// `disconnected` if one was held.
    async fn release_connection(&self, generation: u64) {
        let held = {
            let mut shared = self.lock();
            if shared.generation != generation {
                return;
            }
            shared.connection.take()
        };
        let Some(conn) = held else {
            return;
        };
        conn.pump.abort();
        conn.channel.close().await;

        let mut shared = self.lock();
        if shared.generation == generation {
            shared.state = SessionState::Disconnected;
            self.emit(SessionState::Disconnected.into());
        }
    }

    /// Tear down, open a fresh channel and create the session on it.
    async fn establish(self: &Arc<Self>, generation: u64, params: SessionParameters) -> Result<Value, SessionError> {
        let channel = {
            let _guard = self.connect_lock.lock().await;
            if self.lock().generation != generation {
                return Err(SessionError::Superseded);
            }
            self.release_connection(generation).await;
            self.transition(generation, SessionState::Connecting)?;

            let opened = match self.auth.token().await {
                Ok(token) => {
                    let url = sessions_url(&self.auth.base_url(), &token);
                    Channel::open(&self.connector, &url, self.channel_options.clone())
                        .await
                        .map_err(SessionError::from)
                }
                Err(e) => Err(e.into()),
            };

            let (channel, events) = match opened {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::warn!("Failed to open session channel: {e}");
                    // Stay disconnected; the caller decides about retrying.
                    let _ = self.transition(generation, SessionState::Disconnected);
                    return Err(e);
                }
            };
            let channel = Arc::new(channel);

            if !self.install(generation, &channel, events) {
                channel.close().await;
                return Err(SessionError::Superseded);
            }
            channel
        };

        let result = ProtocolClient::new(&channel).create_session(&params).await;

        let mut shared = self.lock();
        if shared.generation != generation {
            return Err(SessionError::Superseded);
        }
        let value = result?;
        if !shared.holds(generation, &channel) {
            return Err(ChannelError::ChannelClosed.into());
        }
        shared.state = SessionState::Ready;
        shared.readiness = Readiness::ReadySinceTeardown;
        shared.reconnect_attempts = 0;
        self.emit(SessionState::Ready.into());
        tracing::info!(channel = %channel.id(), "session ready");
        Ok(value)
    }

    /// Make `channel` the held connection and enter `creating`.
    fn install(
        self: &Arc<Self>,
        generation: u64,
        channel: &Arc<Channel>,
        events: tokio::sync::mpsc::UnboundedReceiver<ChannelEvent>,
    ) -> bool {
        let mut shared = self.lock();
        if shared.generation != generation {
            return false;
        }
        let pump = tokio::spawn(Arc::clone(self).pump(generation, Arc::clone(channel), events));
        shared.connection = Some(Connection {
            channel: Arc::clone(channel),
            pump,
        });
        shared.state = SessionState::Creating;
        self.emit(SessionState::Creating.into());
        true
    }

    /// Report the outcome of a `create_new_session` attempt.
    fn finish_attempt(&self, generation: u64, result: Result<Value, SessionError>) -> Result<Value, SessionError> {
        let err = match result {
            Ok(value) => {
                tracing::info!(session_event = "created", "session created");
                return Ok(value);
            }
            Err(SessionError::Superseded) => return Err(SessionError::Superseded),
            Err(err) => err,
        };

        let classification = err.classify();
        {
            let mut shared = self.lock();
            if shared.generation != generation {
                return Err(SessionError::Superseded);
            }
            shared.state = SessionState::Error;
            self.emit(StatusEvent::new(classification.status()));
        }

        if classification == Classification::Error {
            self.crash.report("create_new_session", &err);
        }
        tracing::info!(session_event = %classification.status(), "session creation failed: {err}");
        Err(err)
    }

    /// Forward a channel's events until it closes.
    async fn pump(
        self: Arc<Self>,
        generation: u64,
        channel: Arc<Channel>,
        mut events: tokio::sync::mpsc::UnboundedReceiver<ChannelEvent>,
    ) {
        while let Some(event) = events.recv().await {
            match event {
                ChannelEvent::Message(Unsolicited::Status(update)) => {
                    let shared = self.lock();
                    // Before ready, the create response alone decides readiness.
                    if shared.holds(generation, &channel) && shared.state == SessionState::Ready {
                        self.emit(StatusEvent::with_progress(update.status_update, update.progress));
                    }
                }
                ChannelEvent::Message(Unsolicited::Other(message)) => {
                    if self.lock().holds(generation, &channel) {
                        self.events.push_message(message);
                    }
                }
                ChannelEvent::Closed { clean } => {
                    self.on_closed(generation, &channel, clean);
                    break;
                }
            }
        }
    }

    fn on_closed(self: &Arc<Self>, generation: u64, channel: &Arc<Channel>, clean: bool) {
        let mut shared = self.lock();
        if !shared.holds(generation, channel) {
            return;
        }
        // Dropping our own handle detaches; the pump is about to return anyway.
        shared.connection = None;
        shared.state = SessionState::Disconnected;
        self.emit(SessionState::Disconnected.into());
        tracing::info!(channel = %channel.id(), clean, "session channel closed");

        if !clean {
            self.schedule_locked(&mut shared, generation);
        }
    }

    fn schedule_reconnect(self: &Arc<Self>, generation: u64) {
        let mut shared = self.lock();
        if shared.generation == generation {
            self.schedule_locked(&mut shared, generation);
        }
    }

    /// Arm the backoff timer, unless one is armed or reconnecting is pointless.
    fn schedule_locked(self: &Arc<Self>, shared: &mut Shared, generation: u64) {
        if !ReconnectPolicy::should_reconnect(shared.connection.is_some(), shared.readiness) {
            tracing::debug!(readiness = ?shared.readiness, "not reconnecting");
            return;
        }
        if shared.reconnect_timer.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }

        let attempt = shared.reconnect_attempts;
        let delay = self.policy.delay(attempt);
        tracing::info!(attempt, delay_ms = delay.as_millis(), "scheduling reconnection");

        let inner = Arc::clone(self);
        shared.reconnect_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.reconnect(generation).await;
        }));
    }

    async fn reconnect(self: Arc<Self>, generation: u64) {
        let params = {
            let mut shared = self.lock();
            shared.reconnect_timer = None;
            if shared.generation != generation
                || !ReconnectPolicy::should_reconnect(shared.connection.is_some(), shared.readiness)
            {
                return;
            }
            let Some(params) = shared.params.clone() else {
                return;
            };
            shared.reconnect_attempts += 1;
            tracing::info!(attempt = shared.reconnect_attempts, "reconnecting session");
            params
        };

        match self.establish(generation, params).await {
            Ok(_) => tracing::info!("session restored"),
            Err(SessionError::Superseded) => {}
            Err(e) => {
                tracing::warn!("Reconnection attempt failed: {e}");
                self.release_connection(generation).await;
                self.schedule_reconnect(generation);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use codeview_core::{GitService, RepoRef, StaticAuth};
    use codeview_transport::MemoryConnector;
    use tokio_test::assert_err;

    use super::*;

    fn manager() -> SessionManager<MemoryConnector, StaticAuth> {
        let (connector, _listener) = MemoryConnector::new();
        SessionManager::new(connector, StaticAuth::new("http://localhost:8000/", Some("tok".into())))
    }

    #[tokio::test]
    async fn test_query_before_ready_fails_fast() {
        let manager = manager();

        let err = assert_err!(
            manager
                .query(QueryKind::Hover, Side::Head, "a.rs", Some(1), Some(1))
                .await
        );
        assert!(matches!(err, SessionError::NotReady));
        assert!(matches!(
            manager.file_contents(Side::Base, "a.rs").await,
            Err(SessionError::NotReady)
        ));
    }

    #[tokio::test]
    async fn test_query_requires_position() {
        let manager = manager();
        let err = manager
            .query(QueryKind::Definition, Side::Head, "a.rs", Some(1), None)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::MissingPosition(QueryKind::Definition)));
    }

    #[tokio::test]
    async fn test_initial_state() {
        let manager = manager();
        assert_eq!(manager.state(), SessionState::Disconnected);
        assert!(!manager.is_ready());
        assert_eq!(manager.reconnect_attempts(), 0);
        assert!(!manager.reconnect_scheduled());
        assert!(manager.parameters().is_none());
    }

    #[tokio::test]
    async fn test_teardown_without_session() {
        let manager = manager();
        manager.teardown().await;
        manager.teardown().await;

        let statuses: Vec<_> = manager.status_history().into_iter().map(|s| s.status).collect();
        assert_eq!(
            statuses,
            vec![
                codeview_core::SessionStatus::Disconnected,
                codeview_core::SessionStatus::Disconnected
            ]
        );
    }

    #[tokio::test]
    async fn test_connect_failure_is_error_without_retry() {
        let (connector, _listener) = MemoryConnector::new();
        connector.refuse_next(1);
        let manager = SessionManager::new(
            connector.clone(),
            StaticAuth::new("http://localhost:8000/", Some("tok".into())),
        );

        let params = SessionParameters::Pull {
            repo: RepoRef::new("acme", "widgets", GitService::Github),
            pull_request_id: 1,
        };
        let err = assert_err!(manager.create_new_session(params).await);

        assert!(matches!(err, SessionError::Transport(_)));
        assert_eq!(manager.state(), SessionState::Error);
        // Never ready, so nothing to restore.
        assert!(!manager.reconnect_scheduled());
        assert_eq!(connector.attempts(), 1);
        assert_eq!(
            connector.urls()[0],
            "ws://localhost:8000/sessions/?token=tok"
        );
    }

    #[tokio::test]
    async fn test_stale_release_keeps_current_channel() {
        let (connector, mut listener) = MemoryConnector::new();
        let manager = SessionManager::new(connector, StaticAuth::new("http://localhost:8000/", Some("tok".into())));

        let create = tokio::spawn({
            let manager = manager.clone();
            async move {
                manager
                    .create_new_session(SessionParameters::Pull {
                        repo: RepoRef::new("acme", "widgets", GitService::Github),
                        pull_request_id: 1,
                    })
                    .await
            }
        });
        let mut peer = listener.accept().await.unwrap();
        let request = peer.next_request().await.unwrap();
        peer.handle().reply(&request["id"], serde_json::json!({}));
        create.await.unwrap().unwrap();

        // A reconnect task from an earlier generation cleaning up after itself.
        let current = manager.inner.lock().generation;
        manager.inner.release_connection(current - 1).await;

        assert!(manager.is_ready());
        assert!(manager.inner.lock().connection.is_some());

        let hover = tokio::spawn({
            let manager = manager.clone();
            async move { manager.hover(Side::Head, "a.rs", 1, 1).await }
        });
        let request = peer.next_request().await.unwrap();
        assert_eq!(request["type"], "session.hover");
        peer.handle().reply(&request["id"], serde_json::json!("docs"));
        assert_eq!(hover.await.unwrap().unwrap(), serde_json::json!("docs"));
    }
}
