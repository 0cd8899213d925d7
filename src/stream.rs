//! Transport Manager: push channel with polling fallback.
//!
//! ```text
//! Disconnected -> Connecting -> PushActive -(failure)-> Polling -(reconnect)-> Connecting
//! ```
//!
//! Connectivity failures never reach the caller. A failed or dropped push
//! channel moves to `Polling`, triggers one immediate pull, and retries the
//! push channel with bounded exponential backoff. Once the attempt cap is
//! reached the manager stays in `Polling` until the session ends.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::{
    net::TcpStream,
    sync::{mpsc, watch},
    time::Interval,
};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        client::IntoClientRequest,
        http::{header::AUTHORIZATION, HeaderValue},
        Error as WsError, Message,
    },
    MaybeTlsStream, WebSocketStream,
};

use crate::{
    consts::{
        STREAM_CONNECT_TIMEOUT_SECS, STREAM_HINT_RECHECK_SECS,
        STREAM_LIVENESS_CHECK_INTERVAL_SECS, STREAM_LIVENESS_IDLE_SECS,
        STREAM_LIVENESS_PING_GRACE_SECS,
    },
    core::{jitter_millis, lock, redact_ws_url, truncate_message, unix_now_secs},
    error::{EngineError, SourceError},
    model::{ActivityHint, ConnectionState, Principal, PushCommand, PushEvent},
    poller::AttentionSignal,
    retry::RetryPolicy,
    settings::{build_push_ws_url, EngineSettings},
    sync::{SyncEngine, SyncMode},
};

/// An open push channel. Outbound commands are fire-and-forget; a send
/// error means the channel is broken.
#[async_trait]
pub trait PushSession: Send {
    async fn send(&mut self, command: PushCommand) -> Result<(), SourceError>;

    /// `None` once the server has closed the channel.
    async fn next_event(&mut self) -> Option<Result<PushEvent, SourceError>>;

    async fn close(&mut self);
}

#[async_trait]
pub trait PushConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn PushSession>, SourceError>;
}

/// Connection bookkeeping surfaced through diagnostics.
#[derive(Debug, Default, Clone, Serialize)]
pub struct TransportStats {
    pub last_connected_at: Option<u64>,
    pub last_event_at: Option<u64>,
    pub last_error: Option<String>,
    pub backoff_seconds: u64,
    pub reconnect_attempts: u64,
    pub gave_up: bool,
}

#[derive(Default)]
struct TransportRuntime {
    stop_tx: Option<watch::Sender<bool>>,
    /// Incremented for every spawned transport task. A task only writes its
    /// cleanup state while its epoch is still current, so a late-exiting old
    /// task cannot clobber a freshly started replacement.
    stream_epoch: u64,
    stats: TransportStats,
}

enum SessionEnd {
    Stopped,
    Failed(SourceError),
}

pub struct TransportManager {
    connector: Option<Arc<dyn PushConnector>>,
    sync: Arc<SyncEngine>,
    attention: Arc<AttentionSignal>,
    events_tx: mpsc::UnboundedSender<PushEvent>,
    state_tx: watch::Sender<ConnectionState>,
    runtime: Mutex<TransportRuntime>,
    reconnect: RetryPolicy,
    connect_timeout: Duration,
}

impl TransportManager {
    /// `connector == None` runs the session on polling alone.
    pub fn new(
        settings: &EngineSettings,
        connector: Option<Arc<dyn PushConnector>>,
        sync: Arc<SyncEngine>,
        attention: Arc<AttentionSignal>,
        events_tx: mpsc::UnboundedSender<PushEvent>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            connector,
            sync,
            attention,
            events_tx,
            state_tx,
            runtime: Mutex::new(TransportRuntime::default()),
            reconnect: RetryPolicy::for_reconnects(settings),
            connect_timeout: Duration::from_secs(STREAM_CONNECT_TIMEOUT_SECS),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn stats(&self) -> TransportStats {
        lock(&self.runtime).stats.clone()
    }

    /// Idempotent: returns `false` if a transport task is already running.
    pub fn start(self: &Arc<Self>, principal: Principal) -> bool {
        let (stop_rx, task_epoch) = {
            let mut runtime = lock(&self.runtime);
            if runtime.stop_tx.is_some() {
                return false;
            }
            let (tx, rx) = watch::channel(false);
            runtime.stop_tx = Some(tx);
            runtime.stream_epoch = runtime.stream_epoch.wrapping_add(1);
            runtime.stats.last_error = None;
            runtime.stats.backoff_seconds = 0;
            runtime.stats.reconnect_attempts = 0;
            runtime.stats.gave_up = false;
            (rx, runtime.stream_epoch)
        };

        self.set_state(ConnectionState::Connecting);
        tracing::debug!("spawning transport task principal={}", principal.id);
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            manager.run_transport_loop(principal, stop_rx, task_epoch).await;
        });
        true
    }

    /// Releases the channel. Safe to call repeatedly.
    pub fn stop(&self) {
        let stop_tx = lock(&self.runtime).stop_tx.take();
        if let Some(stop_tx) = stop_tx {
            let _ = stop_tx.send(true);
        }
        lock(&self.runtime).stats.backoff_seconds = 0;
        self.set_state(ConnectionState::Disconnected);
    }

    async fn run_transport_loop(
        self: Arc<Self>,
        principal: Principal,
        mut stop_rx: watch::Receiver<bool>,
        task_epoch: u64,
    ) {
        let mut failures: u32 = 0;
        let mut fell_back = false;

        loop {
            if *stop_rx.borrow() {
                break;
            }

            let Some(connector) = self.connector.clone() else {
                self.fall_back(&mut fell_back).await;
                wait_for_stop(&mut stop_rx).await;
                break;
            };

            self.set_state(ConnectionState::Connecting);
            let connected = tokio::select! {
                _ = wait_for_stop(&mut stop_rx) => break,
                result = tokio::time::timeout(self.connect_timeout, connector.connect()) => {
                    result.unwrap_or(Err(SourceError::Timeout(self.connect_timeout)))
                }
            };

            let error = match connected {
                Ok(session) => {
                    failures = 0;
                    {
                        let mut runtime = lock(&self.runtime);
                        runtime.stats.last_connected_at = Some(unix_now_secs());
                        runtime.stats.last_error = None;
                        runtime.stats.backoff_seconds = 0;
                    }
                    let resync = std::mem::replace(&mut fell_back, false);
                    match self
                        .run_session(session, &principal, &mut stop_rx, resync)
                        .await
                    {
                        SessionEnd::Stopped => break,
                        SessionEnd::Failed(error) => error,
                    }
                }
                Err(error) => error,
            };

            if *stop_rx.borrow() {
                break;
            }
            tracing::warn!("push channel unavailable: {error}");
            self.fall_back(&mut fell_back).await;

            failures = failures.saturating_add(1);
            let delay = self.reconnect.delay_after(failures)
                + Duration::from_millis(jitter_millis(500));
            {
                let mut runtime = lock(&self.runtime);
                runtime.stats.last_error = Some(truncate_message(&error.to_string(), 300));
                runtime.stats.reconnect_attempts = u64::from(failures);
                runtime.stats.backoff_seconds = delay.as_secs();
            }

            if failures >= self.reconnect.max_attempts {
                tracing::info!(
                    "push reconnect gave up after {failures} attempts; staying on polling"
                );
                lock(&self.runtime).stats.gave_up = true;
                wait_for_stop(&mut stop_rx).await;
                break;
            }

            tokio::select! {
                _ = wait_for_stop(&mut stop_rx) => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let current = {
            let mut runtime = lock(&self.runtime);
            let current = runtime.stream_epoch == task_epoch;
            if current {
                runtime.stop_tx = None;
                runtime.stats.backoff_seconds = 0;
            }
            current
        };
        if current {
            self.set_state(ConnectionState::Disconnected);
        }
        tracing::debug!("transport task finished epoch={task_epoch}");
    }

    /// Enters `Polling`. The first fallback after push was last healthy pulls
    /// once right away so the gap is closed without waiting for a tick.
    async fn fall_back(&self, fell_back: &mut bool) {
        self.set_state(ConnectionState::Polling);
        if *fell_back {
            return;
        }
        *fell_back = true;
        let mode = self.sync.refresh_mode();
        let outcome = self.sync.pull(mode, true).await;
        tracing::debug!("fallback pull outcome={outcome:?}");
    }

    async fn run_session(
        &self,
        mut session: Box<dyn PushSession>,
        principal: &Principal,
        stop_rx: &mut watch::Receiver<bool>,
        resync: bool,
    ) -> SessionEnd {
        let mut hint = ActivityHint::from(self.attention.level());
        let authenticate = PushCommand::Authenticate {
            principal_id: principal.id.clone(),
        };
        let handshake = match session.send(authenticate).await {
            Ok(()) => session.send(PushCommand::Activity { state: hint }).await,
            Err(error) => Err(error),
        };
        if let Err(error) = handshake {
            session.close().await;
            return SessionEnd::Failed(error);
        }

        self.set_state(ConnectionState::PushActive);
        tracing::info!("push channel active principal={}", principal.id);
        if resync {
            let sync = Arc::clone(&self.sync);
            tokio::spawn(async move {
                let outcome = sync.pull_when_free(SyncMode::Full, true).await;
                tracing::debug!("reconnect resync outcome={outcome:?}");
            });
        }

        let mut attention_rx = self.attention.subscribe();
        // Going inactive is a matter of elapsed time and wakes no subscriber.
        let recheck = Duration::from_secs(STREAM_HINT_RECHECK_SECS);
        let mut hint_check = tokio::time::interval_at(tokio::time::Instant::now() + recheck, recheck);
        hint_check.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = wait_for_stop(stop_rx) => {
                    session.close().await;
                    return SessionEnd::Stopped;
                }
                changed = attention_rx.changed() => {
                    if changed.is_err() {
                        continue;
                    }
                    if let Err(error) = self.refresh_hint(&mut session, &mut hint).await {
                        session.close().await;
                        return SessionEnd::Failed(error);
                    }
                }
                _ = hint_check.tick() => {
                    if let Err(error) = self.refresh_hint(&mut session, &mut hint).await {
                        session.close().await;
                        return SessionEnd::Failed(error);
                    }
                }
                event = session.next_event() => match event {
                    Some(Ok(event)) => {
                        lock(&self.runtime).stats.last_event_at = Some(unix_now_secs());
                        if self.events_tx.send(event).is_err() {
                            session.close().await;
                            return SessionEnd::Stopped;
                        }
                    }
                    Some(Err(error)) => {
                        session.close().await;
                        return SessionEnd::Failed(error);
                    }
                    None => {
                        return SessionEnd::Failed(SourceError::Transport(
                            "push channel closed by server".to_string(),
                        ));
                    }
                }
            }
        }
    }

    /// Sends the activity hint when the attention level maps to a different
    /// one than the server last heard.
    async fn refresh_hint(
        &self,
        session: &mut Box<dyn PushSession>,
        hint: &mut ActivityHint,
    ) -> Result<(), SourceError> {
        let next = ActivityHint::from(self.attention.level());
        if next == *hint {
            return Ok(());
        }
        tracing::debug!("push activity hint {hint:?} -> {next:?}");
        *hint = next;
        session.send(PushCommand::Activity { state: next }).await
    }

    fn set_state(&self, state: ConnectionState) {
        let changed = self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
        if changed {
            tracing::debug!("connection state {}", state.as_str());
        }
    }
}

/// Resolves once the stop flag is set or its sender is gone.
pub(crate) async fn wait_for_stop(stop_rx: &mut watch::Receiver<bool>) {
    while !*stop_rx.borrow_and_update() {
        if stop_rx.changed().await.is_err() {
            return;
        }
    }
}

pub struct WebSocketConnector {
    ws_url: String,
    token: Option<String>,
    connect_timeout: Duration,
}

impl WebSocketConnector {
    pub fn new(settings: &EngineSettings) -> Result<Self, EngineError> {
        Ok(Self {
            ws_url: build_push_ws_url(&settings.base_url)?,
            token: settings.token().map(str::to_string),
            connect_timeout: Duration::from_secs(STREAM_CONNECT_TIMEOUT_SECS),
        })
    }
}

#[async_trait]
impl PushConnector for WebSocketConnector {
    async fn connect(&self) -> Result<Box<dyn PushSession>, SourceError> {
        tracing::debug!("ws connect {}", redact_ws_url(&self.ws_url));
        let mut ws_request = self
            .ws_url
            .as_str()
            .into_client_request()
            .map_err(|error| SourceError::Transport(format!("Failed to build websocket request: {error}")))?;
        if let Some(token) = &self.token {
            let header = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|error| {
                SourceError::Transport(format!("Invalid token for websocket header: {error}"))
            })?;
            ws_request.headers_mut().insert(AUTHORIZATION, header);
        }

        let (stream, _) = tokio::time::timeout(self.connect_timeout, connect_async(ws_request))
            .await
            .map_err(|_| SourceError::Timeout(self.connect_timeout))?
            .map_err(map_ws_error)?;
        tracing::debug!("ws connected");
        Ok(Box::new(WebSocketPushSession::new(stream)))
    }
}

fn map_ws_error(error: WsError) -> SourceError {
    match &error {
        WsError::Http(response) => {
            let status = response.status().as_u16();
            if status == 401 || status == 403 {
                SourceError::Unauthenticated
            } else {
                SourceError::Rejected {
                    status,
                    detail: "websocket upgrade refused".to_string(),
                }
            }
        }
        _ => SourceError::Transport(format!("Stream connection failed: {error}")),
    }
}

struct WebSocketPushSession {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    liveness: Interval,
    last_activity_at: u64,
    pending_ping_since: Option<u64>,
}

impl WebSocketPushSession {
    fn new(stream: WebSocketStream<MaybeTlsStream<TcpStream>>) -> Self {
        let period = Duration::from_secs(STREAM_LIVENESS_CHECK_INTERVAL_SECS);
        let mut liveness = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        liveness.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        Self {
            stream,
            liveness,
            last_activity_at: unix_now_secs(),
            pending_ping_since: None,
        }
    }

    fn mark_activity(&mut self) {
        self.last_activity_at = unix_now_secs();
        self.pending_ping_since = None;
    }
}

#[async_trait]
impl PushSession for WebSocketPushSession {
    async fn send(&mut self, command: PushCommand) -> Result<(), SourceError> {
        let payload = serde_json::to_string(&command)
            .map_err(|error| SourceError::Decode(format!("push command: {error}")))?;
        self.stream
            .send(Message::Text(payload.into()))
            .await
            .map_err(|error| SourceError::Transport(format!("Failed to send push command: {error}")))
    }

    async fn next_event(&mut self) -> Option<Result<PushEvent, SourceError>> {
        loop {
            tokio::select! {
                incoming = self.stream.next() => match incoming {
                    Some(Ok(Message::Text(text))) => {
                        self.mark_activity();
                        match serde_json::from_str::<PushEvent>(text.as_str()) {
                            Ok(event) => return Some(Ok(event)),
                            Err(error) => {
                                tracing::debug!(
                                    "ws text parse miss: {error} payload={}",
                                    truncate_message(text.as_str(), 140)
                                );
                            }
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        self.mark_activity();
                        if let Err(error) = self.stream.send(Message::Pong(payload)).await {
                            return Some(Err(SourceError::Transport(format!("Failed to send pong: {error}"))));
                        }
                    }
                    Some(Ok(Message::Close(_))) => return None,
                    Some(Ok(_)) => self.mark_activity(),
                    Some(Err(error)) => {
                        return Some(Err(SourceError::Transport(format!("Stream read error: {error}"))));
                    }
                    None => return None,
                },
                _ = self.liveness.tick() => {
                    let now = unix_now_secs();
                    if now.saturating_sub(self.last_activity_at) < STREAM_LIVENESS_IDLE_SECS {
                        continue;
                    }
                    match self.pending_ping_since {
                        None => {
                            tracing::debug!("ws liveness ping sent");
                            if let Err(error) = self.stream.send(Message::Ping(Vec::<u8>::new().into())).await {
                                return Some(Err(SourceError::Transport(format!("Failed to send liveness ping: {error}"))));
                            }
                            self.pending_ping_since = Some(now);
                        }
                        Some(started) if now.saturating_sub(started) >= STREAM_LIVENESS_PING_GRACE_SECS => {
                            return Some(Err(SourceError::Transport(format!(
                                "Stream liveness timeout after {}s idle",
                                now.saturating_sub(self.last_activity_at)
                            ))));
                        }
                        Some(_) => {}
                    }
                }
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}
