//! Session facade: wires the Sync Engine, Read-State Reconciler, Reminder
//! Coordinator, Adaptive Poller and Transport Manager around one cache, and
//! owns the background tasks of a started session.

use std::sync::{Arc, Mutex};

use tokio::{
    sync::{mpsc, watch, Mutex as AsyncMutex},
    task::JoinHandle,
};

use crate::{
    api::{HttpNotificationSource, NotificationSource},
    core::lock,
    dedup::DedupTracker,
    diagnostics::{snapshot_runtime, RuntimeDiagnostics},
    error::EngineError,
    model::{AttentionLevel, ConnectionState, NotificationView, Principal, PushEvent},
    notifications::{AlertPresenter, AlertSink},
    poller::{AdaptivePoller, AttentionSignal},
    reconciler::ReadStateReconciler,
    reminders::{ReminderCoordinator, TriggerOutcome},
    settings::EngineSettings,
    stream::{wait_for_stop, PushConnector, TransportManager, WebSocketConnector},
    sync::{SyncEngine, SyncMode, SyncOutcome},
};

struct Session {
    principal: Principal,
    stop_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

pub struct NotificationEngine {
    sync: Arc<SyncEngine>,
    reconciler: Arc<ReadStateReconciler>,
    reminders: Arc<ReminderCoordinator>,
    presenter: Arc<AlertPresenter>,
    attention: Arc<AttentionSignal>,
    poller: Arc<AdaptivePoller>,
    transport: Arc<TransportManager>,
    events_rx: Arc<AsyncMutex<mpsc::UnboundedReceiver<PushEvent>>>,
    session: Mutex<Option<Session>>,
}

impl NotificationEngine {
    /// `connector` is ignored when `push_enabled` is off.
    pub fn new(
        settings: &EngineSettings,
        source: Arc<dyn NotificationSource>,
        connector: Option<Arc<dyn PushConnector>>,
        sink: Arc<dyn AlertSink>,
    ) -> Result<Self, EngineError> {
        let dedup = match &settings.dedup_store_path {
            Some(path) => DedupTracker::open(path)?,
            None => DedupTracker::in_memory(),
        };
        let presenter = Arc::new(AlertPresenter::new(sink, dedup, settings.alert_cooldown()));
        let sync = Arc::new(SyncEngine::new(settings, source, Arc::clone(&presenter)));
        let attention = Arc::new(AttentionSignal::new(settings.inactivity_threshold()));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let connector = connector.filter(|_| settings.push_enabled);

        Ok(Self {
            reconciler: Arc::new(ReadStateReconciler::new(settings, Arc::clone(&sync))),
            reminders: Arc::new(ReminderCoordinator::new(settings, Arc::clone(&sync))),
            poller: Arc::new(AdaptivePoller::new(
                settings,
                Arc::clone(&sync),
                Arc::clone(&attention),
            )),
            transport: Arc::new(TransportManager::new(
                settings,
                connector,
                Arc::clone(&sync),
                Arc::clone(&attention),
                events_tx,
            )),
            presenter,
            attention,
            sync,
            events_rx: Arc::new(AsyncMutex::new(events_rx)),
            session: Mutex::new(None),
        })
    }

    /// HTTP source and websocket push channel built from `settings`.
    pub fn from_settings(
        settings: &EngineSettings,
        sink: Arc<dyn AlertSink>,
    ) -> Result<Self, EngineError> {
        let source: Arc<dyn NotificationSource> = Arc::new(HttpNotificationSource::new(settings)?);
        let connector: Option<Arc<dyn PushConnector>> = if settings.push_enabled {
            Some(Arc::new(WebSocketConnector::new(settings)?))
        } else {
            None
        };
        Self::new(settings, source, connector, sink)
    }

    /// Opens a session for `principal` and performs the initial full sync.
    /// Starting again for the same principal is a no-op that returns
    /// `Skipped`; a different principal ends the previous session first.
    pub async fn start(&self, principal: Principal) -> SyncOutcome {
        {
            let session = lock(&self.session);
            if session.as_ref().map(|s| &s.principal) == Some(&principal) {
                return SyncOutcome::Skipped;
            }
        }
        self.shutdown_session();
        self.sync.bind(&principal);

        let (stop_tx, stop_rx) = watch::channel(false);
        let mut tasks = Vec::with_capacity(3);
        tasks.push(tokio::spawn(
            Arc::clone(&self.poller).run(self.transport.subscribe_state(), stop_rx.clone()),
        ));
        tasks.push(tokio::spawn(
            Arc::clone(&self.reminders).run(stop_rx.clone()),
        ));
        tasks.push(tokio::spawn(run_dispatcher(
            Arc::clone(&self.events_rx),
            Arc::clone(&self.sync),
            Arc::clone(&self.reconciler),
            Arc::clone(&self.presenter),
            Arc::clone(&self.attention),
            stop_rx,
        )));
        self.transport.start(principal.clone());

        tracing::info!(
            "session started principal={} role={:?}",
            principal.id,
            principal.role
        );
        *lock(&self.session) = Some(Session {
            principal,
            stop_tx,
            tasks,
        });

        self.sync.pull(SyncMode::Full, true).await
    }

    /// Logout: stops every background task and forgets the cache. Results of
    /// requests still in flight are discarded when they land.
    pub fn stop(&self) {
        if self.shutdown_session() {
            tracing::info!("session stopped");
        }
        self.sync.reset();
    }

    fn shutdown_session(&self) -> bool {
        let session = lock(&self.session).take();
        self.transport.stop();
        let Some(session) = session else {
            return false;
        };
        let _ = session.stop_tx.send(true);
        for task in session.tasks {
            if task.is_finished() {
                continue;
            }
            tokio::spawn(async move {
                if let Err(error) = task.await {
                    tracing::debug!("session task ended abnormally: {error}");
                }
            });
        }
        true
    }

    pub fn is_started(&self) -> bool {
        lock(&self.session).is_some()
    }

    pub fn subscribe(&self) -> watch::Receiver<NotificationView> {
        self.sync.subscribe()
    }

    pub fn view(&self) -> NotificationView {
        self.sync.view()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.transport.state()
    }

    pub fn subscribe_connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.transport.subscribe_state()
    }

    pub fn attention(&self) -> AttentionLevel {
        self.attention.level()
    }

    /// User-initiated refresh: always a full fetch, with alerts.
    pub async fn sync_now(&self) -> SyncOutcome {
        self.sync.pull(SyncMode::Full, true).await
    }

    pub async fn trigger_reminders(&self, force: bool) -> TriggerOutcome {
        self.reminders.trigger(force).await
    }

    pub async fn mark_read(&self, id: &str) -> Result<(), EngineError> {
        self.reconciler.mark_read(id).await
    }

    pub async fn mark_all_read(&self) -> Result<(), EngineError> {
        self.reconciler.mark_all_read().await
    }

    pub async fn delete(&self, id: &str) -> Result<(), EngineError> {
        self.reconciler.delete(id).await
    }

    pub async fn delete_all_read(&self) -> Result<(), EngineError> {
        self.reconciler.delete_all_read().await
    }

    pub fn record_interaction(&self) {
        self.attention.record_interaction();
    }

    /// Regaining visibility refreshes immediately instead of waiting for the
    /// next (long) background tick.
    pub async fn set_visible(&self, visible: bool) -> Option<SyncOutcome> {
        let regained = self.attention.set_visible(visible);
        if !regained || !self.is_started() {
            return None;
        }
        tracing::debug!("visibility regained; refreshing");
        Some(self.sync.pull(SyncMode::Full, true).await)
    }

    pub fn diagnostics(&self) -> RuntimeDiagnostics {
        snapshot_runtime(
            &self.transport,
            &self.sync,
            &self.poller,
            self.attention.level(),
        )
    }
}

impl Drop for NotificationEngine {
    fn drop(&mut self) {
        if let Some(session) = lock(&self.session).take() {
            let _ = session.stop_tx.send(true);
        }
        self.transport.stop();
    }
}

/// Applies push events in arrival order until the session stops.
async fn run_dispatcher(
    events_rx: Arc<AsyncMutex<mpsc::UnboundedReceiver<PushEvent>>>,
    sync: Arc<SyncEngine>,
    reconciler: Arc<ReadStateReconciler>,
    presenter: Arc<AlertPresenter>,
    attention: Arc<AttentionSignal>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut events_rx = events_rx.lock().await;
    // Leftovers belong to the previous session.
    while events_rx.try_recv().is_ok() {}

    loop {
        tokio::select! {
            _ = wait_for_stop(&mut stop_rx) => break,
            event = events_rx.recv() => match event {
                Some(event) => dispatch(event, &sync, &reconciler, &presenter, &attention).await,
                None => break,
            }
        }
    }
    tracing::debug!("push dispatcher stopped");
}

async fn dispatch(
    event: PushEvent,
    sync: &SyncEngine,
    reconciler: &ReadStateReconciler,
    presenter: &AlertPresenter,
    attention: &AttentionSignal,
) {
    match event {
        PushEvent::NewNotification(notification) => {
            sync.apply_pushed(notification).await;
        }
        PushEvent::NotificationMarkedRead { id } => {
            reconciler.apply_remote_read(Some(std::slice::from_ref(&id)));
        }
        PushEvent::NotificationsMarkedRead { ids } => {
            reconciler.apply_remote_read(ids.as_deref());
        }
        PushEvent::PushNotification {
            title,
            body,
            notification_id,
        } => {
            if attention.level() == AttentionLevel::Background {
                presenter.present_system(&title, &body);
            } else {
                tracing::debug!(
                    "system notification suppressed while foreground id={notification_id:?}"
                );
            }
        }
    }
}
