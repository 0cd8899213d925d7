#![allow(dead_code)]

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::mpsc;

use inventory_notify::{
    notifications::AlertPresenter, dedup::DedupTracker, AlertError, AlertSink, EngineSettings,
    FetchResponse, Notification, NotificationKind, NotificationSource, Principal, PushCommand,
    PushConnector, PushEvent, PushSession, ReminderRef, SourceError, Toast, TriggerResponse,
};

pub fn at(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 9, minute, 0).unwrap()
}

pub fn note(id: &str, minute: u32, is_read: bool) -> Notification {
    Notification {
        id: id.to_string(),
        kind: NotificationKind::GeneralInfo,
        title: None,
        message: format!("notification {id}"),
        is_read,
        created_at: at(minute),
        reminder: None,
    }
}

pub fn reminder(id: &str, minute: u32, due_date: &str) -> Notification {
    Notification {
        kind: NotificationKind::RentalDueReminder,
        reminder: Some(ReminderRef {
            due_date: due_date.to_string(),
            kind: "rental_due".to_string(),
        }),
        ..note(id, minute, false)
    }
}

pub fn ids(items: &[Notification]) -> Vec<&str> {
    items.iter().map(|n| n.id.as_str()).collect()
}

pub fn principal() -> Principal {
    Principal::new("user-1", Some("customer".to_string()))
}

pub fn settings() -> EngineSettings {
    EngineSettings {
        base_url: "http://inventory.test/api".to_string(),
        principal_id: Some("user-1".to_string()),
        request_retries: 0,
        alert_cooldown_ms: 0,
        push_enabled: false,
        ..EngineSettings::default()
    }
}

pub fn response(items: Vec<Notification>, server_minute: u32) -> FetchResponse {
    let unread_count = items.iter().filter(|n| !n.is_read).count();
    FetchResponse {
        notifications: items,
        unread_count,
        server_time: Some(at(server_minute)),
    }
}

/// Scripted notification source. Queued fetch results are served in order,
/// after which an empty response is returned.
#[derive(Default)]
pub struct MockSource {
    fetches: Mutex<VecDeque<Result<FetchResponse, SourceError>>>,
    triggers: Mutex<VecDeque<Result<TriggerResponse, SourceError>>>,
    mutation_error: Mutex<Option<SourceError>>,
    pub fetch_calls: AtomicUsize,
    pub trigger_calls: AtomicUsize,
    pub since: Mutex<Vec<Option<DateTime<Utc>>>>,
    pub mutations: Mutex<Vec<String>>,
}

impl MockSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn queue_fetch(&self, result: Result<FetchResponse, SourceError>) {
        self.fetches.lock().unwrap().push_back(result);
    }

    pub fn queue_trigger(&self, result: Result<TriggerResponse, SourceError>) {
        self.triggers.lock().unwrap().push_back(result);
    }

    pub fn fail_mutations(&self, error: Option<SourceError>) {
        *self.mutation_error.lock().unwrap() = error;
    }

    pub fn fetch_count(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn mutations(&self) -> Vec<String> {
        self.mutations.lock().unwrap().clone()
    }

    fn mutate(&self, label: String) -> Result<(), SourceError> {
        if let Some(error) = self.mutation_error.lock().unwrap().clone() {
            return Err(error);
        }
        self.mutations.lock().unwrap().push(label);
        Ok(())
    }
}

#[async_trait]
impl NotificationSource for MockSource {
    async fn fetch_notifications(
        &self,
        _principal: &Principal,
        since: Option<DateTime<Utc>>,
    ) -> Result<FetchResponse, SourceError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.since.lock().unwrap().push(since);
        // A real request suspends; let competing tasks observe the guard.
        tokio::task::yield_now().await;
        let next = self.fetches.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(FetchResponse::default()))
    }

    async fn mark_notification_read(&self, id: &str) -> Result<(), SourceError> {
        self.mutate(format!("read:{id}"))
    }

    async fn mark_all_notifications_read(&self, principal: &Principal) -> Result<(), SourceError> {
        self.mutate(format!("read-all:{}", principal.id))
    }

    async fn delete_notification(&self, id: &str) -> Result<(), SourceError> {
        self.mutate(format!("delete:{id}"))
    }

    async fn delete_all_read_notifications(
        &self,
        principal: &Principal,
    ) -> Result<(), SourceError> {
        self.mutate(format!("delete-read:{}", principal.id))
    }

    async fn trigger_reminder_computation(
        &self,
        _force: bool,
    ) -> Result<TriggerResponse, SourceError> {
        self.trigger_calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        let next = self.triggers.lock().unwrap().pop_front();
        next.unwrap_or(Ok(TriggerResponse { created: 0 }))
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub sounds: AtomicUsize,
    pub toasts: Mutex<Vec<Toast>>,
    pub system: Mutex<Vec<(String, String)>>,
    blocked: Mutex<bool>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn block_playback(&self, blocked: bool) {
        *self.blocked.lock().unwrap() = blocked;
    }

    pub fn sound_count(&self) -> usize {
        self.sounds.load(Ordering::SeqCst)
    }

    pub fn toast_ids(&self) -> Vec<String> {
        self.toasts
            .lock()
            .unwrap()
            .iter()
            .map(|toast| toast.notification_id.clone())
            .collect()
    }
}

#[async_trait]
impl AlertSink for RecordingSink {
    async fn play_sound(&self) -> Result<(), AlertError> {
        if *self.blocked.lock().unwrap() {
            return Err(AlertError::Blocked("autoplay".to_string()));
        }
        self.sounds.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn show_toast(&self, toast: Toast) {
        self.toasts.lock().unwrap().push(toast);
    }

    fn show_system_notification(&self, title: &str, body: &str) {
        self.system
            .lock()
            .unwrap()
            .push((title.to_string(), body.to_string()));
    }
}

pub fn presenter(sink: Arc<RecordingSink>) -> Arc<AlertPresenter> {
    Arc::new(AlertPresenter::new(
        sink,
        DedupTracker::in_memory(),
        Duration::ZERO,
    ))
}

/// Handle for driving one fake push session from a test.
pub struct PushHandle {
    pub events: mpsc::UnboundedSender<Result<PushEvent, SourceError>>,
    pub commands: mpsc::UnboundedReceiver<PushCommand>,
}

/// Connector that refuses connections until a session is queued with
/// [`FakeConnector::accept_next`].
#[derive(Default)]
pub struct FakeConnector {
    sessions: Mutex<VecDeque<FakeSession>>,
    pub attempts: AtomicUsize,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn accept_next(&self) -> PushHandle {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        self.sessions.lock().unwrap().push_back(FakeSession {
            events: event_rx,
            commands: command_tx,
        });
        PushHandle {
            events: event_tx,
            commands: command_rx,
        }
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PushConnector for FakeConnector {
    async fn connect(&self) -> Result<Box<dyn PushSession>, SourceError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let session = self.sessions.lock().unwrap().pop_front();
        match session {
            Some(session) => Ok(Box::new(session)),
            None => Err(SourceError::Transport("connection refused".to_string())),
        }
    }
}

struct FakeSession {
    events: mpsc::UnboundedReceiver<Result<PushEvent, SourceError>>,
    commands: mpsc::UnboundedSender<PushCommand>,
}

#[async_trait]
impl PushSession for FakeSession {
    async fn send(&mut self, command: PushCommand) -> Result<(), SourceError> {
        self.commands
            .send(command)
            .map_err(|_| SourceError::Transport("peer gone".to_string()))
    }

    async fn next_event(&mut self) -> Option<Result<PushEvent, SourceError>> {
        self.events.recv().await
    }

    async fn close(&mut self) {}
}

/// Lets spawned tasks run until they are all parked again.
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}
