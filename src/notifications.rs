use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::Serialize;
use tokio::{sync::Mutex, time::Instant};

use crate::{
    consts::{TOAST_ACTION_LABEL, TOAST_ACTION_TARGET},
    dedup::{AlertKey, DedupTracker},
    error::AlertError,
    model::Notification,
};

/// Where user-visible interrupts end up. Playback may legitimately fail
/// (autoplay policy, no audio device); that is reported, never panicked on.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn play_sound(&self) -> Result<(), AlertError>;

    fn show_toast(&self, toast: Toast);

    /// Out-of-band OS-level notification, used while the client is in the
    /// background.
    fn show_system_notification(&self, title: &str, body: &str);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToastAction {
    pub label: String,
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Toast {
    pub notification_id: String,
    pub title: String,
    pub message: String,
    pub action: ToastAction,
}

impl Toast {
    fn for_notification(notification: &Notification) -> Self {
        Self {
            notification_id: notification.id.clone(),
            title: notification.display_title().to_string(),
            message: notification.message.clone(),
            action: ToastAction {
                label: TOAST_ACTION_LABEL.to_string(),
                target: TOAST_ACTION_TARGET.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertDecision {
    /// No reminder metadata; listed silently.
    NotEligible,
    AlreadyAlerted,
    /// Another sound fired within the cooldown window; eligible next sync.
    CoolingDown,
    /// Sound could not play; eligible next sync.
    PlaybackFailed(AlertError),
    Presented,
}

struct PresenterState {
    dedup: DedupTracker,
    last_sound_at: Option<Instant>,
}

pub struct AlertPresenter {
    sink: Arc<dyn AlertSink>,
    cooldown: Duration,
    state: Mutex<PresenterState>,
}

impl AlertPresenter {
    pub fn new(sink: Arc<dyn AlertSink>, dedup: DedupTracker, cooldown: Duration) -> Self {
        Self {
            sink,
            cooldown,
            state: Mutex::new(PresenterState {
                dedup,
                last_sound_at: None,
            }),
        }
    }

    /// Decides whether `notification` interrupts the user. The whole decision,
    /// playback included, runs under one lock so two syncs cannot both pass
    /// the dedup check for the same key.
    pub async fn maybe_alert(&self, notification: &Notification) -> AlertDecision {
        let Some(key) = AlertKey::for_notification(notification) else {
            return AlertDecision::NotEligible;
        };

        let mut state = self.state.lock().await;
        if state.dedup.contains(&key) {
            return AlertDecision::AlreadyAlerted;
        }

        let now = Instant::now();
        if let Some(last) = state.last_sound_at {
            if now.saturating_duration_since(last) < self.cooldown {
                tracing::debug!(
                    "alert cooling down id={} since_last={:?}",
                    notification.id,
                    now.saturating_duration_since(last)
                );
                return AlertDecision::CoolingDown;
            }
        }

        if let Err(error) = self.sink.play_sound().await {
            tracing::debug!("alert sound failed id={}: {error}", notification.id);
            return AlertDecision::PlaybackFailed(error);
        }

        state.last_sound_at = Some(Instant::now());
        state.dedup.record(key);
        drop(state);

        tracing::info!(
            "alert presented id={} kind={:?}",
            notification.id,
            notification.kind
        );
        self.sink.show_toast(Toast::for_notification(notification));
        AlertDecision::Presented
    }

    pub fn present_system(&self, title: &str, body: &str) {
        self.sink.show_system_notification(title, body);
    }

    pub async fn has_alerted(&self, key: &AlertKey) -> bool {
        self.state.lock().await.dedup.contains(key)
    }
}
