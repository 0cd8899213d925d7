//! Notification delivery and deduplication for the inventory client.
//!
//! [`NotificationEngine`] keeps a capped, newest-first cache of a principal's
//! notifications in step with the server, preferring a websocket push channel
//! and falling back to adaptive polling. Reminder notifications raise a sound
//! and toast at most once per due period.

pub mod api;
pub mod cache;
mod consts;
mod core;
pub mod dedup;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod guard;
pub mod model;
pub mod notifications;
pub mod poller;
pub mod reconciler;
pub mod reminders;
pub mod retry;
pub mod settings;
pub mod stream;
pub mod sync;

pub use crate::{
    api::{HttpNotificationSource, NotificationSource},
    diagnostics::RuntimeDiagnostics,
    engine::NotificationEngine,
    error::{AlertError, EngineError, SourceError},
    model::{
        AttentionLevel, ConnectionState, FetchResponse, Notification, NotificationKind,
        NotificationView, Principal, PushCommand, PushEvent, ReminderRef, TriggerResponse,
    },
    notifications::{AlertSink, Toast},
    reminders::TriggerOutcome,
    settings::{read_settings, EngineSettings},
    stream::{PushConnector, PushSession, WebSocketConnector},
    sync::{SyncMode, SyncOutcome},
};
