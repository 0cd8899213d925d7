use serde::Serialize;

use crate::{
    model::AttentionLevel,
    poller::AdaptivePoller,
    stream::TransportManager,
    sync::SyncEngine,
};

#[derive(Debug, Serialize, Clone)]
pub struct RuntimeDiagnostics {
    pub connection_state: &'static str,
    pub attention: AttentionLevel,
    pub poll_interval_seconds: u64,
    pub last_connected_at: Option<u64>,
    pub last_stream_event_at: Option<u64>,
    pub last_sync_at: Option<u64>,
    pub cache_size: usize,
    pub unread_count: usize,
    pub stale_for_seconds: Option<u64>,
    pub flight_in_progress: bool,
    pub last_error: Option<String>,
    pub backoff_seconds: u64,
    pub reconnect_attempts: u64,
    pub push_gave_up: bool,
}

pub(crate) fn snapshot_runtime(
    transport: &TransportManager,
    sync: &SyncEngine,
    poller: &AdaptivePoller,
    attention: AttentionLevel,
) -> RuntimeDiagnostics {
    let stats = transport.stats();
    let status = sync.status();
    let entry = sync.entry();

    RuntimeDiagnostics {
        connection_state: transport.state().as_str(),
        attention,
        poll_interval_seconds: poller.current_interval().as_secs(),
        last_connected_at: stats.last_connected_at,
        last_stream_event_at: stats.last_event_at,
        last_sync_at: status.last_sync_at,
        cache_size: entry.notifications.len(),
        unread_count: entry.unread_count,
        stale_for_seconds: sync.stale_for_secs(),
        flight_in_progress: sync.guard().is_busy(),
        last_error: stats.last_error.or(status.error),
        backoff_seconds: stats.backoff_seconds,
        reconnect_attempts: stats.reconnect_attempts,
        push_gave_up: stats.gave_up,
    }
}
