//! Fetch-and-merge against the session cache. Poll responses and pushed
//! notifications end up in one id-unique list ordered by `created_at`
//! descending, and every refresh path goes through the single-flight guard
//! owned here. Results captured under an older session epoch are dropped.

use std::{
    cmp::Ordering,
    collections::HashSet,
    sync::{Arc, Mutex},
    time::Duration,
};

use chrono::Utc;
use tokio::{sync::watch, time::Instant};

use crate::{
    api::NotificationSource,
    cache::{CacheEntry, CacheStore},
    consts::{RESYNC_MAX_ATTEMPTS, RESYNC_RETRY_DELAY_MS},
    core::{lock, unix_now_secs},
    error::SourceError,
    guard::{FlightGuard, FlightPermit, Liveness, LivenessToken},
    model::{FetchResponse, Notification, NotificationView, Principal},
    notifications::{AlertDecision, AlertPresenter},
    retry::RetryPolicy,
    settings::EngineSettings,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Payload replaces the cached sequence.
    Full,
    /// Payload holds rows created after the watermark and is merged in.
    Incremental,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Applied {
        mode: SyncMode,
        received: usize,
        total: usize,
        alerts: usize,
    },
    /// Another fetch held the guard; nothing was sent.
    Skipped,
    /// The server did not recognise the principal; cache cleared.
    Unauthenticated,
    /// Transient failure; last good cache kept.
    Failed(SourceError),
    /// The session ended or changed while the request was in flight.
    Discarded,
    NotStarted,
}

#[derive(Debug, Default, Clone)]
pub(crate) struct SyncStatus {
    pub(crate) loading: bool,
    pub(crate) error: Option<String>,
    pub(crate) last_sync_at: Option<u64>,
    pub(crate) last_sync_mode: Option<SyncMode>,
}

pub fn notification_cmp(a: &Notification, b: &Notification) -> Ordering {
    b.created_at
        .cmp(&a.created_at)
        .then_with(|| b.id.cmp(&a.id))
}

/// Drops repeated ids (first occurrence wins), sorts newest first and caps
/// the length. Entries past the cap leave the cache only.
pub fn normalize(items: Vec<Notification>, limit: usize) -> Vec<Notification> {
    let mut seen = HashSet::with_capacity(items.len());
    let mut normalized: Vec<Notification> = items
        .into_iter()
        .filter(|item| seen.insert(item.id.clone()))
        .collect();
    normalized.sort_by(notification_cmp);
    normalized.truncate(limit);
    normalized
}

/// Payload items first, then cached items whose id the payload does not
/// carry, re-sorted and capped. Merging the same payload twice is a no-op.
pub fn merge_incremental(
    cached: &[Notification],
    payload: Vec<Notification>,
    limit: usize,
) -> Vec<Notification> {
    let mut merged = payload;
    merged.extend(cached.iter().cloned());
    normalize(merged, limit)
}

pub struct SyncEngine {
    source: Arc<dyn NotificationSource>,
    presenter: Arc<AlertPresenter>,
    cache: Mutex<CacheStore>,
    status: Mutex<SyncStatus>,
    guard: FlightGuard,
    liveness: Liveness,
    view_tx: watch::Sender<NotificationView>,
    policy: RetryPolicy,
    cache_limit: usize,
}

impl SyncEngine {
    pub fn new(
        settings: &EngineSettings,
        source: Arc<dyn NotificationSource>,
        presenter: Arc<AlertPresenter>,
    ) -> Self {
        let (view_tx, _) = watch::channel(NotificationView::default());
        Self {
            source,
            presenter,
            cache: Mutex::new(CacheStore::new(settings.cache_ttl())),
            status: Mutex::new(SyncStatus::default()),
            guard: FlightGuard::new(),
            liveness: Liveness::default(),
            view_tx,
            policy: RetryPolicy::for_requests(settings),
            cache_limit: settings.cache_limit(),
        }
    }

    pub fn guard(&self) -> &FlightGuard {
        &self.guard
    }

    pub fn liveness(&self) -> &Liveness {
        &self.liveness
    }

    pub fn source(&self) -> &Arc<dyn NotificationSource> {
        &self.source
    }

    pub fn subscribe(&self) -> watch::Receiver<NotificationView> {
        self.view_tx.subscribe()
    }

    pub fn view(&self) -> NotificationView {
        self.view_tx.borrow().clone()
    }

    pub fn entry(&self) -> CacheEntry {
        lock(&self.cache).entry().clone()
    }

    pub fn principal(&self) -> Option<Principal> {
        lock(&self.cache).principal().cloned()
    }

    pub(crate) fn status(&self) -> SyncStatus {
        lock(&self.status).clone()
    }

    pub fn is_stale(&self) -> bool {
        lock(&self.cache).is_stale(Instant::now())
    }

    pub(crate) fn stale_for_secs(&self) -> Option<u64> {
        lock(&self.cache)
            .stale_for(Instant::now())
            .map(|elapsed| elapsed.as_secs())
    }

    /// Opens the cache for `principal`. A different principal (or role)
    /// drops the old content and retires in-flight results.
    pub fn bind(&self, principal: &Principal) -> bool {
        let changed = {
            let mut cache = lock(&self.cache);
            let previous = cache.principal().cloned();
            cache.bind(principal);
            previous.as_ref() != Some(principal)
        };
        if changed {
            self.liveness.invalidate();
            *lock(&self.status) = SyncStatus::default();
            self.publish();
        }
        changed
    }

    /// Logout or teardown: forget everything and retire in-flight results.
    pub fn reset(&self) {
        self.liveness.invalidate();
        lock(&self.cache).reset();
        *lock(&self.status) = SyncStatus::default();
        self.publish();
    }

    /// Full when nothing usable is cached, incremental otherwise.
    pub fn refresh_mode(&self) -> SyncMode {
        let cache = lock(&self.cache);
        if cache.last_fetch_time().is_none() || cache.is_stale(Instant::now()) {
            SyncMode::Full
        } else {
            SyncMode::Incremental
        }
    }

    /// Fetches and merges unless another fetch already holds the guard.
    pub async fn pull(&self, mode: SyncMode, with_alerts: bool) -> SyncOutcome {
        let Some(permit) = self.guard.try_acquire() else {
            tracing::debug!("sync skipped: fetch already in flight");
            return SyncOutcome::Skipped;
        };
        self.pull_with(&permit, mode, with_alerts).await
    }

    /// [`SyncEngine::pull`] that waits out a fetch already in flight instead
    /// of dropping the request. Used where the result must reflect a point in
    /// time the running fetch may predate, such as a push reconnect.
    pub async fn pull_when_free(&self, mode: SyncMode, with_alerts: bool) -> SyncOutcome {
        let delay = Duration::from_millis(RESYNC_RETRY_DELAY_MS);
        for _ in 0..RESYNC_MAX_ATTEMPTS {
            if let Some(permit) = self.guard.try_acquire() {
                return self.pull_with(&permit, mode, with_alerts).await;
            }
            tokio::time::sleep(delay).await;
        }
        tracing::info!("sync dropped: fetch guard stayed busy mode={mode:?}");
        SyncOutcome::Skipped
    }

    /// Same as [`SyncEngine::pull`] for a caller that already holds the guard.
    pub async fn pull_with(
        &self,
        _permit: &FlightPermit,
        mode: SyncMode,
        with_alerts: bool,
    ) -> SyncOutcome {
        let (principal, since) = {
            let cache = lock(&self.cache);
            let Some(principal) = cache.principal().cloned() else {
                return SyncOutcome::NotStarted;
            };
            (principal, cache.last_fetch_time())
        };
        let (mode, since) = match (mode, since) {
            (SyncMode::Incremental, Some(since)) => (SyncMode::Incremental, Some(since)),
            _ => (SyncMode::Full, None),
        };

        let token = self.liveness.token();
        self.set_loading(true);
        tracing::debug!("sync start principal={} mode={mode:?}", principal.id);

        let source = &self.source;
        let principal_ref = &principal;
        let result = self
            .policy
            .run("fetch notifications", move || {
                source.fetch_notifications(principal_ref, since)
            })
            .await;

        if !self.liveness.is_current(token) {
            tracing::debug!("sync result discarded: session changed mid-request");
            return SyncOutcome::Discarded;
        }

        match result {
            Ok(response) => self.apply_fetched(token, response, mode, with_alerts).await,
            Err(SourceError::Unauthenticated) => {
                self.clear_unauthenticated();
                SyncOutcome::Unauthenticated
            }
            Err(error) => {
                self.record_failure(&error);
                SyncOutcome::Failed(error)
            }
        }
    }

    async fn apply_fetched(
        &self,
        token: LivenessToken,
        response: FetchResponse,
        mode: SyncMode,
        with_alerts: bool,
    ) -> SyncOutcome {
        let received = response.notifications.len();
        let watermark = response.server_time.unwrap_or_else(Utc::now);
        let total = {
            let mut cache = lock(&self.cache);
            let merged = match mode {
                SyncMode::Full => normalize(response.notifications.clone(), self.cache_limit),
                SyncMode::Incremental => merge_incremental(
                    &cache.entry().notifications,
                    response.notifications.clone(),
                    self.cache_limit,
                ),
            };
            cache.store_fetched(merged, watermark, Instant::now());
            cache.entry().notifications.len()
        };
        {
            let mut status = lock(&self.status);
            status.loading = false;
            status.error = None;
            status.last_sync_at = Some(unix_now_secs());
            status.last_sync_mode = Some(mode);
        }
        self.publish();
        tracing::debug!(
            "sync applied mode={mode:?} received={received} total={total} server_unread={}",
            response.unread_count
        );

        let alerts = if with_alerts {
            self.evaluate_alerts(token).await
        } else {
            0
        };

        SyncOutcome::Applied {
            mode,
            received,
            total,
            alerts,
        }
    }

    /// Merges a notification delivered over the push channel. Returns `true`
    /// when the id was not cached before.
    pub async fn apply_pushed(&self, notification: Notification) -> bool {
        let token = self.liveness.token();
        let is_new = {
            let mut cache = lock(&self.cache);
            if cache.principal().is_none() {
                return false;
            }
            let is_new = !cache.entry().contains(&notification.id);
            let merged = merge_incremental(
                &cache.entry().notifications,
                vec![notification.clone()],
                self.cache_limit,
            );
            cache.store_merged(merged);
            is_new
        };
        self.publish();
        tracing::debug!("push merged id={} new={is_new}", notification.id);
        self.evaluate_alerts(token).await;
        is_new
    }

    /// Offers every unread cached reminder to the presenter, so one whose
    /// sound was blocked or cooling down gets another chance on any later
    /// merge, not only when a payload happens to carry it again.
    async fn evaluate_alerts(&self, token: LivenessToken) -> usize {
        let candidates = lock(&self.cache).entry().alert_candidates();
        let mut presented = 0;
        for notification in &candidates {
            if !self.liveness.is_current(token) {
                break;
            }
            // Playback awaits; the user may have read or deleted it meanwhile.
            let still_unread = lock(&self.cache).entry().is_unread(&notification.id);
            if !still_unread {
                continue;
            }
            if self.presenter.maybe_alert(notification).await == AlertDecision::Presented {
                presented += 1;
            }
        }
        presented
    }

    /// Applies `update` to the cache unless the session moved on since
    /// `token` was taken, then republishes.
    pub(crate) fn mutate_cache<R>(
        &self,
        token: LivenessToken,
        update: impl FnOnce(&mut CacheStore) -> R,
    ) -> Option<R> {
        if !self.liveness.is_current(token) {
            return None;
        }
        let result = {
            let mut cache = lock(&self.cache);
            if cache.principal().is_none() {
                return None;
            }
            update(&mut cache)
        };
        self.publish();
        Some(result)
    }

    pub(crate) fn clear_unauthenticated(&self) {
        tracing::info!("principal not recognized; clearing notification cache");
        lock(&self.cache).clear();
        {
            let mut status = lock(&self.status);
            status.loading = false;
            status.error = None;
        }
        self.publish();
    }

    pub(crate) fn record_failure(&self, error: &SourceError) {
        tracing::warn!("notification refresh failed: {error}");
        {
            let mut status = lock(&self.status);
            status.loading = false;
            status.error = Some(error.to_string());
        }
        self.publish();
    }

    fn set_loading(&self, loading: bool) {
        lock(&self.status).loading = loading;
        self.publish();
    }

    fn publish(&self) {
        let view = {
            let cache = lock(&self.cache);
            let status = lock(&self.status);
            NotificationView {
                notifications: cache.entry().notifications.clone(),
                unread_count: cache.entry().unread_count,
                loading: status.loading,
                error: status.error.clone(),
            }
        };
        self.view_tx.send_replace(view);
    }
}
