//! Session-scoped notification cache.
//!
//! Holds the last known notification set for one principal together with the
//! incremental-fetch watermark. The store never reorders its sequence; the
//! merge in [`crate::sync`] is the only place that establishes ordering.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use crate::model::{Notification, Principal};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheEntry {
    pub notifications: Vec<Notification>,
    pub unread_count: usize,
    /// High-water mark for incremental fetches. Only ever moves forward.
    pub last_fetch_time: Option<DateTime<Utc>>,
}

impl CacheEntry {
    fn recount(&mut self) {
        self.unread_count = self.notifications.iter().filter(|n| !n.is_read).count();
    }

    fn advance_watermark(&mut self, at: DateTime<Utc>) {
        self.last_fetch_time = Some(match self.last_fetch_time {
            Some(current) if current > at => current,
            _ => at,
        });
    }

    pub fn contains(&self, id: &str) -> bool {
        self.notifications.iter().any(|n| n.id == id)
    }

    pub fn is_unread(&self, id: &str) -> bool {
        self.notifications.iter().any(|n| n.id == id && !n.is_read)
    }

    /// Unread reminders, newest first. Whether each one still needs a sound
    /// is up to the alert dedup.
    pub fn alert_candidates(&self) -> Vec<Notification> {
        self.notifications
            .iter()
            .filter(|n| !n.is_read && n.reminder.is_some())
            .cloned()
            .collect()
    }
}

#[derive(Debug)]
pub struct CacheStore {
    principal: Option<Principal>,
    entry: CacheEntry,
    fetched_at: Option<Instant>,
    ttl: Duration,
}

impl CacheStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            principal: None,
            entry: CacheEntry::default(),
            fetched_at: None,
            ttl,
        }
    }

    /// Binds the store to `principal`. Returns `true` when the previous
    /// content belonged to someone else and was dropped.
    pub fn bind(&mut self, principal: &Principal) -> bool {
        if self.principal.as_ref() == Some(principal) {
            return false;
        }
        let had_owner = self.principal.is_some();
        self.principal = Some(principal.clone());
        self.clear();
        had_owner
    }

    pub fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    /// Logout: forget both the owner and the content.
    pub fn reset(&mut self) {
        self.principal = None;
        self.clear();
    }

    /// Drops the content but keeps the binding.
    pub fn clear(&mut self) {
        self.entry = CacheEntry::default();
        self.fetched_at = None;
    }

    pub fn entry(&self) -> &CacheEntry {
        &self.entry
    }

    pub fn last_fetch_time(&self) -> Option<DateTime<Utc>> {
        self.entry.last_fetch_time
    }

    pub fn is_stale(&self, now: Instant) -> bool {
        match self.fetched_at {
            Some(at) => now.saturating_duration_since(at) >= self.ttl,
            None => true,
        }
    }

    pub fn stale_for(&self, now: Instant) -> Option<Duration> {
        self.fetched_at
            .map(|at| now.saturating_duration_since(at))
    }

    /// Stores an already merged and ordered sequence from a fetch.
    pub(crate) fn store_fetched(
        &mut self,
        notifications: Vec<Notification>,
        watermark: DateTime<Utc>,
        now: Instant,
    ) {
        self.entry.notifications = notifications;
        self.entry.recount();
        self.entry.advance_watermark(watermark);
        self.fetched_at = Some(now);
    }

    /// Stores an already merged sequence that did not come from a fetch
    /// (a pushed notification). Freshness and watermark are left alone.
    pub(crate) fn store_merged(&mut self, notifications: Vec<Notification>) {
        self.entry.notifications = notifications;
        self.entry.recount();
    }

    pub(crate) fn mark_read(&mut self, id: &str) -> bool {
        let changed = match self.entry.notifications.iter_mut().find(|n| n.id == id) {
            Some(notification) if !notification.is_read => {
                notification.is_read = true;
                true
            }
            _ => false,
        };
        self.entry.recount();
        changed
    }

    pub(crate) fn mark_many_read(&mut self, ids: &[String]) -> usize {
        let mut changed = 0;
        for notification in self.entry.notifications.iter_mut() {
            if !notification.is_read && ids.iter().any(|id| *id == notification.id) {
                notification.is_read = true;
                changed += 1;
            }
        }
        self.entry.recount();
        changed
    }

    pub(crate) fn mark_all_read(&mut self) -> usize {
        let mut changed = 0;
        for notification in self.entry.notifications.iter_mut().filter(|n| !n.is_read) {
            notification.is_read = true;
            changed += 1;
        }
        self.entry.recount();
        changed
    }

    pub(crate) fn remove(&mut self, id: &str) -> Option<Notification> {
        let position = self.entry.notifications.iter().position(|n| n.id == id)?;
        let removed = self.entry.notifications.remove(position);
        self.entry.recount();
        Some(removed)
    }

    pub(crate) fn remove_read(&mut self) -> usize {
        let before = self.entry.notifications.len();
        self.entry.notifications.retain(|n| !n.is_read);
        self.entry.recount();
        before - self.entry.notifications.len()
    }
}
