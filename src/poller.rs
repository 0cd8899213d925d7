//! Adaptive polling, active only while the transport is in `Polling`.
//!
//! The cadence follows the attention signal: the baseline interval while the
//! user is interacting, 5x once they have been idle past the threshold, 10x
//! while the client is in the background. Polling never stops entirely so
//! due-date alerts still surface eventually.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use tokio::{sync::watch, time::Instant};

use crate::{
    consts::{BACKGROUND_POLL_MULTIPLIER, INACTIVE_POLL_MULTIPLIER},
    core::lock,
    model::{AttentionLevel, ConnectionState},
    settings::EngineSettings,
    sync::{SyncEngine, SyncOutcome},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttentionState {
    pub visible: bool,
    pub last_interaction: Instant,
}

impl AttentionState {
    pub fn level(&self, now: Instant, inactivity_threshold: Duration) -> AttentionLevel {
        if !self.visible {
            AttentionLevel::Background
        } else if now.saturating_duration_since(self.last_interaction) < inactivity_threshold {
            AttentionLevel::Active
        } else {
            AttentionLevel::Inactive
        }
    }
}

/// Attention input fed by the host (visibility and pointer/key activity).
pub struct AttentionSignal {
    tx: watch::Sender<AttentionState>,
    inactivity_threshold: Duration,
}

impl AttentionSignal {
    pub fn new(inactivity_threshold: Duration) -> Self {
        let (tx, _) = watch::channel(AttentionState {
            visible: true,
            last_interaction: Instant::now(),
        });
        Self {
            tx,
            inactivity_threshold,
        }
    }

    pub fn level(&self) -> AttentionLevel {
        self.tx
            .borrow()
            .level(Instant::now(), self.inactivity_threshold)
    }

    pub fn subscribe(&self) -> watch::Receiver<AttentionState> {
        self.tx.subscribe()
    }

    /// Subscribers are woken only when the level actually changes.
    pub fn record_interaction(&self) {
        let threshold = self.inactivity_threshold;
        self.tx.send_if_modified(|state| {
            let now = Instant::now();
            let before = state.level(now, threshold);
            state.last_interaction = now;
            state.level(now, threshold) != before
        });
    }

    /// Returns `true` when this call made a hidden client visible again.
    pub fn set_visible(&self, visible: bool) -> bool {
        let mut regained = false;
        self.tx.send_if_modified(|state| {
            if state.visible == visible {
                return false;
            }
            regained = visible;
            state.visible = visible;
            if visible {
                state.last_interaction = Instant::now();
            }
            true
        });
        regained
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSchedule {
    base: Duration,
}

impl PollSchedule {
    pub fn new(base: Duration) -> Self {
        Self { base }
    }

    pub fn interval_for(&self, level: AttentionLevel) -> Duration {
        match level {
            AttentionLevel::Active => self.base,
            AttentionLevel::Inactive => self.base.saturating_mul(INACTIVE_POLL_MULTIPLIER),
            AttentionLevel::Background => self.base.saturating_mul(BACKGROUND_POLL_MULTIPLIER),
        }
    }
}

pub struct AdaptivePoller {
    sync: Arc<SyncEngine>,
    attention: Arc<AttentionSignal>,
    schedule: PollSchedule,
    current_interval: Mutex<Duration>,
}

impl AdaptivePoller {
    pub fn new(
        settings: &EngineSettings,
        sync: Arc<SyncEngine>,
        attention: Arc<AttentionSignal>,
    ) -> Self {
        let schedule = PollSchedule::new(settings.poll_base_interval());
        Self {
            sync,
            attention,
            schedule,
            current_interval: Mutex::new(schedule.interval_for(AttentionLevel::Active)),
        }
    }

    pub fn current_interval(&self) -> Duration {
        *lock(&self.current_interval)
    }

    /// One scheduled tick. Dropped (not queued) if a fetch is in flight.
    pub async fn tick(&self) -> SyncOutcome {
        let mode = self.sync.refresh_mode();
        self.sync.pull(mode, true).await
    }

    /// Runs until `stop_rx` flips to `true`. Ticks only fire while the
    /// transport reports `Polling`; the interval is re-evaluated on every
    /// tick and on every attention change.
    pub async fn run(
        self: Arc<Self>,
        mut transport_rx: watch::Receiver<ConnectionState>,
        mut stop_rx: watch::Receiver<bool>,
    ) {
        let mut attention_rx = self.attention.subscribe();
        let mut last_tick = Instant::now();

        loop {
            let level = self.attention.level();
            let interval = self.schedule.interval_for(level);
            {
                let mut current = lock(&self.current_interval);
                if *current != interval {
                    tracing::debug!("poll interval now {interval:?} attention={level:?}");
                    *current = interval;
                }
            }
            let deadline = last_tick + interval;

            tokio::select! {
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        break;
                    }
                }
                changed = attention_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                changed = transport_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    if *transport_rx.borrow() == ConnectionState::Polling {
                        // The transport pulls once itself when it falls back.
                        last_tick = Instant::now();
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    last_tick = Instant::now();
                    let polling = *transport_rx.borrow() == ConnectionState::Polling;
                    if polling {
                        let outcome = self.tick().await;
                        tracing::trace!("poll tick outcome={outcome:?}");
                    }
                }
            }
        }
        tracing::debug!("poller stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_scales_with_attention() {
        let schedule = PollSchedule::new(Duration::from_secs(30));
        assert_eq!(
            schedule.interval_for(AttentionLevel::Active),
            Duration::from_secs(30)
        );
        assert_eq!(
            schedule.interval_for(AttentionLevel::Inactive),
            Duration::from_secs(150)
        );
        assert_eq!(
            schedule.interval_for(AttentionLevel::Background),
            Duration::from_secs(300)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn idle_user_becomes_inactive_then_active_again() {
        let signal = AttentionSignal::new(Duration::from_secs(120));
        assert_eq!(signal.level(), AttentionLevel::Active);

        tokio::time::advance(Duration::from_secs(119)).await;
        assert_eq!(signal.level(), AttentionLevel::Active);
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(signal.level(), AttentionLevel::Inactive);

        let mut rx = signal.subscribe();
        rx.borrow_and_update();
        signal.record_interaction();
        assert!(rx.has_changed().unwrap());
        assert_eq!(signal.level(), AttentionLevel::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn interaction_without_level_change_does_not_wake() {
        let signal = AttentionSignal::new(Duration::from_secs(120));
        let mut rx = signal.subscribe();
        rx.borrow_and_update();
        signal.record_interaction();
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn hidden_client_is_background_regardless_of_activity() {
        let signal = AttentionSignal::new(Duration::from_secs(120));
        assert!(!signal.set_visible(false));
        signal.record_interaction();
        assert_eq!(signal.level(), AttentionLevel::Background);
        assert!(signal.set_visible(true));
        assert!(!signal.set_visible(true));
        assert_eq!(signal.level(), AttentionLevel::Active);
    }
}
