use std::{sync::Arc, time::Duration};

use tokio::sync::watch;

use crate::{
    error::SourceError,
    retry::RetryPolicy,
    settings::EngineSettings,
    sync::{SyncEngine, SyncOutcome},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// A fetch or another trigger held the guard.
    Skipped,
    /// The server reported no new reminders; the cache was not touched.
    NothingDue,
    Created { created: u32, sync: SyncOutcome },
    Unauthenticated,
    Failed(SourceError),
    Discarded,
    NotStarted,
}

/// Asks the server to materialise due reminders on a fixed cadence and
/// folds new ones through the Sync Engine with alerts enabled.
pub struct ReminderCoordinator {
    sync: Arc<SyncEngine>,
    policy: RetryPolicy,
    cadence: Duration,
}

impl ReminderCoordinator {
    pub fn new(settings: &EngineSettings, sync: Arc<SyncEngine>) -> Self {
        Self {
            sync,
            policy: RetryPolicy::for_requests(settings),
            cadence: settings.reminder_interval(),
        }
    }

    pub async fn trigger(&self, force: bool) -> TriggerOutcome {
        if self.sync.principal().is_none() {
            return TriggerOutcome::NotStarted;
        }
        let Some(permit) = self.sync.guard().try_acquire() else {
            tracing::debug!("reminder trigger skipped: fetch already in flight");
            return TriggerOutcome::Skipped;
        };

        let token = self.sync.liveness().token();
        let source = self.sync.source();
        let result = self
            .policy
            .run("trigger reminders", move || {
                source.trigger_reminder_computation(force)
            })
            .await;

        if !self.sync.liveness().is_current(token) {
            return TriggerOutcome::Discarded;
        }

        match result {
            Ok(response) if response.created == 0 => {
                tracing::debug!("reminder trigger force={force}: nothing due");
                TriggerOutcome::NothingDue
            }
            Ok(response) => {
                tracing::info!(
                    "reminder trigger force={force} created={}",
                    response.created
                );
                let mode = self.sync.refresh_mode();
                let sync = self.sync.pull_with(&permit, mode, true).await;
                TriggerOutcome::Created {
                    created: response.created,
                    sync,
                }
            }
            Err(SourceError::Unauthenticated) => {
                self.sync.clear_unauthenticated();
                TriggerOutcome::Unauthenticated
            }
            Err(error) => {
                self.sync.record_failure(&error);
                TriggerOutcome::Failed(error)
            }
        }
    }

    /// Runs until `stop_rx` flips to `true`. Independent of the transport
    /// state: this produces new work rather than delivering it.
    pub async fn run(self: Arc<Self>, mut stop_rx: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.cadence);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        interval.tick().await;

        loop {
            tokio::select! {
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    let outcome = self.trigger(false).await;
                    tracing::trace!("scheduled reminder trigger outcome={outcome:?}");
                }
            }
        }
        tracing::debug!("reminder coordinator stopped");
    }
}
