use std::sync::Arc;

use crate::{
    error::{EngineError, SourceError},
    retry::RetryPolicy,
    settings::EngineSettings,
    sync::SyncEngine,
};

/// Read/delete mutations. The server is asked first and the cache changes
/// only after it confirms, so a failure needs no rollback.
pub struct ReadStateReconciler {
    sync: Arc<SyncEngine>,
    policy: RetryPolicy,
}

impl ReadStateReconciler {
    pub fn new(settings: &EngineSettings, sync: Arc<SyncEngine>) -> Self {
        Self {
            sync,
            policy: RetryPolicy::for_mutations(settings),
        }
    }

    pub async fn mark_read(&self, id: &str) -> Result<(), EngineError> {
        self.sync.principal().ok_or(EngineError::NotStarted)?;
        let token = self.sync.liveness().token();
        let source = self.sync.source();
        self.policy
            .run("mark read", move || source.mark_notification_read(id))
            .await
            .map_err(|error| mutation_failed("mark_read", error))?;

        self.sync.mutate_cache(token, |cache| cache.mark_read(id));
        tracing::debug!("notification marked read id={id}");
        Ok(())
    }

    pub async fn mark_all_read(&self) -> Result<(), EngineError> {
        let principal = self.sync.principal().ok_or(EngineError::NotStarted)?;
        let token = self.sync.liveness().token();
        let source = self.sync.source();
        let principal_ref = &principal;
        self.policy
            .run("mark all read", move || {
                source.mark_all_notifications_read(principal_ref)
            })
            .await
            .map_err(|error| mutation_failed("mark_all_read", error))?;

        let changed = self.sync.mutate_cache(token, |cache| cache.mark_all_read());
        tracing::debug!("all notifications marked read changed={changed:?}");
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> Result<(), EngineError> {
        self.sync.principal().ok_or(EngineError::NotStarted)?;
        let token = self.sync.liveness().token();
        let source = self.sync.source();
        self.policy
            .run("delete", move || source.delete_notification(id))
            .await
            .map_err(|error| mutation_failed("delete", error))?;

        self.sync.mutate_cache(token, |cache| cache.remove(id));
        tracing::debug!("notification deleted id={id}");
        Ok(())
    }

    pub async fn delete_all_read(&self) -> Result<(), EngineError> {
        let principal = self.sync.principal().ok_or(EngineError::NotStarted)?;
        let token = self.sync.liveness().token();
        let source = self.sync.source();
        let principal_ref = &principal;
        self.policy
            .run("delete read", move || {
                source.delete_all_read_notifications(principal_ref)
            })
            .await
            .map_err(|error| mutation_failed("delete_all_read", error))?;

        let removed = self.sync.mutate_cache(token, |cache| cache.remove_read());
        tracing::debug!("read notifications deleted removed={removed:?}");
        Ok(())
    }

    /// A read performed elsewhere, reported over the push channel. `None`
    /// means every notification.
    pub fn apply_remote_read(&self, ids: Option<&[String]>) {
        let token = self.sync.liveness().token();
        let changed = self.sync.mutate_cache(token, |cache| match ids {
            Some(ids) => cache.mark_many_read(ids),
            None => cache.mark_all_read(),
        });
        tracing::debug!("remote read applied changed={changed:?}");
    }
}

fn mutation_failed(operation: &'static str, source: SourceError) -> EngineError {
    tracing::warn!("{operation} failed: {source}");
    EngineError::Mutation { operation, source }
}
