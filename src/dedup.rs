//! Record of reminder alerts that have already been presented.
//!
//! A key is written only after a sound actually played, and never changes
//! afterwards. When a store path is configured the records survive a restart
//! so the same due period does not alert twice.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    consts::DEDUP_RETENTION_SECS,
    core::{restrict_file_permissions, unique_time_suffix},
    error::EngineError,
    model::Notification,
};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertKey {
    pub notification_id: String,
    pub due_date: String,
    pub reminder_type: String,
}

impl AlertKey {
    /// `None` for notifications without reminder metadata, which are never
    /// eligible for a sound alert.
    pub fn for_notification(notification: &Notification) -> Option<Self> {
        let reminder = notification.reminder.as_ref()?;
        Some(Self {
            notification_id: notification.id.clone(),
            due_date: reminder.due_date.clone(),
            reminder_type: reminder.kind.clone(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AlertRecord {
    #[serde(flatten)]
    key: AlertKey,
    alerted_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct DedupTracker {
    records: HashMap<AlertKey, DateTime<Utc>>,
    path: Option<PathBuf>,
}

impl DedupTracker {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Opens a file-backed tracker. A corrupt file is moved aside and the
    /// tracker starts empty; only an unreadable file is an error.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, EngineError> {
        let path = path.into();
        let records = load_records(&path)?;
        let cutoff = Utc::now() - chrono::Duration::seconds(DEDUP_RETENTION_SECS);
        let records: HashMap<_, _> = records
            .into_iter()
            .filter(|record| record.alerted_at >= cutoff)
            .map(|record| (record.key, record.alerted_at))
            .collect();
        tracing::debug!("dedup tracker loaded records={} path={path:?}", records.len());
        Ok(Self {
            records,
            path: Some(path),
        })
    }

    pub fn contains(&self, key: &AlertKey) -> bool {
        self.records.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records `key`. Returns `false` if it was already present. A failure to
    /// persist is logged and does not undo the in-memory record.
    pub fn record(&mut self, key: AlertKey) -> bool {
        if self.records.contains_key(&key) {
            return false;
        }
        self.records.insert(key, Utc::now());
        if let Some(path) = &self.path {
            if let Err(error) = persist_records(path, &self.records) {
                tracing::warn!("failed to persist alert dedup records: {error}");
            }
        }
        true
    }
}

fn load_records(path: &Path) -> Result<Vec<AlertRecord>, EngineError> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let content = fs::read_to_string(path)?;
    match serde_json::from_str::<Vec<AlertRecord>>(&content) {
        Ok(records) => Ok(records),
        Err(error) => {
            let backup_path = path.with_extension(format!("corrupt-{}.json", unique_time_suffix()));
            if let Err(rename_error) = fs::rename(path, &backup_path) {
                tracing::warn!("failed to back up corrupt dedup file: {rename_error}");
            } else {
                tracing::warn!(
                    "moved corrupt dedup file to {}",
                    backup_path.to_string_lossy()
                );
            }
            tracing::warn!("dedup file parse failed, starting fresh: {error}");
            Ok(Vec::new())
        }
    }
}

fn persist_records(
    path: &Path,
    records: &HashMap<AlertKey, DateTime<Utc>>,
) -> Result<(), EngineError> {
    let mut snapshot: Vec<AlertRecord> = records
        .iter()
        .map(|(key, alerted_at)| AlertRecord {
            key: key.clone(),
            alerted_at: *alerted_at,
        })
        .collect();
    snapshot.sort_by(|a, b| a.alerted_at.cmp(&b.alerted_at));

    let content = serde_json::to_string(&snapshot)?;
    let tmp_path = path.with_extension(format!("tmp-{}", unique_time_suffix()));
    fs::write(&tmp_path, content)?;
    restrict_file_permissions(&tmp_path);
    fs::rename(&tmp_path, path)?;
    Ok(())
}
