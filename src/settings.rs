use serde::{Deserialize, Serialize};
use std::{fs, path::Path, path::PathBuf, time::Duration};

use crate::{
    consts::{
        DEFAULT_ALERT_COOLDOWN_MS, DEFAULT_CACHE_LIMIT, DEFAULT_CACHE_TTL_SECS,
        DEFAULT_INACTIVITY_THRESHOLD_SECS, DEFAULT_POLL_BASE_INTERVAL_SECS,
        DEFAULT_PUSH_MAX_RECONNECT_ATTEMPTS, DEFAULT_REMINDER_INTERVAL_SECS,
        DEFAULT_REQUEST_RETRIES, DEFAULT_REQUEST_TIMEOUT_SECS, MAX_CACHE_LIMIT,
        STREAM_PATH_SUFFIX,
    },
    error::EngineError,
    model::Principal,
};

pub const SETTINGS_ENV: &str = "INVENTORY_NOTIFY_SETTINGS";
pub const TOKEN_ENV: &str = "INVENTORY_NOTIFY_TOKEN";

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct EngineSettings {
    pub base_url: String,
    pub token: Option<String>,
    pub principal_id: Option<String>,
    pub role: Option<String>,
    pub poll_base_interval_secs: u64,
    pub inactivity_threshold_secs: u64,
    pub cache_ttl_secs: u64,
    pub cache_limit: usize,
    pub alert_cooldown_ms: u64,
    pub reminder_interval_secs: u64,
    pub push_enabled: bool,
    pub push_max_reconnect_attempts: u32,
    pub request_timeout_secs: u64,
    pub request_retries: u32,
    pub dedup_store_path: Option<PathBuf>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            token: None,
            principal_id: None,
            role: None,
            poll_base_interval_secs: DEFAULT_POLL_BASE_INTERVAL_SECS,
            inactivity_threshold_secs: DEFAULT_INACTIVITY_THRESHOLD_SECS,
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            cache_limit: DEFAULT_CACHE_LIMIT,
            alert_cooldown_ms: DEFAULT_ALERT_COOLDOWN_MS,
            reminder_interval_secs: DEFAULT_REMINDER_INTERVAL_SECS,
            push_enabled: true,
            push_max_reconnect_attempts: DEFAULT_PUSH_MAX_RECONNECT_ATTEMPTS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            request_retries: DEFAULT_REQUEST_RETRIES,
            dedup_store_path: None,
        }
    }
}

impl EngineSettings {
    pub fn poll_base_interval(&self) -> Duration {
        Duration::from_secs(self.poll_base_interval_secs.max(1))
    }

    pub fn inactivity_threshold(&self) -> Duration {
        Duration::from_secs(self.inactivity_threshold_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn cache_limit(&self) -> usize {
        normalize_cache_limit(self.cache_limit)
    }

    pub fn alert_cooldown(&self) -> Duration {
        Duration::from_millis(self.alert_cooldown_ms)
    }

    pub fn reminder_interval(&self) -> Duration {
        Duration::from_secs(self.reminder_interval_secs.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn token(&self) -> Option<&str> {
        self.token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
    }

    /// The principal configured for an unattended session, if any.
    pub fn principal(&self) -> Option<Principal> {
        let id = self.principal_id.as_deref().map(str::trim)?;
        if id.is_empty() {
            return None;
        }
        Some(Principal::new(id, self.role.clone()))
    }
}

/// Reads settings from `path`, applying the token environment override.
/// A missing file yields the defaults, which still need a `base_url`.
pub fn read_settings(path: &Path) -> Result<EngineSettings, EngineError> {
    let mut settings = if path.exists() {
        let content = fs::read_to_string(path)?;
        serde_json::from_str::<EngineSettings>(&content)?
    } else {
        tracing::debug!("read_settings: {path:?} not found, using defaults");
        EngineSettings::default()
    };

    if let Ok(token) = std::env::var(TOKEN_ENV) {
        if !token.trim().is_empty() {
            settings.token = Some(token.trim().to_string());
        }
    }
    settings.base_url = normalize_base_url(&settings.base_url)?;
    settings.cache_limit = normalize_cache_limit(settings.cache_limit);
    Ok(settings)
}

pub fn normalize_cache_limit(limit: usize) -> usize {
    limit.clamp(1, MAX_CACHE_LIMIT)
}

pub fn normalize_base_url(input: &str) -> Result<String, EngineError> {
    let trimmed = input.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(EngineError::Settings("Server URL is required".to_string()));
    }

    let url = reqwest::Url::parse(trimmed)
        .map_err(|error| EngineError::Settings(format!("Invalid server URL: {error}")))?;

    let scheme = url.scheme();
    if scheme != "http" && scheme != "https" {
        return Err(EngineError::Settings(
            "Server URL must start with http:// or https://".to_string(),
        ));
    }

    Ok(trimmed.to_string())
}

pub fn build_push_ws_url(base_url: &str) -> Result<String, EngineError> {
    let mut ws_url = reqwest::Url::parse(base_url)
        .map_err(|error| EngineError::Settings(format!("Invalid server URL: {error}")))?;

    match ws_url.scheme() {
        "http" => {
            ws_url.set_scheme("ws").map_err(|_| {
                EngineError::Settings("Unable to convert URL scheme to ws".to_string())
            })?;
        }
        "https" => {
            ws_url.set_scheme("wss").map_err(|_| {
                EngineError::Settings("Unable to convert URL scheme to wss".to_string())
            })?;
        }
        _ => {
            return Err(EngineError::Settings(
                "Server URL must start with http:// or https://".to_string(),
            ))
        }
    }

    let mut path = ws_url.path().trim_end_matches('/').to_string();
    path.push_str(STREAM_PATH_SUFFIX);
    ws_url.set_path(&path);
    Ok(ws_url.to_string())
}
