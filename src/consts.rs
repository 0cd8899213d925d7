pub(crate) const DEFAULT_CACHE_LIMIT: usize = 100;
pub(crate) const MAX_CACHE_LIMIT: usize = 2000;
pub(crate) const DEFAULT_CACHE_TTL_SECS: u64 = 300;

pub(crate) const DEFAULT_POLL_BASE_INTERVAL_SECS: u64 = 30;
pub(crate) const DEFAULT_INACTIVITY_THRESHOLD_SECS: u64 = 120;
pub(crate) const INACTIVE_POLL_MULTIPLIER: u32 = 5;
pub(crate) const BACKGROUND_POLL_MULTIPLIER: u32 = 10;

pub(crate) const DEFAULT_REMINDER_INTERVAL_SECS: u64 = 30;
pub(crate) const DEFAULT_ALERT_COOLDOWN_MS: u64 = 5_000;
pub(crate) const DEDUP_RETENTION_SECS: i64 = 30 * 24 * 60 * 60;

pub(crate) const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
pub(crate) const DEFAULT_REQUEST_RETRIES: u32 = 2;
pub(crate) const REQUEST_RETRY_STEP_MS: u64 = 1_000;

pub(crate) const STREAM_CONNECT_TIMEOUT_SECS: u64 = 10;
pub(crate) const STREAM_BACKOFF_BASE_SECS: u64 = 1;
pub(crate) const STREAM_BACKOFF_MAX_SECS: u64 = 30;
pub(crate) const DEFAULT_PUSH_MAX_RECONNECT_ATTEMPTS: u32 = 5;
pub(crate) const STREAM_LIVENESS_CHECK_INTERVAL_SECS: u64 = 15;
pub(crate) const STREAM_LIVENESS_IDLE_SECS: u64 = 90;
pub(crate) const STREAM_LIVENESS_PING_GRACE_SECS: u64 = 30;
pub(crate) const STREAM_HINT_RECHECK_SECS: u64 = 15;
pub(crate) const RESYNC_RETRY_DELAY_MS: u64 = 250;
pub(crate) const RESYNC_MAX_ATTEMPTS: u32 = 40;
pub(crate) const STREAM_PATH_SUFFIX: &str = "/notifications/stream";

pub(crate) const TOAST_ACTION_LABEL: &str = "View all";
pub(crate) const TOAST_ACTION_TARGET: &str = "/notifications";
