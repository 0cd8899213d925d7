use std::{
    env,
    io::Write as _,
    path::PathBuf,
    process::ExitCode,
    sync::Arc,
};

use async_trait::async_trait;
use inventory_notify::{
    read_settings,
    settings::SETTINGS_ENV,
    AlertError, AlertSink, EngineError, NotificationEngine, Toast,
};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "inventory_notify=info";

/// Terminal bell for sounds, log lines for toasts and system notifications.
struct ConsoleAlertSink;

#[async_trait]
impl AlertSink for ConsoleAlertSink {
    async fn play_sound(&self) -> Result<(), AlertError> {
        let mut stdout = std::io::stdout();
        stdout
            .write_all(b"\x07")
            .and_then(|()| stdout.flush())
            .map_err(|error| AlertError::Device(error.to_string()))
    }

    fn show_toast(&self, toast: Toast) {
        tracing::info!(
            "[toast] {}: {} ({} -> {})",
            toast.title,
            toast.message,
            toast.action.label,
            toast.action.target
        );
    }

    fn show_system_notification(&self, title: &str, body: &str) {
        tracing::info!("[system] {title}: {body}");
    }
}

fn settings_path() -> Result<PathBuf, EngineError> {
    env::args_os()
        .nth(1)
        .or_else(|| env::var_os(SETTINGS_ENV))
        .map(PathBuf::from)
        .ok_or_else(|| {
            EngineError::Settings(format!(
                "usage: inventory-notify <settings.json> (or set {SETTINGS_ENV})"
            ))
        })
}

async fn run() -> Result<(), EngineError> {
    let settings_path = settings_path()?;
    let settings = read_settings(&settings_path)?;
    tracing::debug!(
        "loaded settings path={settings_path:?} base_url={:?} has_token={} push={}",
        settings.base_url,
        settings.token().is_some(),
        settings.push_enabled
    );
    let principal = settings
        .principal()
        .ok_or_else(|| EngineError::Settings("principal_id is required".to_string()))?;

    let engine = NotificationEngine::from_settings(&settings, Arc::new(ConsoleAlertSink))?;
    let outcome = engine.start(principal).await;
    tracing::info!("initial sync: {outcome:?}");

    let mut view_rx = engine.subscribe();
    let mut last_unread = engine.view().unread_count;
    tracing::info!("unread notifications: {last_unread}");

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
            changed = view_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = view_rx.borrow_and_update().clone();
                if let Some(error) = &view.error {
                    tracing::warn!("notifications unavailable: {error}");
                }
                if view.unread_count != last_unread {
                    last_unread = view.unread_count;
                    tracing::info!("unread notifications: {last_unread}");
                }
            }
        }
    }

    match serde_json::to_string(&engine.diagnostics()) {
        Ok(diagnostics) => tracing::debug!("shutdown diagnostics {diagnostics}"),
        Err(error) => tracing::debug!("failed to encode diagnostics: {error}"),
    }
    engine.stop();
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();
    tracing::info!("inventory-notify starting (pid={})", std::process::id());

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!("{error}");
            ExitCode::FAILURE
        }
    }
}
