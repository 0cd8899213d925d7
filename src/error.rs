use std::time::Duration;

use thiserror::Error;

/// Failure of a call to one of the external collaborators (HTTP API or push
/// channel). Raw transport errors are translated into this taxonomy at the
/// collaborator boundary and never cross it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    /// The server does not recognise the principal. Not a user-facing error.
    #[error("principal not recognized by the server")]
    Unauthenticated,

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("server rejected request (HTTP {status}): {detail}")]
    Rejected { status: u16, detail: String },

    #[error("malformed response: {0}")]
    Decode(String),
}

impl SourceError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout(_) => true,
            Self::Rejected { status, .. } => *status >= 500 || *status == 429,
            Self::Unauthenticated | Self::Decode(_) => false,
        }
    }

    pub fn is_unauthenticated(&self) -> bool {
        matches!(self, Self::Unauthenticated)
    }
}

/// Errors returned to callers of the engine's public operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("notification engine has no active session")]
    NotStarted,

    #[error("{operation} failed: {source}")]
    Mutation {
        operation: &'static str,
        #[source]
        source: SourceError,
    },

    #[error("invalid settings: {0}")]
    Settings(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Local-only failure to present an alert. Never propagated as an
/// application error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AlertError {
    #[error("sound playback blocked: {0}")]
    Blocked(String),

    #[error("audio device unavailable: {0}")]
    Device(String),
}
