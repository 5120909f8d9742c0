use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("backend rejected request ({status}): {detail}")]
    Rejected { status: u16, detail: String },
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("invalid backend url: {0}")]
    Url(#[from] url::ParseError),
    #[error("unsupported push url: {0}")]
    PushUrl(String),
    #[error("malformed payload: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("session hub is no longer running")]
    Closed,
    #[error(transparent)]
    Persist(#[from] PersistError),
}

impl SyncError {
    /// Transport-level failures recover through reconnect or retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SyncError::Http(_) | SyncError::WebSocket(_) | SyncError::Timeout(_)
        )
    }
}

pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("unable to determine home directory for state file")]
    MissingHome,
    #[error("failed to access {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse state file: {0}")]
    Parse(String),
    #[error("failed to serialize state file: {0}")]
    Serialize(String),
}

impl From<toml::de::Error> for PersistError {
    fn from(err: toml::de::Error) -> Self {
        PersistError::Parse(err.to_string())
    }
}

impl From<toml::ser::Error> for PersistError {
    fn from(err: toml::ser::Error) -> Self {
        PersistError::Serialize(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_failures_are_transient_rejections_are_not() {
        assert!(SyncError::Timeout(Duration::from_secs(5)).is_transient());
        assert!(!SyncError::Rejected {
            status: 400,
            detail: "Session already running".into(),
        }
        .is_transient());
        assert!(!SyncError::Closed.is_transient());
    }
}
