use crate::config::TransportKind;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no liveness evidence within the receive window")]
    Timeout,

    #[error("configured transport is {expected}, session was started with {actual}")]
    ConfigurationMismatch {
        expected: TransportKind,
        actual: TransportKind,
    },

    #[error("session has not been started")]
    NotStarted,

    #[error("settings: {0}")]
    Settings(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Errors the tick loop absorbs by dropping back to discovery.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Io(_) | Error::Transport(_) | Error::Malformed(_) | Error::Json(_) | Error::Timeout
        )
    }
}
