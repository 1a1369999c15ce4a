use codelab_language::LanguageError;
use codelab_queue::QueueError;
use codelab_store::StoreError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SessionError>;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("{0}")]
    UnsupportedLanguage(#[from] LanguageError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Too many requests: {0}")]
    TooManyRequests(String),

    #[error("Storage error: {0}")]
    Store(String),

    #[error("Queue error: {0}")]
    Queue(String),
}

impl From<StoreError> for SessionError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(msg) => SessionError::NotFound(msg),
            // The storage-layer uniqueness violation is the authoritative
            // exclusivity signal; it collapses to the same conflict the
            // fast-path check produces.
            StoreError::Conflict(msg) => SessionError::Conflict(msg),
            other => SessionError::Store(other.to_string()),
        }
    }
}

impl From<QueueError> for SessionError {
    fn from(err: QueueError) -> Self {
        SessionError::Queue(err.to_string())
    }
}
