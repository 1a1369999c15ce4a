use thiserror::Error;

pub type Result<T> = std::result::Result<T, QueueError>;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queue is closed")]
    Closed,

    /// Infrastructure-level dispatch failure. Retried with backoff, unlike
    /// a sandbox outcome, which the handler records as a terminal
    /// execution state and returns Ok for.
    #[error("Job dispatch failed: {0}")]
    Dispatch(String),
}
