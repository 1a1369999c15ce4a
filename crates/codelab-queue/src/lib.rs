pub mod error;
pub mod job;
pub mod queue;
pub mod worker;

pub use error::{QueueError, Result};
pub use job::ExecutionJob;
pub use queue::{JobQueue, QueueOptions, RetryDecision};
pub use worker::{FailureHandler, JobFailure, JobHandler, Worker, WorkerOptions};
