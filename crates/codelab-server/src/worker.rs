use codelab_queue::{ExecutionJob, FailureHandler, JobFailure, JobHandler, QueueError};
use codelab_sandbox::{KilledReason, SandboxRunner, OUTPUT_LIMIT_MESSAGE, TIMEOUT_MESSAGE};
use codelab_store::{ExecutionRepository, ExecutionStatus, ExecutionUpdate, StoreError};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

const SYSTEM_ERROR_MESSAGE: &str = "System error occurred during execution";

/// Turns a claimed job into a terminal execution record: marks it RUNNING,
/// runs the snapshot in the sandbox and classifies the outcome.
///
/// Only store failures bubble up as `Err`, which the queue retries; a
/// sandbox outcome, however bad, is a successfully processed job.
pub struct ExecutionProcessor {
    executions: Arc<dyn ExecutionRepository>,
    runner: Arc<SandboxRunner>,
}

impl ExecutionProcessor {
    pub fn new(executions: Arc<dyn ExecutionRepository>, runner: Arc<SandboxRunner>) -> Self {
        Self { executions, runner }
    }

    /// Handler to install on the queue worker.
    pub fn handler(self: Arc<Self>) -> JobHandler {
        Arc::new(move |job| {
            let processor = self.clone();
            Box::pin(async move { processor.process(job).await })
        })
    }

    /// Settles executions the queue has given up on, so an abandoned job
    /// never leaves a QUEUED or RUNNING record blocking its session.
    pub fn failure_handler(self: Arc<Self>) -> FailureHandler {
        Arc::new(move |job, failure| {
            let processor = self.clone();
            Box::pin(async move { processor.settle_abandoned(job, failure).await })
        })
    }

    async fn process(&self, job: ExecutionJob) -> codelab_queue::Result<()> {
        match self
            .executions
            .update_status(&job.execution_id, ExecutionStatus::Running, ExecutionUpdate::default())
            .await
        {
            Ok(_) => {}
            // Already settled elsewhere (stall collector or enqueue-failure
            // cleanup); nothing left to do for this delivery.
            Err(StoreError::InvalidTransition(_)) | Err(StoreError::NotFound(_)) => {
                debug!("Skipping delivery for settled execution {}", job.execution_id);
                return Ok(());
            }
            Err(e) => return Err(QueueError::Dispatch(e.to_string())),
        }

        let started = Instant::now();
        let outcome = self.runner.run(&job.source_code, job.language).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let (status, error_message) = match outcome.killed_reason {
            KilledReason::Timeout => (ExecutionStatus::Timeout, Some(TIMEOUT_MESSAGE.to_string())),
            KilledReason::OutputLimit => (
                ExecutionStatus::Failed,
                Some(OUTPUT_LIMIT_MESSAGE.to_string()),
            ),
            KilledReason::None if outcome.exit_code != 0 || !outcome.stderr.is_empty() => {
                (ExecutionStatus::Failed, None)
            }
            KilledReason::None => (ExecutionStatus::Completed, None),
        };

        info!(
            "Execution {} finished: {:?} (exit {}, {}ms)",
            job.execution_id, status, outcome.exit_code, elapsed_ms
        );

        let update = ExecutionUpdate {
            stdout: Some(outcome.stdout),
            stderr: Some(outcome.stderr),
            exit_code: Some(outcome.exit_code),
            error_message,
            execution_time_ms: Some(elapsed_ms),
        };
        match self
            .executions
            .update_status(&job.execution_id, status, update)
            .await
        {
            Ok(_) => Ok(()),
            Err(StoreError::InvalidTransition(_)) | Err(StoreError::NotFound(_)) => Ok(()),
            // A transient store failure here re-runs the snapshot, which is
            // safe: the record is still RUNNING and the code is idempotent
            // from the platform's point of view.
            Err(e) => Err(QueueError::Dispatch(e.to_string())),
        }
    }

    async fn settle_abandoned(&self, job: ExecutionJob, failure: JobFailure) {
        let message = match &failure {
            JobFailure::ExhaustedRetries { attempts, last_error } => {
                warn!(
                    "Settling execution {} after {} failed attempts: {}",
                    job.execution_id, attempts, last_error
                );
                SYSTEM_ERROR_MESSAGE
            }
            JobFailure::Stalled { stalls } => {
                warn!(
                    "Settling execution {} after {} stalled deliveries",
                    job.execution_id, stalls
                );
                SYSTEM_ERROR_MESSAGE
            }
        };

        let update = ExecutionUpdate {
            error_message: Some(message.to_string()),
            ..Default::default()
        };
        match self
            .executions
            .update_status(&job.execution_id, ExecutionStatus::Failed, update)
            .await
        {
            Ok(_) => {}
            // A racing delivery may have settled it first; that result wins.
            Err(StoreError::InvalidTransition(_)) | Err(StoreError::NotFound(_)) => {}
            Err(e) => {
                error!(
                    "Failed to settle abandoned execution {}: {}",
                    job.execution_id, e
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codelab_language::Language;
    use codelab_sandbox::SandboxLimits;
    use codelab_store::MemoryStore;

    fn processor_with_store() -> (Arc<ExecutionProcessor>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let runner = Arc::new(SandboxRunner::new(SandboxLimits {
            timeout_ms: 2_000,
            ..Default::default()
        }));
        (
            Arc::new(ExecutionProcessor::new(store.clone(), runner)),
            store,
        )
    }

    fn job_for(execution_id: &str, source: &str) -> ExecutionJob {
        ExecutionJob::new(execution_id, "s1", source, Language::Python)
    }

    #[tokio::test]
    async fn test_successful_run_is_marked_completed() {
        let (processor, store) = processor_with_store();
        store.create_execution("e1", "s1", "print('ok')").await.unwrap();

        processor.process(job_for("e1", "print('ok')")).await.unwrap();

        let execution = store.get_by_id("e1").await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(execution.stdout.as_deref(), Some("ok\n"));
        assert_eq!(execution.exit_code, Some(0));
        assert!(execution.execution_time_ms.is_some());
        assert!(execution.started_at.is_some());
        assert!(execution.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_marked_failed() {
        let (processor, store) = processor_with_store();
        let source = "import sys\nsys.exit(3)";
        store.create_execution("e1", "s1", source).await.unwrap();

        processor.process(job_for("e1", source)).await.unwrap();

        let execution = store.get_by_id("e1").await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert_eq!(execution.exit_code, Some(3));
    }

    #[tokio::test]
    async fn test_timeout_is_marked_timeout_with_sanitized_message() {
        let store = Arc::new(MemoryStore::new());
        let runner = Arc::new(SandboxRunner::new(SandboxLimits {
            timeout_ms: 300,
            ..Default::default()
        }));
        let processor = Arc::new(ExecutionProcessor::new(store.clone(), runner));

        let source = "while True:\n    pass";
        store.create_execution("e1", "s1", source).await.unwrap();
        processor.process(job_for("e1", source)).await.unwrap();

        let execution = store.get_by_id("e1").await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Timeout);
        assert_eq!(execution.error_message.as_deref(), Some(TIMEOUT_MESSAGE));
        assert_eq!(execution.stderr.as_deref(), Some(TIMEOUT_MESSAGE));
    }

    #[tokio::test]
    async fn test_settled_execution_is_not_reprocessed() {
        let (processor, store) = processor_with_store();
        store.create_execution("e1", "s1", "print('ok')").await.unwrap();
        store
            .update_status("e1", ExecutionStatus::Failed, ExecutionUpdate::default())
            .await
            .unwrap();

        processor.process(job_for("e1", "print('ok')")).await.unwrap();

        let execution = store.get_by_id("e1").await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert!(execution.stdout.is_none());
    }

    #[tokio::test]
    async fn test_abandoned_job_settles_as_failed() {
        let (processor, store) = processor_with_store();
        store.create_execution("e1", "s1", "print('ok')").await.unwrap();

        processor
            .settle_abandoned(
                job_for("e1", "print('ok')"),
                JobFailure::ExhaustedRetries {
                    attempts: 3,
                    last_error: "store unavailable".into(),
                },
            )
            .await;

        let execution = store.get_by_id("e1").await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert_eq!(
            execution.error_message.as_deref(),
            Some(SYSTEM_ERROR_MESSAGE)
        );
    }
}
