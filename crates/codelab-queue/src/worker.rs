use crate::error::QueueError;
use crate::job::ExecutionJob;
use crate::queue::{JobQueue, RetryDecision};
use futures::future::BoxFuture;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Per-job async handler. An `Err` is a transient dispatch failure and is
/// retried by the queue; sandbox outcomes must be recorded by the handler
/// and returned as `Ok`.
pub type JobHandler =
    Arc<dyn Fn(ExecutionJob) -> BoxFuture<'static, crate::Result<()>> + Send + Sync>;

/// Invoked when the queue gives up on a job for good.
pub type FailureHandler = Arc<dyn Fn(ExecutionJob, JobFailure) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Debug, Clone)]
pub enum JobFailure {
    /// All dispatch attempts failed.
    ExhaustedRetries { attempts: u32, last_error: String },
    /// The lease expired past the stall budget; the worker holding the
    /// job is presumed crashed.
    Stalled { stalls: u32 },
}

#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Jobs processed simultaneously.
    pub concurrency: usize,
    /// Token-bucket cap on job starts: at most `rate_limit_max` per
    /// `rate_limit_duration`, independent of per-session limits.
    pub rate_limit_max: u32,
    pub rate_limit_duration: Duration,
    /// Lease held per in-flight job; renewed by heartbeat at half-life.
    pub lock_duration: Duration,
    /// How often expired leases are collected.
    pub stalled_interval: Duration,
    pub max_stalled_count: u32,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            concurrency: 5,
            rate_limit_max: 10,
            rate_limit_duration: Duration::from_millis(1000),
            lock_duration: Duration::from_millis(30_000),
            stalled_interval: Duration::from_millis(30_000),
            max_stalled_count: 2,
        }
    }
}

/// Fixed-window token bucket for global job-start throttling.
struct RateLimiter {
    max: u32,
    duration: Duration,
    window: Mutex<(u32, Instant)>,
}

impl RateLimiter {
    fn new(max: u32, duration: Duration) -> Self {
        Self {
            max,
            duration,
            window: Mutex::new((max, Instant::now())),
        }
    }

    /// Take one token, or return how long until the window refills.
    fn try_acquire(&self) -> std::result::Result<(), Duration> {
        let mut window = self.window.lock().unwrap();
        let now = Instant::now();
        let (ref mut tokens, ref mut started) = *window;

        if now.duration_since(*started) >= self.duration {
            *tokens = self.max;
            *started = now;
        }
        if *tokens > 0 {
            *tokens -= 1;
            Ok(())
        } else {
            Err(self.duration.saturating_sub(now.duration_since(*started)))
        }
    }
}

/// Pulls jobs off the queue and runs them through the handler with a
/// bounded pool, a global start-rate cap, heartbeat lease renewal and
/// stall collection.
pub struct Worker {
    queue: Arc<JobQueue>,
    options: WorkerOptions,
    permits: Arc<Semaphore>,
    shutdown: Arc<Notify>,
    running: Arc<Mutex<bool>>,
    loops: Mutex<Vec<JoinHandle<()>>>,
}

impl Worker {
    pub fn new(queue: Arc<JobQueue>, options: WorkerOptions) -> Self {
        let permits = Arc::new(Semaphore::new(options.concurrency));
        Self {
            queue,
            options,
            permits,
            shutdown: Arc::new(Notify::new()),
            running: Arc::new(Mutex::new(false)),
            loops: Mutex::new(Vec::new()),
        }
    }

    /// Start the dispatcher and stall-collector loops. Idempotent-hostile
    /// by design: starting twice is a caller bug and returns an error.
    pub fn start(&self, handler: JobHandler, on_failed: FailureHandler) -> crate::Result<()> {
        {
            let mut running = self.running.lock().unwrap();
            if *running {
                return Err(QueueError::Dispatch("Worker already started".into()));
            }
            *running = true;
        }

        info!(
            "Starting worker (concurrency {}, rate {}/{:?})",
            self.options.concurrency, self.options.rate_limit_max, self.options.rate_limit_duration
        );

        let dispatcher = self.spawn_dispatcher(handler, on_failed.clone());
        let collector = self.spawn_stall_collector(on_failed);

        let mut loops = self.loops.lock().unwrap();
        loops.push(dispatcher);
        loops.push(collector);
        Ok(())
    }

    fn spawn_dispatcher(&self, handler: JobHandler, on_failed: FailureHandler) -> JoinHandle<()> {
        let queue = self.queue.clone();
        let permits = self.permits.clone();
        let shutdown = self.shutdown.clone();
        let running = self.running.clone();
        let wake = queue.notifier();
        let limiter = Arc::new(RateLimiter::new(
            self.options.rate_limit_max,
            self.options.rate_limit_duration,
        ));
        let lock_duration = self.options.lock_duration;

        tokio::spawn(async move {
            loop {
                if !*running.lock().unwrap() {
                    break;
                }

                let permit = tokio::select! {
                    permit = permits.clone().acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    },
                    _ = shutdown.notified() => break,
                };

                if let Err(wait) = limiter.try_acquire() {
                    drop(permit);
                    tokio::select! {
                        _ = tokio::time::sleep(wait) => {}
                        _ = shutdown.notified() => break,
                    }
                    continue;
                }

                let Some(job) = queue.claim(lock_duration) else {
                    drop(permit);
                    // Backoff'd retries become due without a notify, so
                    // poll on a short interval as well.
                    tokio::select! {
                        _ = wake.notified() => {}
                        _ = tokio::time::sleep(Duration::from_millis(25)) => {}
                        _ = shutdown.notified() => break,
                    }
                    continue;
                };

                let queue = queue.clone();
                let handler = handler.clone();
                let on_failed = on_failed.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    Self::deliver(queue, handler, on_failed, job, lock_duration).await;
                });
            }
            debug!("Dispatcher stopped");
        })
    }

    /// Run one delivery: heartbeat the lease while the handler runs, then
    /// settle the job with the queue.
    async fn deliver(
        queue: Arc<JobQueue>,
        handler: JobHandler,
        on_failed: FailureHandler,
        job: ExecutionJob,
        lock_duration: Duration,
    ) {
        let execution_id = job.execution_id.clone();

        let heartbeat = {
            let queue = queue.clone();
            let execution_id = execution_id.clone();
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(lock_duration / 2).await;
                    if !queue.renew_lease(&execution_id, lock_duration) {
                        break;
                    }
                }
            })
        };

        debug!("Processing job: {}", execution_id);
        let result = handler(job.clone()).await;
        heartbeat.abort();

        match result {
            Ok(()) => queue.complete(&execution_id),
            Err(e) => {
                warn!("Job {} dispatch failed: {}", execution_id, e);
                match queue.retry_or_fail(&execution_id) {
                    RetryDecision::Retrying { attempt, delay } => {
                        debug!(
                            "Job {} scheduled for retry (attempt {}, in {:?})",
                            execution_id, attempt, delay
                        );
                    }
                    RetryDecision::Exhausted { attempts } => {
                        error!(
                            "Job {} failed permanently after {} attempts",
                            execution_id, attempts
                        );
                        on_failed(
                            job,
                            JobFailure::ExhaustedRetries {
                                attempts,
                                last_error: e.to_string(),
                            },
                        )
                        .await;
                    }
                }
            }
        }
    }

    fn spawn_stall_collector(&self, on_failed: FailureHandler) -> JoinHandle<()> {
        let queue = self.queue.clone();
        let shutdown = self.shutdown.clone();
        let running = self.running.clone();
        let interval = self.options.stalled_interval;
        let max_stalled_count = self.options.max_stalled_count;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = shutdown.notified() => break,
                }
                if !*running.lock().unwrap() {
                    break;
                }

                for (job, stalls) in queue.reap_stalled(max_stalled_count) {
                    warn!("Job {} abandoned after {} stalls", job.execution_id, stalls);
                    on_failed(job, JobFailure::Stalled { stalls }).await;
                }
            }
            debug!("Stall collector stopped");
        })
    }

    /// Stop the loops and drain in-flight jobs.
    pub async fn close(&self) {
        {
            let mut running = self.running.lock().unwrap();
            if !*running {
                return;
            }
            *running = false;
        }
        self.shutdown.notify_waiters();

        let loops: Vec<JoinHandle<()>> = {
            let mut guard = self.loops.lock().unwrap();
            guard.drain(..).collect()
        };
        for handle in loops {
            let _ = handle.await;
        }

        // All permits back means no delivery is still in flight.
        let _ = self
            .permits
            .acquire_many(self.options.concurrency as u32)
            .await;
        info!("Worker closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::QueueOptions;
    use codelab_language::Language;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn job(id: &str) -> ExecutionJob {
        ExecutionJob::new(id, "s1", "print('hi')", Language::Python)
    }

    fn options() -> WorkerOptions {
        WorkerOptions {
            concurrency: 2,
            rate_limit_max: 100,
            rate_limit_duration: Duration::from_millis(1000),
            lock_duration: Duration::from_millis(500),
            stalled_interval: Duration::from_millis(50),
            max_stalled_count: 2,
        }
    }

    fn noop_failure() -> FailureHandler {
        Arc::new(|_job, _failure| Box::pin(async {}))
    }

    #[tokio::test]
    async fn test_worker_processes_queued_jobs() {
        let queue = Arc::new(JobQueue::default());
        let worker = Worker::new(queue.clone(), options());

        let processed = Arc::new(AtomicUsize::new(0));
        let counter = processed.clone();
        let handler: JobHandler = Arc::new(move |_job| {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        });

        worker.start(handler, noop_failure()).unwrap();
        for i in 0..4 {
            queue.enqueue(job(&format!("e{}", i))).await.unwrap();
        }

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(processed.load(Ordering::SeqCst), 4);
        assert_eq!(queue.pending(), 0);
        assert_eq!(queue.in_flight(), 0);

        worker.close().await;
    }

    #[tokio::test]
    async fn test_concurrency_bound_is_respected() {
        let queue = Arc::new(JobQueue::default());
        let worker = Worker::new(queue.clone(), options());

        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (in_flight_ref, peak_ref) = (in_flight.clone(), peak.clone());
        let handler: JobHandler = Arc::new(move |_job| {
            let in_flight = in_flight_ref.clone();
            let peak = peak_ref.clone();
            Box::pin(async move {
                let current = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(current, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            })
        });

        worker.start(handler, noop_failure()).unwrap();
        for i in 0..6 {
            queue.enqueue(job(&format!("e{}", i))).await.unwrap();
        }

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(queue.pending(), 0);

        worker.close().await;
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried_then_succeeds() {
        let queue = Arc::new(JobQueue::new(QueueOptions {
            max_attempts: 3,
            backoff_delay: Duration::from_millis(10),
        }));
        let worker = Worker::new(queue.clone(), options());

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_ref = calls.clone();
        let handler: JobHandler = Arc::new(move |_job| {
            let calls = calls_ref.clone();
            Box::pin(async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(QueueError::Dispatch("store unavailable".into()))
                } else {
                    Ok(())
                }
            })
        });

        worker.start(handler, noop_failure()).unwrap();
        queue.enqueue(job("e1")).await.unwrap();

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(queue.pending(), 0);
        assert_eq!(queue.in_flight(), 0);

        worker.close().await;
    }

    #[tokio::test]
    async fn test_exhausted_retries_invoke_failure_handler() {
        let queue = Arc::new(JobQueue::new(QueueOptions {
            max_attempts: 2,
            backoff_delay: Duration::from_millis(5),
        }));
        let worker = Worker::new(queue.clone(), options());

        let handler: JobHandler = Arc::new(|_job| {
            Box::pin(async { Err(QueueError::Dispatch("always down".into())) })
        });

        let failures = Arc::new(Mutex::new(Vec::new()));
        let failures_ref = failures.clone();
        let on_failed: FailureHandler = Arc::new(move |job, failure| {
            let failures = failures_ref.clone();
            Box::pin(async move {
                failures.lock().unwrap().push((job.execution_id, failure));
            })
        });

        worker.start(handler, on_failed).unwrap();
        queue.enqueue(job("e1")).await.unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        let failures = failures.lock().unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, "e1");
        match &failures[0].1 {
            JobFailure::ExhaustedRetries { attempts, last_error } => {
                assert_eq!(*attempts, 2);
                assert!(last_error.contains("always down"));
            }
            other => panic!("unexpected failure kind: {:?}", other),
        }

        worker.close().await;
    }

    #[tokio::test]
    async fn test_worker_cannot_start_twice() {
        let queue = Arc::new(JobQueue::default());
        let worker = Worker::new(queue, options());

        let handler: JobHandler = Arc::new(|_job| Box::pin(async { Ok(()) }));
        worker.start(handler.clone(), noop_failure()).unwrap();
        assert!(worker.start(handler, noop_failure()).is_err());

        worker.close().await;
    }
}
