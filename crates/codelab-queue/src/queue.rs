use crate::error::{QueueError, Result};
use crate::job::ExecutionJob;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct QueueOptions {
    /// Attempts per job for transient dispatch failures, including the
    /// first delivery.
    pub max_attempts: u32,
    /// Base of the exponential retry backoff.
    pub backoff_delay: Duration,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_delay: Duration::from_millis(1000),
        }
    }
}

/// What the queue decided after a failed delivery.
#[derive(Debug)]
pub enum RetryDecision {
    Retrying { attempt: u32, delay: Duration },
    Exhausted { attempts: u32 },
}

#[derive(Debug, Clone)]
struct QueuedEntry {
    job: ExecutionJob,
    /// Delivery attempts consumed so far.
    attempts: u32,
    /// Times this job was re-queued after a lease expiry.
    stalls: u32,
    not_before: Instant,
}

struct ActiveEntry {
    entry: QueuedEntry,
    lease_until: Instant,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<QueuedEntry>,
    active: HashMap<String, ActiveEntry>,
    known: HashSet<String>,
    closed: bool,
}

/// Durable-style job queue decoupling submission from execution.
///
/// Jobs are keyed by execution id (idempotency), delivered at most
/// `max_attempts` times with exponential backoff on dispatch failure, and
/// covered by a lease while in flight: an expired lease re-queues the job
/// until the stall budget runs out.
pub struct JobQueue {
    state: Mutex<QueueState>,
    options: QueueOptions,
    notify: Arc<Notify>,
}

impl JobQueue {
    pub fn new(options: QueueOptions) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            options,
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn options(&self) -> &QueueOptions {
        &self.options
    }

    /// Wake handle for the dispatcher.
    pub fn notifier(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    /// Enqueue a job. Returns false when a job with the same execution id
    /// is already queued or in flight (deduplicated, not an error).
    pub async fn enqueue(&self, job: ExecutionJob) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return Err(QueueError::Closed);
        }
        if state.known.contains(&job.execution_id) {
            debug!("Deduplicated job: {}", job.execution_id);
            return Ok(false);
        }

        state.known.insert(job.execution_id.clone());
        state.ready.push_back(QueuedEntry {
            job,
            attempts: 0,
            stalls: 0,
            not_before: Instant::now(),
        });
        drop(state);

        self.notify.notify_one();
        Ok(true)
    }

    /// Claim the next due job, holding a lease of `lock_duration`.
    pub fn claim(&self, lock_duration: Duration) -> Option<ExecutionJob> {
        let mut state = self.state.lock().unwrap();
        let now = Instant::now();

        let position = state.ready.iter().position(|e| e.not_before <= now)?;
        let mut entry = state.ready.remove(position)?;
        entry.attempts += 1;

        let job = entry.job.clone();
        state.active.insert(
            job.execution_id.clone(),
            ActiveEntry {
                entry,
                lease_until: now + lock_duration,
            },
        );
        Some(job)
    }

    /// Renew the lease of an in-flight job (heartbeat).
    pub fn renew_lease(&self, execution_id: &str, lock_duration: Duration) -> bool {
        let mut state = self.state.lock().unwrap();
        match state.active.get_mut(execution_id) {
            Some(active) => {
                active.lease_until = Instant::now() + lock_duration;
                true
            }
            None => false,
        }
    }

    pub fn complete(&self, execution_id: &str) {
        let mut state = self.state.lock().unwrap();
        state.active.remove(execution_id);
        state.known.remove(execution_id);
        debug!("Job completed: {}", execution_id);
    }

    /// Record a failed delivery: re-queue with exponential backoff while
    /// attempts remain, otherwise drop the job as exhausted.
    pub fn retry_or_fail(&self, execution_id: &str) -> RetryDecision {
        let mut state = self.state.lock().unwrap();
        let Some(active) = state.active.remove(execution_id) else {
            // Lease already reaped; the stall path owns this job now.
            return RetryDecision::Exhausted { attempts: 0 };
        };

        let mut entry = active.entry;
        if entry.attempts >= self.options.max_attempts {
            state.known.remove(execution_id);
            warn!(
                "Job {} exhausted after {} attempts",
                execution_id, entry.attempts
            );
            return RetryDecision::Exhausted {
                attempts: entry.attempts,
            };
        }

        let delay = self.options.backoff_delay * 2u32.pow(entry.attempts - 1);
        let attempt = entry.attempts;
        entry.not_before = Instant::now() + delay;
        state.ready.push_back(entry);
        drop(state);

        self.notify.notify_one();
        debug!(
            "Job {} retrying (attempt {}, backoff {:?})",
            execution_id, attempt, delay
        );
        RetryDecision::Retrying { attempt, delay }
    }

    /// Re-queue jobs whose lease expired without completion (worker
    /// presumed crashed). A job over `max_stalled_count` is permanently
    /// failed and returned to the caller for recording.
    pub fn reap_stalled(&self, max_stalled_count: u32) -> Vec<(ExecutionJob, u32)> {
        let mut state = self.state.lock().unwrap();
        let now = Instant::now();

        let expired: Vec<String> = state
            .active
            .iter()
            .filter(|(_, active)| active.lease_until <= now)
            .map(|(id, _)| id.clone())
            .collect();

        let mut failed = Vec::new();
        for id in expired {
            let Some(active) = state.active.remove(&id) else {
                continue;
            };
            let mut entry = active.entry;
            entry.stalls += 1;

            if entry.stalls > max_stalled_count {
                state.known.remove(&id);
                warn!("Job {} permanently failed after {} stalls", id, entry.stalls);
                failed.push((entry.job, entry.stalls));
            } else {
                info!("Re-queueing stalled job: {} (stall {})", id, entry.stalls);
                // A stalled delivery does not consume a retry attempt.
                entry.attempts = entry.attempts.saturating_sub(1);
                entry.not_before = now;
                state.ready.push_back(entry);
            }
        }

        if !state.ready.is_empty() {
            self.notify.notify_one();
        }
        failed
    }

    pub fn pending(&self) -> usize {
        self.state.lock().unwrap().ready.len()
    }

    pub fn in_flight(&self) -> usize {
        self.state.lock().unwrap().active.len()
    }

    pub fn close(&self) {
        let mut state = self.state.lock().unwrap();
        state.closed = true;
        info!("Job queue closed");
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new(QueueOptions::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codelab_language::Language;

    fn job(id: &str) -> ExecutionJob {
        ExecutionJob::new(id, "s1", "print('hi')", Language::Python)
    }

    fn queue() -> JobQueue {
        JobQueue::new(QueueOptions {
            max_attempts: 3,
            backoff_delay: Duration::from_millis(10),
        })
    }

    #[tokio::test]
    async fn test_enqueue_deduplicates_by_execution_id() {
        let queue = queue();
        assert!(queue.enqueue(job("e1")).await.unwrap());
        assert!(!queue.enqueue(job("e1")).await.unwrap());
        assert_eq!(queue.pending(), 1);
    }

    #[tokio::test]
    async fn test_claim_moves_job_to_active() {
        let queue = queue();
        queue.enqueue(job("e1")).await.unwrap();

        let claimed = queue.claim(Duration::from_secs(30)).unwrap();
        assert_eq!(claimed.execution_id, "e1");
        assert_eq!(queue.pending(), 0);
        assert_eq!(queue.in_flight(), 1);

        queue.complete("e1");
        assert_eq!(queue.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_completed_id_can_be_enqueued_again() {
        let queue = queue();
        queue.enqueue(job("e1")).await.unwrap();
        queue.claim(Duration::from_secs(30)).unwrap();
        queue.complete("e1");

        assert!(queue.enqueue(job("e1")).await.unwrap());
    }

    #[tokio::test]
    async fn test_retry_applies_backoff_then_exhausts() {
        let queue = queue();
        queue.enqueue(job("e1")).await.unwrap();

        queue.claim(Duration::from_secs(30)).unwrap();
        match queue.retry_or_fail("e1") {
            RetryDecision::Retrying { attempt, delay } => {
                assert_eq!(attempt, 1);
                assert_eq!(delay, Duration::from_millis(10));
            }
            other => panic!("unexpected decision: {:?}", other),
        }

        // Not due again until the backoff elapses.
        assert!(queue.claim(Duration::from_secs(30)).is_none());
        tokio::time::sleep(Duration::from_millis(15)).await;
        queue.claim(Duration::from_secs(30)).unwrap();

        match queue.retry_or_fail("e1") {
            RetryDecision::Retrying { attempt, delay } => {
                assert_eq!(attempt, 2);
                assert_eq!(delay, Duration::from_millis(20));
            }
            other => panic!("unexpected decision: {:?}", other),
        }

        tokio::time::sleep(Duration::from_millis(25)).await;
        queue.claim(Duration::from_secs(30)).unwrap();

        match queue.retry_or_fail("e1") {
            RetryDecision::Exhausted { attempts } => assert_eq!(attempts, 3),
            other => panic!("unexpected decision: {:?}", other),
        }
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test]
    async fn test_expired_lease_requeues_until_stall_budget() {
        let queue = queue();
        queue.enqueue(job("e1")).await.unwrap();

        // Stall 1 and 2: re-queued.
        for stall in 1..=2 {
            queue.claim(Duration::from_millis(0)).unwrap();
            let failed = queue.reap_stalled(2);
            assert!(failed.is_empty(), "stall {} should re-queue", stall);
            assert_eq!(queue.pending(), 1);
        }

        // Stall 3: over budget, permanently failed.
        queue.claim(Duration::from_millis(0)).unwrap();
        let failed = queue.reap_stalled(2);
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].0.execution_id, "e1");
        assert_eq!(failed[0].1, 3);
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test]
    async fn test_live_lease_is_not_reaped() {
        let queue = queue();
        queue.enqueue(job("e1")).await.unwrap();
        queue.claim(Duration::from_secs(30)).unwrap();

        assert!(queue.reap_stalled(2).is_empty());
        assert_eq!(queue.in_flight(), 1);
    }

    #[tokio::test]
    async fn test_renew_lease_keeps_job_alive() {
        let queue = queue();
        queue.enqueue(job("e1")).await.unwrap();
        queue.claim(Duration::from_millis(20)).unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(queue.renew_lease("e1", Duration::from_secs(30)));
        tokio::time::sleep(Duration::from_millis(15)).await;

        assert!(queue.reap_stalled(2).is_empty());
        assert_eq!(queue.in_flight(), 1);
    }

    #[tokio::test]
    async fn test_closed_queue_rejects_enqueue() {
        let queue = queue();
        queue.close();
        let err = queue.enqueue(job("e1")).await.unwrap_err();
        assert!(matches!(err, QueueError::Closed));
    }
}
