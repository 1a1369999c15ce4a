use crate::error::Result;
use codelab_language::Language;
use codelab_store::{Session, SessionRepository};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error};

#[derive(Debug, Clone)]
pub struct AutosaveOptions {
    /// Minimum spacing between persisted writes per session.
    pub throttle: Duration,
    /// Ceiling on how long a pending write may be deferred before it is
    /// forced through regardless of throttle.
    pub pending_timeout: Duration,
}

impl Default for AutosaveOptions {
    fn default() -> Self {
        Self {
            throttle: Duration::from_millis(1000),
            pending_timeout: Duration::from_millis(5000),
        }
    }
}

struct PendingAutosave {
    first_pending_at: Instant,
    generation: u64,
    timer: JoinHandle<()>,
}

#[derive(Default)]
struct SessionEntry {
    last_write: Option<Instant>,
    pending: Option<PendingAutosave>,
}

/// Per-session write coalescer bounding DB write frequency without losing
/// the latest edit.
///
/// State is process-local by design: losing it on restart only means an
/// unflushed last edit may be lost, which is accepted over cross-process
/// debounce coordination. At most one timer lives per session; a newer
/// request aborts and replaces it, so a flush never runs concurrently
/// with another flush for the same session.
pub struct AutosaveScheduler {
    sessions: Arc<dyn SessionRepository>,
    options: AutosaveOptions,
    entries: Arc<Mutex<HashMap<String, SessionEntry>>>,
    generation: AtomicU64,
}

impl AutosaveScheduler {
    pub fn new(sessions: Arc<dyn SessionRepository>, options: AutosaveOptions) -> Self {
        Self {
            sessions,
            options,
            entries: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
        }
    }

    /// Throttled save of `source_code` for `session`. Identical content is
    /// a no-op; otherwise the write happens now if the throttle window has
    /// passed, or is coalesced into a single deferred write carrying the
    /// latest code.
    pub async fn save(
        &self,
        session: &Session,
        language: Language,
        source_code: &str,
    ) -> Result<()> {
        if session.language == language && session.source_code == source_code {
            debug!("Autosave skipped for {}: content unchanged", session.id);
            return Ok(());
        }

        let now = Instant::now();
        let session_id = session.id.clone();

        let deferred_delay = {
            let mut entries = self.entries.lock().unwrap();
            let entry = entries.entry(session_id.clone()).or_default();

            let elapsed = entry.last_write.map(|t| now.duration_since(t));
            let throttled = matches!(elapsed, Some(e) if e < self.options.throttle);
            let starved = entry
                .pending
                .as_ref()
                .map(|p| now.duration_since(p.first_pending_at) >= self.options.pending_timeout)
                .unwrap_or(false);

            if !throttled || starved {
                if let Some(pending) = entry.pending.take() {
                    pending.timer.abort();
                }
                entry.last_write = Some(now);
                None
            } else {
                // Replace the pending write, keeping the original pending
                // start so the starvation bound holds across resets.
                let first_pending_at = entry
                    .pending
                    .as_ref()
                    .map(|p| p.first_pending_at)
                    .unwrap_or(now);
                if let Some(pending) = entry.pending.take() {
                    pending.timer.abort();
                }

                let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
                let delay = self.options.throttle - elapsed.unwrap_or_default();
                entry.pending = Some(PendingAutosave {
                    first_pending_at,
                    generation,
                    timer: self.spawn_flush(
                        session_id.clone(),
                        language,
                        source_code.to_string(),
                        delay,
                        generation,
                    ),
                });
                Some(delay)
            }
        };

        match deferred_delay {
            None => {
                debug!("Autosave write for {}", session_id);
                self.sessions
                    .update_session(&session_id, language, source_code)
                    .await?;
                Ok(())
            }
            Some(delay) => {
                debug!("Autosave deferred {:?} for {}", delay, session_id);
                Ok(())
            }
        }
    }

    fn spawn_flush(
        &self,
        session_id: String,
        language: Language,
        source_code: String,
        delay: Duration,
        generation: u64,
    ) -> JoinHandle<()> {
        let sessions = self.sessions.clone();
        let entries = self.entries.clone();

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            // A replacement may have raced past the abort; the generation
            // decides which flush owns the pending write.
            {
                let mut map = entries.lock().unwrap();
                let Some(entry) = map.get_mut(&session_id) else {
                    return;
                };
                match &entry.pending {
                    Some(pending) if pending.generation == generation => {
                        entry.pending = None;
                        entry.last_write = Some(Instant::now());
                    }
                    _ => return,
                }
            }

            debug!("Autosave flush for {}", session_id);
            if let Err(e) = sessions
                .update_session(&session_id, language, &source_code)
                .await
            {
                error!("Autosave flush failed for {}: {}", session_id, e);
            }
        })
    }

    /// Drop any pending write for a closed session.
    pub fn discard(&self, session_id: &str) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(mut entry) = entries.remove(session_id) {
            if let Some(pending) = entry.pending.take() {
                pending.timer.abort();
                debug!("Discarded pending autosave for {}", session_id);
            }
        }
    }
}
