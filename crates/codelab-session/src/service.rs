use crate::autosave::{AutosaveOptions, AutosaveScheduler};
use crate::error::{Result, SessionError};
use codelab_language::{starter_template, Language};
use codelab_queue::{ExecutionJob, JobQueue};
use codelab_store::{
    Execution, ExecutionRepository, ExecutionStatus, ExecutionUpdate, GuardStore, Session,
    SessionRepository,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct RunLimits {
    /// Runs allowed per session within `rate_window`.
    pub max_requests_per_window: u64,
    pub rate_window: Duration,
    /// Minimum spacing between successful submissions per session.
    pub cooldown_between_runs: Duration,
}

impl Default for RunLimits {
    fn default() -> Self {
        Self {
            max_requests_per_window: 5,
            rate_window: Duration::from_secs(60),
            cooldown_between_runs: Duration::from_millis(2000),
        }
    }
}

const FAILED_ENQUEUE_MESSAGE: &str = "System error occurred during execution";

/// Guards every session mutation and run submission: autosave throttling,
/// per-session run rate limit, run cooldown, and at-most-one active
/// execution per session.
pub struct SessionService {
    sessions: Arc<dyn SessionRepository>,
    executions: Arc<dyn ExecutionRepository>,
    guards: Arc<dyn GuardStore>,
    queue: Arc<JobQueue>,
    autosave: AutosaveScheduler,
    limits: RunLimits,
}

impl SessionService {
    pub fn new(
        sessions: Arc<dyn SessionRepository>,
        executions: Arc<dyn ExecutionRepository>,
        guards: Arc<dyn GuardStore>,
        queue: Arc<JobQueue>,
        autosave_options: AutosaveOptions,
        limits: RunLimits,
    ) -> Self {
        let autosave = AutosaveScheduler::new(sessions.clone(), autosave_options);
        Self {
            sessions,
            executions,
            guards,
            queue,
            autosave,
            limits,
        }
    }

    /// Create a session seeded with the language's starter template.
    pub async fn create_session(&self, language: &str) -> Result<Session> {
        let language = Language::parse(language)?;
        let session = Session::new(
            Uuid::new_v4().to_string(),
            language,
            starter_template(language),
        );

        let session = self.sessions.create_session(session).await?;
        info!("Session created: {} ({})", session.id, session.language);
        Ok(session)
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Session> {
        Ok(self.sessions.get_session_by_id(session_id).await?)
    }

    /// Autosave: throttled, coalescing, idempotent for unchanged content.
    pub async fn update_code(
        &self,
        session_id: &str,
        language: &str,
        source_code: &str,
    ) -> Result<Session> {
        let language = Language::parse(language)?;
        let session = self.sessions.get_session_by_id(session_id).await?;
        if !session.is_active() {
            return Err(SessionError::Forbidden(format!(
                "Session {} is closed",
                session_id
            )));
        }

        self.autosave.save(&session, language, source_code).await?;
        Ok(session)
    }

    /// Close a session. Terminal: further runs and edits are rejected.
    pub async fn close_session(&self, session_id: &str) -> Result<Session> {
        self.autosave.discard(session_id);
        Ok(self.sessions.close_session(session_id).await?)
    }

    /// Submit the session's current code for execution.
    ///
    /// Guard order is deliberate: exclusivity first, because an
    /// in-progress execution is a more specific rejection than a generic
    /// throttle; then rate limit, then cooldown. Nothing is persisted
    /// until all guards pass.
    pub async fn run(&self, session_id: &str) -> Result<Execution> {
        let session = self.sessions.get_session_by_id(session_id).await?;
        if !session.is_active() {
            return Err(SessionError::Forbidden(format!(
                "Session {} is closed",
                session_id
            )));
        }

        // Fast-path exclusivity check; the atomic uniqueness check inside
        // create_execution below remains the source of truth.
        if let Some(active) = self.executions.get_active_execution(session_id).await? {
            return Err(SessionError::Conflict(format!(
                "An execution is already in progress for this session: {}",
                active.id
            )));
        }

        let rate_key = format!("run-rate:{}", session_id);
        let count = self
            .guards
            .increment(&rate_key, self.limits.rate_window)
            .await?;
        if count > self.limits.max_requests_per_window {
            return Err(SessionError::TooManyRequests(format!(
                "Rate limit exceeded: at most {} runs per minute",
                self.limits.max_requests_per_window
            )));
        }

        let cooldown_key = format!("run-cooldown:{}", session_id);
        if self.limits.cooldown_between_runs > Duration::ZERO {
            let acquired = self
                .guards
                .set_marker(&cooldown_key, self.limits.cooldown_between_runs)
                .await?;
            if !acquired {
                let remaining = self
                    .guards
                    .marker_ttl(&cooldown_key)
                    .await?
                    .unwrap_or(self.limits.cooldown_between_runs);
                return Err(SessionError::TooManyRequests(format!(
                    "Please wait {} seconds between runs",
                    remaining.as_secs_f64().ceil() as u64
                )));
            }
        }

        let execution_id = Uuid::new_v4().to_string();
        let execution = self
            .executions
            .create_execution(&execution_id, session_id, &session.source_code)
            .await?;

        let job = ExecutionJob::new(
            &execution.id,
            session_id,
            &execution.source_code,
            session.language,
        );
        if let Err(e) = self.queue.enqueue(job).await {
            // The record exists but will never run; settle it instead of
            // leaving a phantom active execution blocking the session.
            warn!("Enqueue failed for execution {}: {}", execution.id, e);
            let _ = self
                .executions
                .update_status(
                    &execution.id,
                    ExecutionStatus::Failed,
                    ExecutionUpdate {
                        error_message: Some(FAILED_ENQUEUE_MESSAGE.to_string()),
                        ..Default::default()
                    },
                )
                .await;
            return Err(e.into());
        }

        info!(
            "Execution {} queued for session {}",
            execution.id, session_id
        );
        Ok(execution)
    }

    pub async fn get_execution_result(&self, execution_id: &str) -> Result<Execution> {
        Ok(self.executions.get_by_id(execution_id).await?)
    }

    pub fn queue(&self) -> Arc<JobQueue> {
        self.queue.clone()
    }
}
