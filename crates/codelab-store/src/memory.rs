use crate::error::{Result, StoreError};
use crate::model::{Execution, ExecutionStatus, ExecutionUpdate, Session, SessionStatus};
use crate::repository::{ExecutionRepository, SessionRepository};
use async_trait::async_trait;
use chrono::Utc;
use codelab_language::Language;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// In-memory store, useful for testing and single-instance development.
///
/// The executions map is guarded by one lock, so the duplicate-active scan
/// and the insert in `create_execution` happen atomically. That mirrors
/// the partial unique index a SQL backend would enforce.
pub struct MemoryStore {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
    executions: Arc<RwLock<HashMap<String, Execution>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            executions: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionRepository for MemoryStore {
    async fn create_session(&self, session: Session) -> Result<Session> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session.id) {
            return Err(StoreError::Conflict(format!(
                "Session already exists: {}",
                session.id
            )));
        }
        info!("Created session: {} ({})", session.id, session.language);
        sessions.insert(session.id.clone(), session.clone());
        Ok(session)
    }

    async fn get_session_by_id(&self, session_id: &str) -> Result<Session> {
        let sessions = self.sessions.read().await;
        sessions
            .get(session_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("Session not found: {}", session_id)))
    }

    async fn update_session(
        &self,
        session_id: &str,
        language: Language,
        source_code: &str,
    ) -> Result<Session> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| StoreError::NotFound(format!("Session not found: {}", session_id)))?;

        session.language = language;
        session.source_code = source_code.to_string();
        session.updated_at = Utc::now();
        debug!("Updated session: {}", session_id);
        Ok(session.clone())
    }

    async fn close_session(&self, session_id: &str) -> Result<Session> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| StoreError::NotFound(format!("Session not found: {}", session_id)))?;

        session.status = SessionStatus::Inactive;
        session.updated_at = Utc::now();
        info!("Closed session: {}", session_id);
        Ok(session.clone())
    }
}

#[async_trait]
impl ExecutionRepository for MemoryStore {
    async fn create_execution(
        &self,
        id: &str,
        session_id: &str,
        source_code: &str,
    ) -> Result<Execution> {
        let mut executions = self.executions.write().await;

        let active_exists = executions
            .values()
            .any(|e| e.session_id == session_id && !e.status.is_terminal());
        if active_exists {
            return Err(StoreError::Conflict(format!(
                "An execution is already in progress for session {}",
                session_id
            )));
        }

        let execution = Execution::new(id, session_id, source_code);
        executions.insert(execution.id.clone(), execution.clone());
        info!("Created execution {} for session {}", id, session_id);
        Ok(execution)
    }

    async fn update_status(
        &self,
        id: &str,
        status: ExecutionStatus,
        fields: ExecutionUpdate,
    ) -> Result<Execution> {
        let mut executions = self.executions.write().await;
        let execution = executions
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("Execution not found: {}", id)))?;

        if execution.status.is_terminal() {
            return Err(StoreError::InvalidTransition(format!(
                "Execution {} is already in terminal state {:?}",
                id, execution.status
            )));
        }

        if status == ExecutionStatus::Running && execution.started_at.is_none() {
            execution.started_at = Some(Utc::now());
        }
        if status.is_terminal() {
            execution.completed_at = Some(Utc::now());
        }

        execution.status = status;
        if let Some(stdout) = fields.stdout {
            execution.stdout = Some(stdout);
        }
        if let Some(stderr) = fields.stderr {
            execution.stderr = Some(stderr);
        }
        if let Some(exit_code) = fields.exit_code {
            execution.exit_code = Some(exit_code);
        }
        if let Some(error_message) = fields.error_message {
            execution.error_message = Some(error_message);
        }
        if let Some(execution_time_ms) = fields.execution_time_ms {
            execution.execution_time_ms = Some(execution_time_ms);
        }

        debug!("Execution {} -> {:?}", id, status);
        Ok(execution.clone())
    }

    async fn get_active_execution(&self, session_id: &str) -> Result<Option<Execution>> {
        let executions = self.executions.read().await;
        let active = executions
            .values()
            .filter(|e| e.session_id == session_id && !e.status.is_terminal())
            .max_by_key(|e| e.queued_at)
            .cloned();
        Ok(active)
    }

    async fn get_by_id(&self, id: &str) -> Result<Execution> {
        let executions = self.executions.read().await;
        executions
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("Execution not found: {}", id)))
    }
}
