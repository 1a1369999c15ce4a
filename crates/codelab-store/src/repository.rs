use crate::error::Result;
use crate::model::{Execution, ExecutionStatus, ExecutionUpdate, Session};
use async_trait::async_trait;
use codelab_language::Language;

/// Narrow persistence contract for sessions. Schema and migration
/// mechanics live behind this seam.
#[cfg_attr(feature = "mocks", mockall::automock)]
#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn create_session(&self, session: Session) -> Result<Session>;

    async fn get_session_by_id(&self, session_id: &str) -> Result<Session>;

    async fn update_session(
        &self,
        session_id: &str,
        language: Language,
        source_code: &str,
    ) -> Result<Session>;

    async fn close_session(&self, session_id: &str) -> Result<Session>;
}

/// Persistence contract for execution lifecycle records.
#[cfg_attr(feature = "mocks", mockall::automock)]
#[async_trait]
pub trait ExecutionRepository: Send + Sync {
    /// Create a QUEUED execution. Fails with `StoreError::Conflict` when a
    /// non-terminal execution already exists for the session; the check
    /// and the insert are atomic at this layer, which makes it the source
    /// of truth for the exclusivity invariant.
    async fn create_execution(
        &self,
        id: &str,
        session_id: &str,
        source_code: &str,
    ) -> Result<Execution>;

    /// Transition an execution and merge `fields`. Stamps `started_at` on
    /// the move to RUNNING and `completed_at` on any terminal move.
    /// Writes against an already-terminal execution are rejected.
    async fn update_status(
        &self,
        id: &str,
        status: ExecutionStatus,
        fields: ExecutionUpdate,
    ) -> Result<Execution>;

    /// Most recent non-terminal execution for the session, if any.
    async fn get_active_execution(&self, session_id: &str) -> Result<Option<Execution>>;

    async fn get_by_id(&self, id: &str) -> Result<Execution>;
}
