use chrono::{DateTime, Utc};
use codelab_language::Language;
use serde::{Deserialize, Serialize};

/// Payload of one queued execution. The execution id doubles as the job's
/// idempotency key: a retried submission with the same id is deduplicated
/// instead of double-queued.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionJob {
    pub execution_id: String,
    pub session_id: String,
    pub source_code: String,
    pub language: Language,
    pub timestamp: DateTime<Utc>,
}

impl ExecutionJob {
    pub fn new(
        execution_id: impl Into<String>,
        session_id: impl Into<String>,
        source_code: impl Into<String>,
        language: Language,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            session_id: session_id.into(),
            source_code: source_code.into(),
            language,
            timestamp: Utc::now(),
        }
    }
}
