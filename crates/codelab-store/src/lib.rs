pub mod error;
pub mod guard;
pub mod memory;
pub mod model;
pub mod repository;

pub use error::{Result, StoreError};
pub use guard::{GuardStore, MemoryGuardStore};
pub use memory::MemoryStore;
pub use model::{Execution, ExecutionStatus, ExecutionUpdate, Session, SessionStatus};
pub use repository::{ExecutionRepository, SessionRepository};

#[cfg(feature = "mocks")]
pub use repository::{MockExecutionRepository, MockSessionRepository};
#[cfg(feature = "mocks")]
pub use guard::MockGuardStore;
