pub mod autosave;
pub mod error;
pub mod service;

pub use autosave::{AutosaveOptions, AutosaveScheduler};
pub use error::{Result, SessionError};
pub use service::{RunLimits, SessionService};
