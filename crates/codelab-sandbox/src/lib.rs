pub mod result;
pub mod runner;

pub use result::{
    KilledReason, SandboxResult, LAUNCH_FAILURE_MESSAGE, OUTPUT_LIMIT_MESSAGE, TIMEOUT_MESSAGE,
};
pub use runner::SandboxRunner;

/// Default wall-clock budget for one execution.
pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;

/// Default best-effort memory ceiling handed to the language registry.
pub const DEFAULT_MEMORY_MB: u64 = 128;

/// Combined stdout/stderr cap. A program exceeding it is killed on the
/// spot, before the timeout would fire.
pub const MAX_OUTPUT_SIZE: usize = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct SandboxLimits {
    pub timeout_ms: u64,
    pub memory_limit_mb: u64,
    pub max_output_bytes: usize,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            memory_limit_mb: DEFAULT_MEMORY_MB,
            max_output_bytes: MAX_OUTPUT_SIZE,
        }
    }
}
