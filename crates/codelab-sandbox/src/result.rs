/// Why a subprocess was forcibly terminated, if it was.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KilledReason {
    None,
    Timeout,
    OutputLimit,
}

/// Outcome of one sandboxed run. Ephemeral: the worker classifies it into
/// a terminal execution status, it is never persisted as-is.
///
/// Launch failures are encoded here too (empty stdout, sanitized stderr,
/// exit code -1) so the runner never has an error channel.
#[derive(Debug, Clone)]
pub struct SandboxResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub killed_reason: KilledReason,
}

/// Sanitized messages surfaced to the submitter in place of internals.
pub const LAUNCH_FAILURE_MESSAGE: &str = "Unable to execute code";
pub const TIMEOUT_MESSAGE: &str = "Execution timed out";
pub const OUTPUT_LIMIT_MESSAGE: &str = "Output limit exceeded";

impl SandboxResult {
    /// Sanitized result for any subprocess-launch failure. The underlying
    /// command, path and OS error text must not leak to the submitter.
    pub(crate) fn launch_failure() -> Self {
        Self {
            stdout: String::new(),
            stderr: LAUNCH_FAILURE_MESSAGE.to_string(),
            exit_code: -1,
            killed_reason: KilledReason::None,
        }
    }

    pub fn timed_out(&self) -> bool {
        self.killed_reason == KilledReason::Timeout
    }
}
