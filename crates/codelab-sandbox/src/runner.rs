use crate::result::{LAUNCH_FAILURE_MESSAGE, OUTPUT_LIMIT_MESSAGE, TIMEOUT_MESSAGE};
use crate::{KilledReason, SandboxLimits, SandboxResult};
use codelab_language::{Invocation, Language, LanguageConfig};
use std::path::Path;
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::time::{sleep_until, Duration, Instant};
use tracing::{debug, warn};

/// Executes one source snapshot in one subprocess with enforced timeout,
/// output cap and best-effort memory ceiling.
///
/// `run` never returns an error: every failure path, including a failed
/// launch, is folded into a `SandboxResult` so the worker has no exception
/// boundary to reason about when executing untrusted code.
pub struct SandboxRunner {
    limits: SandboxLimits,
}

impl SandboxRunner {
    pub fn new(limits: SandboxLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &SandboxLimits {
        &self.limits
    }

    pub async fn run(&self, source_code: &str, language: Language) -> SandboxResult {
        let config = LanguageConfig::resolve(language);
        let invocation = config.build_invocation(source_code, self.limits.memory_limit_mb);

        // The working directory is removed on every exit path: the guard
        // drops whether the run completes, times out or fails to launch.
        let workdir = match tempfile::tempdir() {
            Ok(dir) => dir,
            Err(e) => {
                warn!("Failed to create sandbox working directory: {}", e);
                return SandboxResult::launch_failure();
            }
        };

        if let Some(file) = &invocation.source_file {
            let path = workdir.path().join(&file.name);
            if let Err(e) = tokio::fs::write(&path, &file.contents).await {
                warn!("Failed to materialize source file: {}", e);
                return SandboxResult::launch_failure();
            }
        }

        debug!(
            "Running {} sandbox (timeout {}ms, memory {}MB)",
            language, self.limits.timeout_ms, self.limits.memory_limit_mb
        );

        self.execute(&invocation, workdir.path()).await
    }

    /// Spawn and supervise the subprocess. Arguments are passed as a
    /// vector, never through a shell, so user-controlled code content
    /// cannot inject into the command line.
    async fn execute(&self, invocation: &Invocation, workdir: &Path) -> SandboxResult {
        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!("Failed to spawn {}: {}", invocation.program, e);
                return SandboxResult::launch_failure();
            }
        };

        let (Some(mut stdout), Some(mut stderr)) = (child.stdout.take(), child.stderr.take())
        else {
            let _ = child.start_kill();
            return SandboxResult::launch_failure();
        };

        let deadline = Instant::now() + Duration::from_millis(self.limits.timeout_ms);
        let max_output = self.limits.max_output_bytes;

        let mut stdout_buf: Vec<u8> = Vec::new();
        let mut stderr_buf: Vec<u8> = Vec::new();
        let mut stdout_chunk = [0u8; 8192];
        let mut stderr_chunk = [0u8; 8192];
        let mut stdout_open = true;
        let mut stderr_open = true;
        let mut killed = KilledReason::None;

        let exit_status = loop {
            // Kill the instant either stream overruns the cap, so an
            // unbounded-output program cannot exhaust memory before the
            // timeout fires.
            if stdout_buf.len() + stderr_buf.len() > max_output {
                let _ = child.start_kill();
                killed = KilledReason::OutputLimit;
                break None;
            }

            tokio::select! {
                _ = sleep_until(deadline) => {
                    // SIGKILL: the sandboxed program is untrusted and must
                    // not be able to ignore a softer signal.
                    let _ = child.start_kill();
                    killed = KilledReason::Timeout;
                    break None;
                }
                read = stdout.read(&mut stdout_chunk), if stdout_open => match read {
                    Ok(0) | Err(_) => stdout_open = false,
                    Ok(n) => stdout_buf.extend_from_slice(&stdout_chunk[..n]),
                },
                read = stderr.read(&mut stderr_chunk), if stderr_open => match read {
                    Ok(0) | Err(_) => stderr_open = false,
                    Ok(n) => stderr_buf.extend_from_slice(&stderr_chunk[..n]),
                },
                status = child.wait(), if !stdout_open && !stderr_open => {
                    break status.ok();
                }
            }
        };

        // Reap a killed child so it does not linger as a zombie.
        if killed != KilledReason::None {
            let _ = tokio::time::timeout(Duration::from_secs(1), child.wait()).await;
        }

        stdout_buf.truncate(max_output);
        stderr_buf.truncate(max_output);

        let stdout = String::from_utf8_lossy(&stdout_buf).into_owned();
        let stderr = match killed {
            KilledReason::Timeout => TIMEOUT_MESSAGE.to_string(),
            KilledReason::OutputLimit => {
                if stderr_buf.is_empty() {
                    OUTPUT_LIMIT_MESSAGE.to_string()
                } else {
                    String::from_utf8_lossy(&stderr_buf).into_owned()
                }
            }
            KilledReason::None => String::from_utf8_lossy(&stderr_buf).into_owned(),
        };

        let exit_code = exit_status.and_then(|status| status.code()).unwrap_or(-1);

        SandboxResult {
            stdout,
            stderr,
            exit_code,
            killed_reason: killed,
        }
    }
}

impl Default for SandboxRunner {
    fn default() -> Self {
        Self::new(SandboxLimits::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner(timeout_ms: u64, max_output_bytes: usize) -> SandboxRunner {
        SandboxRunner::new(SandboxLimits {
            timeout_ms,
            memory_limit_mb: 128,
            max_output_bytes,
        })
    }

    #[tokio::test]
    async fn test_python_hello_world() {
        let result = runner(5_000, MAX_OUTPUT)
            .run("print('hello from sandbox')", Language::Python)
            .await;

        assert_eq!(result.killed_reason, KilledReason::None);
        assert_eq!(result.exit_code, 0);
        assert!(result.stdout.contains("hello from sandbox"));
        assert!(result.stderr.is_empty());
    }

    #[tokio::test]
    async fn test_nonzero_exit_code_is_reported() {
        let result = runner(5_000, MAX_OUTPUT)
            .run("import sys\nsys.exit(3)", Language::Python)
            .await;

        assert_eq!(result.exit_code, 3);
        assert_eq!(result.killed_reason, KilledReason::None);
    }

    #[tokio::test]
    async fn test_stderr_is_captured() {
        let result = runner(5_000, MAX_OUTPUT)
            .run("import sys\nprint('boom', file=sys.stderr)", Language::Python)
            .await;

        assert_eq!(result.exit_code, 0);
        assert!(result.stderr.contains("boom"));
    }

    #[tokio::test]
    async fn test_infinite_loop_is_killed_on_timeout() {
        let started = std::time::Instant::now();
        let result = runner(500, MAX_OUTPUT)
            .run("while True:\n    pass", Language::Python)
            .await;

        assert_eq!(result.killed_reason, KilledReason::Timeout);
        assert_eq!(result.stderr, "Execution timed out");
        assert!(started.elapsed() < std::time::Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_unbounded_output_is_killed_at_cap() {
        let cap = 64 * 1024;
        let result = runner(10_000, cap)
            .run(
                "while True:\n    print('x' * 1024)",
                Language::Python,
            )
            .await;

        assert_eq!(result.killed_reason, KilledReason::OutputLimit);
        // Truncated to the cap, plus at most one in-flight chunk.
        assert!(result.stdout.len() <= cap);
    }

    #[tokio::test]
    async fn test_launch_failure_is_sanitized() {
        let invocation = Invocation {
            program: "codelab-no-such-binary".to_string(),
            args: vec![],
            source_file: None,
        };
        let workdir = tempfile::tempdir().unwrap();

        let result = runner(1_000, MAX_OUTPUT)
            .execute(&invocation, workdir.path())
            .await;

        assert_eq!(result.exit_code, -1);
        assert_eq!(result.stderr, "Unable to execute code");
        assert!(!result.stderr.contains("codelab-no-such-binary"));
        assert!(result.stdout.is_empty());
    }

    const MAX_OUTPUT: usize = crate::MAX_OUTPUT_SIZE;
}
