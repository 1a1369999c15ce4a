use codelab_queue::{QueueOptions, WorkerOptions};
use codelab_sandbox::SandboxLimits;
use codelab_session::{AutosaveOptions, RunLimits};

/// Full service configuration. Every knob has a production default; the
/// binary only overrides the listen address from the command line.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub enable_cors: bool,
    pub sandbox: SandboxLimits,
    pub autosave: AutosaveOptions,
    pub run_limits: RunLimits,
    pub queue: QueueOptions,
    pub worker: WorkerOptions,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            enable_cors: true,
            sandbox: SandboxLimits::default(),
            autosave: AutosaveOptions::default(),
            run_limits: RunLimits::default(),
            queue: QueueOptions::default(),
            worker: WorkerOptions::default(),
        }
    }
}
