use crate::api;
use crate::config::ServerConfig;
use crate::worker::ExecutionProcessor;
use anyhow::Context;
use codelab_queue::{JobQueue, Worker};
use codelab_sandbox::SandboxRunner;
use codelab_session::SessionService;
use codelab_store::{MemoryGuardStore, MemoryStore};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

/// Wires the store, queue, worker and session service together and owns
/// their lifecycle around the HTTP server.
pub struct Engine {
    config: ServerConfig,
    service: Arc<SessionService>,
    queue: Arc<JobQueue>,
    worker: Arc<Worker>,
    processor: Arc<ExecutionProcessor>,
}

impl Engine {
    pub fn new(config: ServerConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let guards = Arc::new(MemoryGuardStore::new());
        let queue = Arc::new(JobQueue::new(config.queue.clone()));
        let runner = Arc::new(SandboxRunner::new(config.sandbox.clone()));
        let processor = Arc::new(ExecutionProcessor::new(store.clone(), runner));
        let worker = Arc::new(Worker::new(queue.clone(), config.worker.clone()));
        let service = Arc::new(SessionService::new(
            store.clone(),
            store,
            guards,
            queue.clone(),
            config.autosave.clone(),
            config.run_limits.clone(),
        ));

        Self {
            config,
            service,
            queue,
            worker,
            processor,
        }
    }

    pub fn service(&self) -> Arc<SessionService> {
        self.service.clone()
    }

    /// Start draining the execution queue.
    pub fn start_worker(&self) -> anyhow::Result<()> {
        self.worker.start(
            self.processor.clone().handler(),
            self.processor.clone().failure_handler(),
        )?;
        Ok(())
    }

    /// Serve HTTP until `shutdown` resolves, then drain in-flight work.
    pub async fn run(
        &self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        self.start_worker()?;

        let addr = SocketAddr::new(
            self.config
                .host
                .parse()
                .context("invalid listen host")?,
            self.config.port,
        );

        let mut router = api::build_router(self.service.clone());
        if self.config.enable_cors {
            let cors = CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any);
            router = router.layer(cors);
        }

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {}", addr))?;
        info!("Listening on http://{}", addr);

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;

        self.shutdown().await;
        Ok(())
    }

    /// Stop accepting jobs and wait for in-flight executions to settle.
    pub async fn shutdown(&self) {
        info!("Shutting down: draining execution queue");
        self.queue.close();
        self.worker.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codelab_queue::WorkerOptions;
    use codelab_store::ExecutionStatus;
    use std::time::Duration;

    fn fast_config() -> ServerConfig {
        ServerConfig {
            run_limits: codelab_session::RunLimits {
                cooldown_between_runs: Duration::ZERO,
                ..Default::default()
            },
            worker: WorkerOptions {
                stalled_interval: Duration::from_millis(100),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_end_to_end_execution_flow() {
        let engine = Engine::new(fast_config());
        engine.start_worker().unwrap();
        let service = engine.service();

        let session = service.create_session("python").await.unwrap();
        let execution = service.run(&session.id).await.unwrap();

        let mut result = None;
        for _ in 0..100 {
            let current = service.get_execution_result(&execution.id).await.unwrap();
            if current.status.is_terminal() {
                result = Some(current);
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let result = result.expect("execution never reached a terminal state");
        assert_eq!(result.status, ExecutionStatus::Completed);
        assert_eq!(result.stdout.as_deref(), Some("Hello, World!\n"));
        assert_eq!(result.exit_code, Some(0));

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_session_becomes_runnable_again_after_completion() {
        let engine = Engine::new(fast_config());
        engine.start_worker().unwrap();
        let service = engine.service();

        let session = service.create_session("python").await.unwrap();

        for _ in 0..2 {
            let execution = service.run(&session.id).await.unwrap();
            for _ in 0..100 {
                let current = service.get_execution_result(&execution.id).await.unwrap();
                if current.status.is_terminal() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }

        engine.shutdown().await;
    }
}
