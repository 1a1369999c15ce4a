pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod worker;

pub use config::ServerConfig;
pub use engine::Engine;
pub use error::ApiError;
pub use worker::ExecutionProcessor;
