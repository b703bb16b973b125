#![deny(clippy::wildcard_imports)]
#![cfg_attr(test, allow(clippy::wildcard_imports))]

pub mod config;
pub mod domain;
pub mod error;
pub mod errors;
pub mod llm;
pub mod middleware;
pub mod routes;
pub mod services;
pub mod session;
pub mod state;
pub mod test_bootstrap;
pub mod ws;

// Re-exports for public API
pub use config::ExperimentConfig;
pub use error::AppError;
pub use errors::GameError;
pub use middleware::cors::cors_middleware;
pub use services::game_flow::{FlowPacing, GameFlowService};
pub use session::{Session, SessionRegistry};
pub use state::AppState;

// Auto-initialize logging for unit tests
#[cfg(test)]
#[ctor::ctor]
fn init_test_logging() {
    test_bootstrap::logging::init();
}
