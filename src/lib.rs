// Case Screener - asynchronous screening of legal case documents

pub mod config;
pub mod models;
pub mod types;
pub mod llm;
pub mod extraction;
pub mod matching;
pub mod assessment;
pub mod corpus;
pub mod queue;
pub mod routes;
pub mod utils;

// Re-exports for convenience
pub use config::Config;
pub use models::AppState;

pub fn create_router(state: AppState) -> axum::Router {
    routes::create_router(state)
}
