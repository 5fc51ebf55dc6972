// CMM report API - course report generation requests for an Open edX host

pub mod catalog;
pub mod config;
pub mod db;
pub mod keys;
pub mod middleware;
pub mod models;
pub mod queue;
pub mod reports;
pub mod routes;
pub mod storage;
pub mod types;
pub mod validation;

// Re-exports for convenience
pub use config::Config;
pub use models::AppState;

pub fn create_router(state: AppState) -> axum::Router {
    routes::create_router(state)
}
