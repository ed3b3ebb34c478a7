//! Axum HTTP API server.
//!
//! This crate provides:
//! - Story intake, dispatching generation jobs in the background
//! - The generation webhook that records job outcomes
//! - Progress and manual completion checks
//! - Rate limiting and Prometheus metrics

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
