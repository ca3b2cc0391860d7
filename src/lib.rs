//! Library entry point for the rentwala backend.
//!
//! Exports all core modules for use in integration tests and by the main binary.

pub mod auth_middleware;
pub mod config;
pub mod db;
pub mod error;
pub mod geo;
pub mod handlers;
pub mod logging;
pub mod models;
pub mod pagination;
pub mod services;
pub mod telemetry;

pub use auth_middleware::{AuthMiddleware, UserContext};
pub use config::Settings;
pub use db::*;
pub use error::{ApiError, ApiResult};
pub use logging::{PgLogLayer, get_subscriber, init_subscriber};
pub use models::AppState;
pub use services::*;
