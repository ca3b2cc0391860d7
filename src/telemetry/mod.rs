//! Request-level observability.
//!
//! [`RequestLoggingMiddleware`] emits one structured event per request.
//! Those events reach stdout and `system_logs` through the subscriber built
//! in [`crate::logging`].

pub mod middleware;

pub use middleware::{RequestLoggingMiddleware, level_for_status};
