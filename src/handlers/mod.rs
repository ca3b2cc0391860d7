//! HTTP handlers, grouped by area, and the route table that mounts them.

pub mod admin;
pub mod ads;
pub mod auth;
pub mod data;
pub mod health;
pub mod messages;
pub mod uploads;
pub mod user;

use actix_web::web;

use crate::error::ApiError;

/// Mounts every route of the API.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/api/health", web::get().to(health::health_check))
        .configure(auth::configure_auth_routes)
        .configure(user::configure_user_routes)
        .configure(ads::configure_ad_routes)
        .configure(uploads::configure_upload_routes)
        .configure(messages::configure_message_routes)
        .configure(admin::configure_admin_routes);
}

/// JSON body errors render as `{"error": ...}` with 400.
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(256 * 1024)
        .error_handler(|err, _req| ApiError::bad_request(err.to_string()).into())
}

/// Malformed query strings (non-numeric `page`, bad dates) are 400s.
pub fn query_config() -> web::QueryConfig {
    web::QueryConfig::default()
        .error_handler(|err, _req| ApiError::bad_request(err.to_string()).into())
}

/// Path segments that fail to parse, e.g. a malformed UUID, are 400s.
pub fn path_config() -> web::PathConfig {
    web::PathConfig::default()
        .error_handler(|err, _req| ApiError::bad_request(err.to_string()).into())
}
