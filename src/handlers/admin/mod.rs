//! Admin handler module organization and route configuration.
//!
//! Every route here requires the admin role; handlers call
//! [`guard::admin_guard`] first and answer 403 otherwise.

pub mod ads;
pub mod dashboard;
pub mod guard;
pub mod logs;
pub mod users;

use actix_web::web;

/// Default page size of admin listings.
pub const DEFAULT_ADMIN_LIMIT: i64 = 50;
/// Largest page size of admin listings.
pub const MAX_ADMIN_LIMIT: i64 = 200;

/// Clamps `limit`/`offset` query values for admin listings.
pub fn window(limit: Option<i64>, offset: Option<i64>) -> (i64, i64) {
    (
        limit.unwrap_or(DEFAULT_ADMIN_LIMIT).clamp(1, MAX_ADMIN_LIMIT),
        offset.unwrap_or(0).max(0),
    )
}

/// Configures all administrative routes under the `/api/admin` scope.
///
/// ```text
/// /api/admin/
/// ├── GET  /dashboard            - marketplace counters
/// ├── GET  /ads                  - all ads with owner contact
/// ├── PUT  /ads/{id}/status      - moderate an ad
/// ├── GET  /users                - accounts
/// ├── POST /users/{id}/points    - grant points
/// └── GET  /logs                 - persisted log events
/// ```
pub fn configure_admin_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/admin")
            .route("/dashboard", web::get().to(dashboard::get_dashboard))
            // Ad moderation
            .route("/ads", web::get().to(ads::get_ads))
            .route("/ads/{id}/status", web::put().to(ads::put_ad_status))
            // User management
            .route("/users", web::get().to(users::get_users))
            .route("/users/{id}/points", web::post().to(users::grant_points))
            // System monitoring
            .route("/logs", web::get().to(logs::get_admin_logs)),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_defaults_and_clamps() {
        assert_eq!(window(None, None), (50, 0));
        assert_eq!(window(Some(1000), Some(-3)), (200, 0));
        assert_eq!(window(Some(0), Some(40)), (1, 40));
    }
}
