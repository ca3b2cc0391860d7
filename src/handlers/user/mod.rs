//! User handler module organization.
//!
//! Re-exports the profile, listing, and points endpoints served under `/api/user`.
pub mod listings;
pub mod points;
pub mod profile;

use actix_web::web;

pub use self::{listings::*, points::*, profile::*};

/// Registers all user-related endpoints.
pub fn configure_user_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/user")
            // Profile management
            .route("/profile", web::put().to(update_profile))
            // Own listings and bookmarks
            .route("/ads", web::get().to(my_ads))
            .route("/saved-ads", web::get().to(saved_ads))
            // Points
            .route("/points", web::get().to(my_points))
            .route("/transactions", web::get().to(transactions))
            .route("/transfer-points", web::post().to(transfer_points))
            .route("/{user_id}/points", web::get().to(user_points)),
    );
}
