//! The caller's own ads and saved ads.

use actix_web::{HttpResponse, web};

use crate::{AppState, auth_middleware::AuthMiddleware, error::ApiResult, services::AdService};

/// `GET /api/user/ads`: every ad the caller owns, any status, newest first.
#[tracing::instrument(skip(user, app_state), fields(user_id = %user.id))]
pub async fn my_ads(user: AuthMiddleware, app_state: web::Data<AppState>) -> ApiResult<HttpResponse> {
    let ads = AdService::mine(&app_state.db, user.id).await?;
    Ok(HttpResponse::Ok().json(ads))
}

/// `GET /api/user/saved-ads`
#[tracing::instrument(skip(user, app_state), fields(user_id = %user.id))]
pub async fn saved_ads(
    user: AuthMiddleware,
    app_state: web::Data<AppState>,
) -> ApiResult<HttpResponse> {
    let ads = AdService::saved(&app_state.db, user.id).await?;
    Ok(HttpResponse::Ok().json(ads))
}
