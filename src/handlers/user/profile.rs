//! User profile management endpoints.

use actix_web::{HttpResponse, web};
use validator::Validate;

use crate::{
    AppState, auth_middleware::AuthMiddleware, error::ApiResult,
    handlers::data::UpdateProfileRequest, services::AuthService,
};

/// `PUT /api/user/profile`
#[tracing::instrument(skip(user, app_state, payload), fields(user_id = %user.id, name = ?payload.name))]
pub async fn update_profile(
    user: AuthMiddleware,
    app_state: web::Data<AppState>,
    payload: web::Json<UpdateProfileRequest>,
) -> ApiResult<HttpResponse> {
    payload.validate()?;
    let updated = AuthService::update_profile(&app_state.db, user.id, payload.into_inner()).await?;
    Ok(HttpResponse::Ok().json(updated))
}
