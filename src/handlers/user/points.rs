//! Points balance, ledger, and peer transfers.

use actix_web::{HttpResponse, web};
use serde::Serialize;
use uuid::Uuid;
use validator::Validate;

use crate::{
    AppState,
    auth_middleware::AuthMiddleware,
    error::ApiResult,
    handlers::data::TransferPointsRequest,
    services::PointsService,
};

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub user_id: Uuid,
    pub points: i64,
}

/// `GET /api/user/points`
#[tracing::instrument(skip(user, app_state), fields(user_id = %user.id))]
pub async fn my_points(
    user: AuthMiddleware,
    app_state: web::Data<AppState>,
) -> ApiResult<HttpResponse> {
    let points = PointsService::balance(&app_state.db, user.id).await?;
    Ok(HttpResponse::Ok().json(BalanceResponse { user_id: user.id, points }))
}

/// `GET /api/user/transactions`
#[tracing::instrument(skip(user, app_state), fields(user_id = %user.id))]
pub async fn transactions(
    user: AuthMiddleware,
    app_state: web::Data<AppState>,
) -> ApiResult<HttpResponse> {
    let entries = PointsService::history(&app_state.db, user.id).await?;
    Ok(HttpResponse::Ok().json(entries))
}

/// `POST /api/user/transfer-points`
#[tracing::instrument(
    skip(user, app_state, payload),
    fields(user_id = %user.id, to_user_id = %payload.to_user_id, amount = payload.amount)
)]
pub async fn transfer_points(
    user: AuthMiddleware,
    app_state: web::Data<AppState>,
    payload: web::Json<TransferPointsRequest>,
) -> ApiResult<HttpResponse> {
    payload.validate()?;
    let TransferPointsRequest { to_user_id, amount, note } = payload.into_inner();
    let receipt =
        PointsService::transfer(&app_state, user.id, to_user_id, amount, note.as_deref()).await?;
    Ok(HttpResponse::Ok().json(receipt))
}

/// `GET /api/user/{user_id}/points`. Public.
#[tracing::instrument(skip(app_state))]
pub async fn user_points(
    app_state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> ApiResult<HttpResponse> {
    let points = PointsService::public_points(&app_state.db, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(points))
}
