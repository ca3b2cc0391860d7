//! Admin user management: listing accounts and granting points.

use actix_web::{HttpResponse, web};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::{
    AppState,
    auth_middleware::AuthMiddleware,
    error::ApiResult,
    handlers::{
        admin::{guard::admin_guard, window},
        data::GrantPointsRequest,
    },
    models::{USER_COLUMNS, User},
    services::PointsService,
};

#[derive(Debug, Deserialize)]
pub struct AdminUsersQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// `GET /api/admin/users?limit=&offset=`. Password hashes are never serialized.
#[tracing::instrument(skip(user, app_state), fields(user_id = %user.id))]
pub async fn get_users(
    user: AuthMiddleware,
    app_state: web::Data<AppState>,
    web::Query(query): web::Query<AdminUsersQuery>,
) -> ApiResult<HttpResponse> {
    if let Err(resp) = admin_guard(&user) {
        return Ok(resp);
    }

    let (limit, offset) = window(query.limit, query.offset);
    let sql = format!("SELECT {USER_COLUMNS} FROM users ORDER BY created_at DESC LIMIT $1 OFFSET $2");
    let users = sqlx::query_as::<_, User>(&sql)
        .bind(limit)
        .bind(offset)
        .fetch_all(app_state.db.as_ref())
        .await
        .map_err(|e| {
            log::error!("Failed to list users: {}", e);
            e
        })?;

    Ok(HttpResponse::Ok().json(users))
}

/// `POST /api/admin/users/{id}/points`
#[tracing::instrument(skip(user, app_state, payload), fields(user_id = %user.id, amount = payload.amount))]
pub async fn grant_points(
    user: AuthMiddleware,
    app_state: web::Data<AppState>,
    path: web::Path<Uuid>,
    payload: web::Json<GrantPointsRequest>,
) -> ApiResult<HttpResponse> {
    if let Err(resp) = admin_guard(&user) {
        return Ok(resp);
    }
    payload.validate()?;

    let GrantPointsRequest { amount, note } = payload.into_inner();
    let receipt =
        PointsService::admin_grant(&app_state.db, user.id, path.into_inner(), amount, note.as_deref())
            .await?;
    Ok(HttpResponse::Ok().json(receipt))
}
