//! Admin moderation of ads.

use actix_web::{HttpResponse, web};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::{
    AppState,
    auth_middleware::AuthMiddleware,
    error::{ApiError, ApiResult},
    handlers::{
        admin::{guard::admin_guard, window},
        data::AdStatusRequest,
    },
    models::{AD_COLUMNS, Ad, AdStatus},
};

/// An ad with the owner's contact details, as moderators see it.
#[derive(Debug, Serialize, FromRow)]
pub struct AdminAd {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub ad: Ad,
    pub owner_name: String,
    pub owner_email: String,
}

#[derive(Debug, Deserialize)]
pub struct AdminAdsQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// `GET /api/admin/ads?status=&limit=&offset=`
#[tracing::instrument(skip(user, app_state), fields(user_id = %user.id))]
pub async fn get_ads(
    user: AuthMiddleware,
    app_state: web::Data<AppState>,
    web::Query(query): web::Query<AdminAdsQuery>,
) -> ApiResult<HttpResponse> {
    if let Err(resp) = admin_guard(&user) {
        return Ok(resp);
    }

    let status = match query.status.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => Some(
            AdStatus::parse(raw).ok_or_else(|| ApiError::bad_request(format!("Unknown status: {raw}")))?,
        ),
        None => None,
    };
    let (limit, offset) = window(query.limit, query.offset);

    let sql = format!(
        "SELECT {AD_COLUMNS}, u.name AS owner_name, u.email AS owner_email \
         FROM ads a JOIN users u ON u.id = a.owner_id \
         WHERE ($1::TEXT IS NULL OR a.status = $1) \
         ORDER BY a.created_at DESC LIMIT $2 OFFSET $3"
    );
    let ads = sqlx::query_as::<_, AdminAd>(&sql)
        .bind(status.map(|s| s.as_str()))
        .bind(limit)
        .bind(offset)
        .fetch_all(app_state.db.as_ref())
        .await?;

    Ok(HttpResponse::Ok().json(ads))
}

/// `PUT /api/admin/ads/{id}/status`
#[tracing::instrument(skip(user, app_state, payload), fields(user_id = %user.id, status = %payload.status))]
pub async fn put_ad_status(
    user: AuthMiddleware,
    app_state: web::Data<AppState>,
    path: web::Path<Uuid>,
    payload: web::Json<AdStatusRequest>,
) -> ApiResult<HttpResponse> {
    if let Err(resp) = admin_guard(&user) {
        return Ok(resp);
    }

    let ad_id = path.into_inner();
    let result = sqlx::query("UPDATE ads SET status = $2, updated_at = NOW() WHERE id = $1")
        .bind(ad_id)
        .bind(payload.status.as_str())
        .execute(app_state.db.as_ref())
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("Ad not found"));
    }

    tracing::info!(ad_id = %ad_id, status = %payload.status, "Ad status changed by admin");
    Ok(HttpResponse::Ok().json(serde_json::json!({ "message": "Status updated" })))
}
