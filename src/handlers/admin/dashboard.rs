//! Marketplace-wide counters for the admin dashboard.

use actix_web::{HttpResponse, web};
use serde::Serialize;
use sqlx::{FromRow, PgPool};

use crate::{
    AppState, auth_middleware::AuthMiddleware, error::ApiResult,
    handlers::admin::guard::admin_guard,
};

#[derive(Debug, Serialize, FromRow)]
pub struct DashboardStats {
    pub users: i64,
    pub ads: i64,
    pub active_ads: i64,
    pub messages: i64,
    /// Sum of every user's balance
    pub points_in_circulation: i64,
    /// Users with an open event stream on this instance
    #[sqlx(skip)]
    pub online_users: usize,
}

/// `GET /api/admin/dashboard`
#[tracing::instrument(skip(user, app_state), fields(user_id = %user.id))]
pub async fn get_dashboard(
    user: AuthMiddleware,
    app_state: web::Data<AppState>,
) -> ApiResult<HttpResponse> {
    if let Err(resp) = admin_guard(&user) {
        return Ok(resp);
    }

    let mut stats = load_stats(&app_state.db).await.map_err(|e| {
        log::error!("Failed to load dashboard stats: {}", e);
        e
    })?;
    stats.online_users = app_state.chat.connected_users();
    Ok(HttpResponse::Ok().json(stats))
}

async fn load_stats(db: &PgPool) -> Result<DashboardStats, sqlx::Error> {
    sqlx::query_as::<_, DashboardStats>(
        r#"
        SELECT
            (SELECT COUNT(*) FROM users) AS users,
            (SELECT COUNT(*) FROM ads) AS ads,
            (SELECT COUNT(*) FROM ads WHERE status = 'active') AS active_ads,
            (SELECT COUNT(*) FROM messages) AS messages,
            (SELECT COALESCE(SUM(points), 0)::BIGINT FROM users) AS points_in_circulation
        "#,
    )
    .fetch_one(db)
    .await
}
