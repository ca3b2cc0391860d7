//! Admin access to the `system_logs` table filled by the tracing log layer.

use actix_web::{HttpResponse, web};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::{
    AppState,
    auth_middleware::AuthMiddleware,
    error::{ApiError, ApiResult},
    handlers::admin::guard::admin_guard,
};

/// Accepted values of the `level` filter.
pub const LOG_LEVELS: &[&str] = &["ERROR", "WARN", "INFO", "DEBUG", "TRACE"];

const DEFAULT_LOG_LIMIT: i64 = 100;
const MAX_LOG_LIMIT: i64 = 1000;

/// Individual log entry with metadata and context.
#[derive(Debug, Serialize, FromRow)]
pub struct LogEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// ERROR, WARN, INFO, DEBUG or TRACE
    pub level: String,
    /// Component that emitted the event (`http`, `auth`, a module path, ...)
    pub source: String,
    pub message: String,
    pub user_id: Option<Uuid>,
    /// Remaining event fields
    pub context: Option<serde_json::Value>,
}

#[derive(Serialize)]
pub struct AdminLogsResponse {
    pub logs: Vec<LogEntry>,
    /// Number of logs matching the filters
    pub total_count: i64,
    pub page_size: usize,
    pub offset: i64,
}

/// Query parameters for log filtering and pagination.
#[derive(Debug, Default, Deserialize)]
pub struct LogQuery {
    pub level: Option<String>,
    pub source: Option<String>,
    pub user_id: Option<Uuid>,
    /// Default 100, max 1000
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

impl LogQuery {
    /// Uppercases the level and rejects unknown ones.
    fn normalize(mut self) -> ApiResult<Self> {
        if let Some(level) = self.level.take() {
            let level = level.trim().to_uppercase();
            if !level.is_empty() {
                if !LOG_LEVELS.contains(&level.as_str()) {
                    return Err(ApiError::bad_request(
                        "Invalid log level. Must be one of: ERROR, WARN, INFO, DEBUG, TRACE",
                    ));
                }
                self.level = Some(level);
            }
        }
        Ok(self)
    }
}

/// `GET /api/admin/logs?level=&source=&user_id=&limit=&offset=&start_date=&end_date=`
///
/// Newest first. Dates are RFC 3339.
#[tracing::instrument(skip(user, app_state, query), fields(user_id = %user.id))]
pub async fn get_admin_logs(
    user: AuthMiddleware,
    app_state: web::Data<AppState>,
    web::Query(query): web::Query<LogQuery>,
) -> ApiResult<HttpResponse> {
    if let Err(resp) = admin_guard(&user) {
        return Ok(resp);
    }

    let query = query.normalize()?;
    let limit = query.limit.unwrap_or(DEFAULT_LOG_LIMIT).clamp(1, MAX_LOG_LIMIT);
    let offset = query.offset.unwrap_or(0).max(0);

    let total_count = get_logs_count(&app_state.db, &query).await.map_err(|e| {
        log::error!("Failed to get logs count: {}", e);
        e
    })?;

    let logs = get_filtered_logs(&app_state.db, &query, limit, offset)
        .await
        .map_err(|e| {
            log::error!("Failed to get filtered logs: {}", e);
            e
        })?;

    Ok(HttpResponse::Ok().json(AdminLogsResponse {
        page_size: logs.len(),
        logs,
        total_count,
        offset,
    }))
}

const LOG_FILTER: &str = r#"
    WHERE ($1::TEXT IS NULL OR level = $1)
    AND ($2::TEXT IS NULL OR source = $2)
    AND ($3::UUID IS NULL OR user_id = $3)
    AND ($4::TIMESTAMPTZ IS NULL OR timestamp >= $4)
    AND ($5::TIMESTAMPTZ IS NULL OR timestamp <= $5)
"#;

async fn get_logs_count(db: &PgPool, query: &LogQuery) -> Result<i64, sqlx::Error> {
    let sql = format!("SELECT COUNT(*) FROM system_logs {LOG_FILTER}");
    sqlx::query_scalar::<_, i64>(&sql)
        .bind(query.level.as_deref())
        .bind(query.source.as_deref())
        .bind(query.user_id)
        .bind(query.start_date)
        .bind(query.end_date)
        .fetch_one(db)
        .await
}

async fn get_filtered_logs(
    db: &PgPool,
    query: &LogQuery,
    limit: i64,
    offset: i64,
) -> Result<Vec<LogEntry>, sqlx::Error> {
    let sql = format!(
        "SELECT id, timestamp, level, source, message, user_id, context \
         FROM system_logs {LOG_FILTER} ORDER BY timestamp DESC LIMIT $6 OFFSET $7"
    );
    sqlx::query_as::<_, LogEntry>(&sql)
        .bind(query.level.as_deref())
        .bind(query.source.as_deref())
        .bind(query.user_id)
        .bind(query.start_date)
        .bind(query.end_date)
        .bind(limit)
        .bind(offset)
        .fetch_all(db)
        .await
}
