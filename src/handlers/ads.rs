//! Ad endpoints: search, detail, create/update/delete, and bookmarks.

use actix_web::{HttpResponse, web};
use uuid::Uuid;
use validator::Validate;

use crate::{
    AppState,
    auth_middleware::AuthMiddleware,
    error::ApiResult,
    handlers::data::{AdSearch, CreateAdRequest, UpdateAdRequest},
    services::{AdService, SearchFilter},
};

/// `GET /api/ads`
#[tracing::instrument(skip_all)]
pub async fn search_ads(
    data: web::Data<AppState>,
    web::Query(query): web::Query<AdSearch>,
) -> ApiResult<HttpResponse> {
    let filter = SearchFilter::from_query(query)?;
    let page = AdService::search(&data.db, &filter).await?;
    Ok(HttpResponse::Ok().json(page))
}

/// `GET /api/ads/{id}`
#[tracing::instrument(skip(data))]
pub async fn get_ad(data: web::Data<AppState>, path: web::Path<Uuid>) -> ApiResult<HttpResponse> {
    let ad = AdService::get_and_count_view(&data.db, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ad))
}

/// `POST /api/ads`
#[tracing::instrument(skip(user, data, form), fields(user_id = %user.id, category = ?form.category))]
pub async fn create_ad(
    user: AuthMiddleware,
    data: web::Data<AppState>,
    form: web::Json<CreateAdRequest>,
) -> ApiResult<HttpResponse> {
    form.validate()?;
    let ad = AdService::create(&data, user.id, form.into_inner()).await?;
    Ok(HttpResponse::Created().json(ad))
}

/// `PUT /api/ads/{id}`
#[tracing::instrument(skip(user, data, form), fields(user_id = %user.id))]
pub async fn update_ad(
    user: AuthMiddleware,
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
    form: web::Json<UpdateAdRequest>,
) -> ApiResult<HttpResponse> {
    form.validate()?;
    let ad = AdService::update(&data.db, user.id, path.into_inner(), form.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ad))
}

/// `DELETE /api/ads/{id}`
#[tracing::instrument(skip(user, data), fields(user_id = %user.id))]
pub async fn delete_ad(
    user: AuthMiddleware,
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> ApiResult<HttpResponse> {
    AdService::delete(&data.db, user.id, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "message": "Ad deleted" })))
}

/// `POST /api/ads/{id}/save`
#[tracing::instrument(skip(user, data), fields(user_id = %user.id))]
pub async fn save_ad(
    user: AuthMiddleware,
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> ApiResult<HttpResponse> {
    let created = AdService::save(&data.db, user.id, path.into_inner()).await?;
    let message = if created { "Ad saved" } else { "Already saved" };
    Ok(HttpResponse::Ok().json(serde_json::json!({ "message": message })))
}

/// `DELETE /api/ads/{id}/save`
#[tracing::instrument(skip(user, data), fields(user_id = %user.id))]
pub async fn unsave_ad(
    user: AuthMiddleware,
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> ApiResult<HttpResponse> {
    AdService::unsave(&data.db, user.id, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "message": "Ad unsaved" })))
}

/// Registers `/api/ads/*`.
pub fn configure_ad_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/ads")
            .route("", web::get().to(search_ads))
            .route("", web::post().to(create_ad))
            .route("/{id}", web::get().to(get_ad))
            .route("/{id}", web::put().to(update_ad))
            .route("/{id}", web::delete().to(delete_ad))
            .route("/{id}/save", web::post().to(save_ad))
            .route("/{id}/save", web::delete().to(unsave_ad)),
    );
}
