//! Image upload and local image serving.
//!
//! Uploads are raw request bodies (`Content-Type: image/*`), not multipart.

use actix_web::{
    HttpRequest, HttpResponse,
    http::header::{CACHE_CONTROL, CONTENT_TYPE},
    web,
};
use serde::Serialize;

use crate::{
    AppState,
    auth_middleware::AuthMiddleware,
    error::{ApiError, ApiResult},
    services::{MAX_IMAGE_BYTES, new_key, validate_image},
};

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub url: String,
    pub key: String,
}

/// `POST /api/uploads`
#[tracing::instrument(skip(user, data, req, body), fields(user_id = %user.id, size = body.len()))]
pub async fn upload_image(
    user: AuthMiddleware,
    data: web::Data<AppState>,
    req: HttpRequest,
    body: web::Bytes,
) -> ApiResult<HttpResponse> {
    let content_type = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let kind = validate_image(content_type, &body)?;
    let key = new_key(&kind);
    let url = data.images.put(&key, &body, &kind).await?;

    tracing::info!(key = %key, mime = kind.mime, "Image uploaded");
    Ok(HttpResponse::Created().json(UploadResponse { url, key }))
}

/// `GET /api/uploads/{key}`
pub async fn get_image(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let key = path.into_inner();
    let (bytes, mime) = data
        .images
        .get(&key)
        .await?
        .ok_or_else(|| ApiError::not_found("Image not found"))?;

    Ok(HttpResponse::Ok()
        .content_type(mime)
        .insert_header((CACHE_CONTROL, "public, max-age=31536000, immutable"))
        .body(bytes))
}

/// Registers `/api/uploads/*`. The payload limit sits just above the image
/// cap so oversized images get a JSON 413 from validation.
pub fn configure_upload_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/uploads")
            .app_data(web::PayloadConfig::new(MAX_IMAGE_BYTES + 64 * 1024))
            .route("", web::post().to(upload_image))
            .route("/{key}", web::get().to(get_image)),
    );
}
