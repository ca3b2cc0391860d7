//! Authentication endpoints: password and Google sign-in, session lifecycle.

use actix_web::{HttpRequest, HttpResponse, web};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{
    AppState,
    auth_middleware::{AuthMiddleware, session_token},
    error::ApiResult,
    handlers::data::{LocationInput, validate_not_blank},
    models::User,
    services::{AuthService, clear_session_cookie, session_cookie},
};

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(
        length(min = 1, max = 80, message = "Name must be 1-80 characters"),
        custom(function = "validate_not_blank")
    )]
    pub name: String,
    #[validate(email(message = "Invalid email"))]
    pub email: String,
    #[validate(length(min = 6, max = 128, message = "Password must be 6-128 characters"))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email(message = "Invalid email"))]
    pub email: String,
    #[validate(length(min = 1, max = 128))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct GoogleLoginRequest {
    #[validate(length(min = 1, max = 4096))]
    pub id_token: String,
}

/// Body returned by every sign-in endpoint.
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub user: User,
    pub session_token: String,
}

/// Issues a session for `user` and returns it both as a cookie and in the body.
async fn start_session(state: &AppState, user: User) -> ApiResult<HttpResponse> {
    let (token, _expires_at) =
        AuthService::create_session(&state.db, user.id, state.settings.session_ttl_days).await?;
    Ok(HttpResponse::Ok()
        .cookie(session_cookie(&state.settings, &token))
        .json(SessionResponse { user, session_token: token }))
}

/// `POST /api/auth/register`
#[tracing::instrument(skip(data, form), fields(email = %form.email))]
pub async fn register(
    data: web::Data<AppState>,
    form: web::Json<RegisterRequest>,
) -> ApiResult<HttpResponse> {
    form.validate()?;
    let user = AuthService::register(&data, form.name.trim(), &form.email, &form.password).await?;
    start_session(&data, user).await
}

/// `POST /api/auth/login`
#[tracing::instrument(skip(data, form), fields(email = %form.email))]
pub async fn login(
    data: web::Data<AppState>,
    form: web::Json<LoginRequest>,
) -> ApiResult<HttpResponse> {
    form.validate()?;
    let user = AuthService::login(&data.db, &form.email, &form.password).await?;
    start_session(&data, user).await
}

/// `POST /api/auth/google`
#[tracing::instrument(skip(data, form))]
pub async fn google_login(
    data: web::Data<AppState>,
    form: web::Json<GoogleLoginRequest>,
) -> ApiResult<HttpResponse> {
    form.validate()?;
    let identity = data.google.verify(&form.id_token).await?;
    let user = AuthService::google_sign_in(&data, identity).await?;
    tracing::info!(user_id = %user.id, "Google sign-in");
    start_session(&data, user).await
}

/// `GET /api/auth/me`
#[tracing::instrument(skip(user, data), fields(user_id = %user.id))]
pub async fn me(user: AuthMiddleware, data: web::Data<AppState>) -> ApiResult<HttpResponse> {
    let profile = AuthService::find_by_id(&data.db, user.id).await?;
    Ok(HttpResponse::Ok().json(profile))
}

/// `POST /api/auth/logout`. Works without a valid session so stale cookies
/// can always be cleared.
#[tracing::instrument(skip(req, data))]
pub async fn logout(req: HttpRequest, data: web::Data<AppState>) -> ApiResult<HttpResponse> {
    if let Some(token) = session_token(&req) {
        AuthService::delete_session(&data.db, &token).await?;
    }
    Ok(HttpResponse::Ok()
        .cookie(clear_session_cookie(&data.settings))
        .json(serde_json::json!({ "message": "Logged out" })))
}

/// `POST /api/auth/location`
#[tracing::instrument(skip(user, data, form), fields(user_id = %user.id))]
pub async fn update_location(
    user: AuthMiddleware,
    data: web::Data<AppState>,
    form: web::Json<LocationInput>,
) -> ApiResult<HttpResponse> {
    form.validate()?;
    let location = form.into_inner().into_user_location();
    let updated = AuthService::update_location(&data.db, user.id, &location).await?;
    Ok(HttpResponse::Ok().json(updated))
}

/// Registers `/api/auth/*`.
pub fn configure_auth_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/auth")
            .route("/register", web::post().to(register))
            .route("/login", web::post().to(login))
            .route("/google", web::post().to(google_login))
            .route("/me", web::get().to(me))
            .route("/logout", web::post().to(logout))
            .route("/location", web::post().to(update_location)),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_rules() {
        let ok = RegisterRequest {
            name: "Meera".into(),
            email: "meera@example.com".into(),
            password: "secret1".into(),
        };
        assert!(ok.validate().is_ok());

        let blank_name = RegisterRequest {
            name: "   ".into(),
            email: "meera@example.com".into(),
            password: "secret1".into(),
        };
        let errors = blank_name.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("name"));

        let short = RegisterRequest { password: "12345".into(), ..ok };
        assert!(short.validate().is_err());

        let bad_email = RegisterRequest {
            name: "Meera".into(),
            email: "meera.example.com".into(),
            password: "secret1".into(),
        };
        assert!(bad_email.validate().is_err());
    }
}
