//! Account and session management.
//!
//! Passwords are stored as argon2 PHC strings. Sessions are opaque random
//! tokens handed to the client once; only their SHA-256 digest is persisted,
//! so a leaked `sessions` table cannot be replayed.

use actix_web::cookie::{Cookie, SameSite, time::Duration};
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::{
    AppState,
    config::Settings,
    error::{ApiError, ApiResult},
    handlers::data::UpdateProfileRequest,
    models::{Role, TransactionKind, USER_COLUMNS, User, UserLocation},
    services::{GoogleIdentity, PointsService},
};

/// Name of the cookie carrying the session token.
pub const SESSION_COOKIE: &str = "session_token";

/// Hashes a password with a fresh random salt.
pub fn hash_password(password: &str) -> ApiResult<String> {
    let salt_bytes: [u8; 16] = rand::random();
    let salt = SaltString::encode_b64(&salt_bytes)
        .map_err(|e| ApiError::Internal(format!("salt encoding failed: {e}")))?;
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ApiError::Internal(format!("password hashing failed: {e}")))
}

/// Checks `password` against a stored PHC string. Malformed hashes never match.
pub fn verify_password(password: &str, phc: &str) -> bool {
    PasswordHash::new(phc)
        .map(|parsed| Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok())
        .unwrap_or(false)
}

/// 32 random bytes, hex encoded.
pub fn generate_session_token() -> String {
    hex::encode(rand::random::<[u8; 32]>())
}

/// Digest stored in `sessions.token_hash`.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Cookie holding a freshly issued session.
pub fn session_cookie(settings: &Settings, token: &str) -> Cookie<'static> {
    build_cookie(settings, token.to_string(), Duration::days(settings.session_ttl_days))
}

/// Expired cookie that makes the browser forget the session.
pub fn clear_session_cookie(settings: &Settings) -> Cookie<'static> {
    build_cookie(settings, String::new(), Duration::ZERO)
}

fn build_cookie(settings: &Settings, value: String, max_age: Duration) -> Cookie<'static> {
    let same_site = if settings.cookie_secure { SameSite::None } else { SameSite::Lax };
    Cookie::build(SESSION_COOKIE, value)
        .path("/")
        .http_only(true)
        .secure(settings.cookie_secure)
        .same_site(same_site)
        .max_age(max_age)
        .finish()
}

/// An email account may be linked to one Google identity only.
fn check_google_link(linked: Option<&str>, incoming: &str) -> ApiResult<()> {
    match linked {
        Some(current) if current != incoming => Err(ApiError::Conflict(
            "This email is linked to a different Google account".into(),
        )),
        _ => Ok(()),
    }
}

pub struct AuthService;

impl AuthService {
    /// Creates a password account and credits the registration bonus.
    pub async fn register(
        state: &AppState,
        name: &str,
        email: &str,
        password: &str,
    ) -> ApiResult<User> {
        let email = email.trim().to_lowercase();
        if Self::find_by_email(&state.db, &email).await?.is_some() {
            return Err(ApiError::Conflict("Email already registered".into()));
        }

        let password_hash = hash_password(password)?;
        let role = Self::role_for(&state.settings, &email);

        let mut tx = state.db.begin().await?;
        let user_id = Self::insert_user(
            &mut tx,
            NewUser {
                name,
                email: &email,
                password_hash: Some(&password_hash),
                google_id: None,
                picture: None,
                role,
            },
        )
        .await?;
        let user =
            Self::grant_registration_bonus(&mut tx, user_id, state.settings.registration_bonus)
                .await?;
        tx.commit().await?;

        tracing::info!(user_id = %user.id, email = %user.email, "User registered");
        Ok(user)
    }

    /// Verifies email and password.
    pub async fn login(pool: &PgPool, email: &str, password: &str) -> ApiResult<User> {
        let email = email.trim().to_lowercase();
        let user = Self::find_by_email(pool, &email).await?;

        // unknown email and oauth-only accounts look the same as a bad password
        let Some(user) = user else {
            tracing::warn!(email = %email, "Login for unknown email");
            return Err(ApiError::unauthorized("Invalid credentials"));
        };
        let valid = user
            .password_hash
            .as_deref()
            .is_some_and(|phc| verify_password(password, phc));
        if !valid {
            tracing::warn!(user_id = %user.id, "Login with wrong password");
            return Err(ApiError::unauthorized("Invalid credentials"));
        }

        tracing::info!(user_id = %user.id, "User logged in");
        Ok(user)
    }

    /// Finds or creates the account behind a verified Google identity.
    ///
    /// Lookup order is google id, then email (linking the google id to an
    /// existing password account), then a new account with the bonus. An
    /// email already linked to another Google account is a conflict.
    pub async fn google_sign_in(state: &AppState, identity: GoogleIdentity) -> ApiResult<User> {
        let mut tx = state.db.begin().await?;

        let by_google = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE google_id = $1"
        ))
        .bind(&identity.google_id)
        .fetch_optional(&mut *tx)
        .await?;

        let existing = match by_google {
            Some(user) => Some(user.id),
            None => {
                let by_email = sqlx::query_as::<_, (Uuid, Option<String>)>(
                    "SELECT id, google_id FROM users WHERE email = $1",
                )
                .bind(&identity.email)
                .fetch_optional(&mut *tx)
                .await?;
                match by_email {
                    Some((user_id, linked)) => {
                        check_google_link(linked.as_deref(), &identity.google_id)?;
                        Some(user_id)
                    }
                    None => None,
                }
            }
        };

        let user = match existing {
            Some(user_id) => {
                let sql = format!(
                    "UPDATE users SET google_id = $2, \
                     name = COALESCE($3, name), picture = COALESCE($4, picture) \
                     WHERE id = $1 RETURNING {USER_COLUMNS}"
                );
                sqlx::query_as::<_, User>(&sql)
                    .bind(user_id)
                    .bind(&identity.google_id)
                    .bind(identity.name.as_deref())
                    .bind(identity.picture.as_deref())
                    .fetch_one(&mut *tx)
                    .await?
            }
            None => {
                let name = identity
                    .name
                    .clone()
                    .unwrap_or_else(|| identity.email.split('@').next().unwrap_or("User").to_string());
                let role = Self::role_for(&state.settings, &identity.email);
                let user_id = Self::insert_user(
                    &mut tx,
                    NewUser {
                        name: &name,
                        email: &identity.email,
                        password_hash: None,
                        google_id: Some(&identity.google_id),
                        picture: identity.picture.as_deref(),
                        role,
                    },
                )
                .await?;
                tracing::info!(user_id = %user_id, "User registered through Google");
                Self::grant_registration_bonus(&mut tx, user_id, state.settings.registration_bonus)
                    .await?
            }
        };

        tx.commit().await?;
        Ok(user)
    }

    /// Issues a session for `user_id` and returns the raw token.
    pub async fn create_session(
        pool: &PgPool,
        user_id: Uuid,
        ttl_days: i64,
    ) -> ApiResult<(String, DateTime<Utc>)> {
        let token = generate_session_token();
        let expires_at = Utc::now() + chrono::Duration::days(ttl_days);

        sqlx::query("INSERT INTO sessions (token_hash, user_id, expires_at) VALUES ($1, $2, $3)")
            .bind(hash_token(&token))
            .bind(user_id)
            .bind(expires_at)
            .execute(pool)
            .await?;

        Ok((token, expires_at))
    }

    /// Looks up the user behind `token`. Expired sessions are deleted.
    pub async fn resolve_session(pool: &PgPool, token: &str) -> ApiResult<User> {
        let token_hash = hash_token(token);
        let session: Option<(Uuid, DateTime<Utc>)> =
            sqlx::query_as("SELECT user_id, expires_at FROM sessions WHERE token_hash = $1")
                .bind(&token_hash)
                .fetch_optional(pool)
                .await?;

        let Some((user_id, expires_at)) = session else {
            return Err(ApiError::unauthorized("Invalid session"));
        };

        if expires_at <= Utc::now() {
            sqlx::query("DELETE FROM sessions WHERE token_hash = $1")
                .bind(&token_hash)
                .execute(pool)
                .await?;
            tracing::debug!(user_id = %user_id, "Removed expired session");
            return Err(ApiError::unauthorized("Session expired"));
        }

        sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(user_id)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| ApiError::unauthorized("Invalid session"))
    }

    pub async fn delete_session(pool: &PgPool, token: &str) -> ApiResult<()> {
        sqlx::query("DELETE FROM sessions WHERE token_hash = $1")
            .bind(hash_token(token))
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn find_by_id(pool: &PgPool, user_id: Uuid) -> ApiResult<User> {
        sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(user_id)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| ApiError::not_found("User not found"))
    }

    pub async fn update_location(
        pool: &PgPool,
        user_id: Uuid,
        location: &UserLocation,
    ) -> ApiResult<User> {
        let sql = format!(
            "UPDATE users SET city = $2, state = $3, pincode = $4, lat = $5, lng = $6 \
             WHERE id = $1 RETURNING {USER_COLUMNS}"
        );
        sqlx::query_as::<_, User>(&sql)
            .bind(user_id)
            .bind(location.city.as_deref())
            .bind(location.state.as_deref())
            .bind(location.pincode.as_deref())
            .bind(location.lat)
            .bind(location.lng)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| ApiError::not_found("User not found"))
    }

    /// Applies a partial profile update. An empty patch is rejected.
    pub async fn update_profile(
        pool: &PgPool,
        user_id: Uuid,
        patch: UpdateProfileRequest,
    ) -> ApiResult<User> {
        if patch.is_empty() {
            return Err(ApiError::bad_request("No fields to update"));
        }

        let mut qb = QueryBuilder::<Postgres>::new("UPDATE users SET id = id");
        if let Some(name) = patch.name {
            qb.push(", name = ").push_bind(name.trim().to_string());
        }
        if let Some(phone) = patch.phone {
            qb.push(", phone = ").push_bind(phone.trim().to_string());
        }
        if let Some(picture) = patch.picture {
            qb.push(", picture = ").push_bind(picture);
        }
        if let Some(location) = patch.location {
            let location = location.into_user_location();
            qb.push(", city = ")
                .push_bind(location.city)
                .push(", state = ")
                .push_bind(location.state)
                .push(", pincode = ")
                .push_bind(location.pincode)
                .push(", lat = ")
                .push_bind(location.lat)
                .push(", lng = ")
                .push_bind(location.lng);
        }
        qb.push(" WHERE id = ").push_bind(user_id);
        qb.push(format!(" RETURNING {USER_COLUMNS}"));

        let user = qb
            .build_query_as::<User>()
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| ApiError::not_found("User not found"))?;
        tracing::info!(user_id = %user_id, "Profile updated");
        Ok(user)
    }

    async fn find_by_email(pool: &PgPool, email: &str) -> ApiResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1"))
            .bind(email)
            .fetch_optional(pool)
            .await?;
        Ok(user)
    }

    fn role_for(settings: &Settings, email: &str) -> Role {
        if settings.is_admin_email(email) { Role::Admin } else { Role::User }
    }

    async fn insert_user(conn: &mut PgConnection, new: NewUser<'_>) -> ApiResult<Uuid> {
        let user_id = Uuid::new_v4();
        let inserted = sqlx::query(
            "INSERT INTO users (id, name, email, password_hash, google_id, picture, role) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(user_id)
        .bind(new.name)
        .bind(new.email)
        .bind(new.password_hash)
        .bind(new.google_id)
        .bind(new.picture)
        .bind(new.role.as_str())
        .execute(&mut *conn)
        .await;

        match inserted {
            Ok(_) => Ok(user_id),
            // lost a race with a concurrent registration
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(ApiError::Conflict("Email already registered".into()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn grant_registration_bonus(
        conn: &mut PgConnection,
        user_id: Uuid,
        bonus: i64,
    ) -> ApiResult<User> {
        if bonus > 0 {
            PointsService::credit(conn, user_id, bonus).await?;
            PointsService::record(
                conn,
                None,
                Some(user_id),
                bonus,
                TransactionKind::RegistrationBonus,
                Some("Welcome bonus"),
            )
            .await?;
        }
        let user = sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(user_id)
            .fetch_one(&mut *conn)
            .await?;
        Ok(user)
    }
}

struct NewUser<'a> {
    name: &'a str,
    email: &'a str,
    password_hash: Option<&'a str>,
    google_id: Option<&'a str>,
    picture: Option<&'a str>,
    role: Role,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hash_verifies_only_the_right_password() {
        let phc = hash_password("hunter22").unwrap();
        assert!(phc.starts_with("$argon2"));
        assert!(verify_password("hunter22", &phc));
        assert!(!verify_password("hunter23", &phc));
        assert!(!verify_password("hunter22", "not-a-phc-string"));
    }

    #[test]
    fn tokens_are_random_and_stored_hashed() {
        let a = generate_session_token();
        let b = generate_session_token();
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);

        let digest = hash_token(&a);
        assert_eq!(digest.len(), 64);
        assert_ne!(digest, a);
        assert_eq!(digest, hash_token(&a));
    }

    #[test]
    fn cookie_flags_follow_settings() {
        let mut settings = Settings::for_tests("postgres://localhost/test");
        let cookie = session_cookie(&settings, "abc");
        assert_eq!(cookie.name(), SESSION_COOKIE);
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(cookie.max_age(), Some(Duration::days(7)));
        assert_eq!(cookie.path(), Some("/"));

        settings.cookie_secure = true;
        let cookie = session_cookie(&settings, "abc");
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::None));

        let cleared = clear_session_cookie(&settings);
        assert_eq!(cleared.value(), "");
        assert_eq!(cleared.max_age(), Some(Duration::ZERO));
    }

    #[test]
    fn google_link_is_set_once() {
        assert!(check_google_link(None, "g-123").is_ok());
        assert!(check_google_link(Some("g-123"), "g-123").is_ok());

        let err = check_google_link(Some("g-123"), "g-999").unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
    }
}
