//! Google ID token verification.
//!
//! Tokens are checked against Google's `tokeninfo` endpoint, then the
//! audience and verified-email claims are validated locally.

use reqwest::Client;
use serde::Deserialize;

use crate::error::{ApiError, ApiResult};

const TOKENINFO_URL: &str = "https://oauth2.googleapis.com/tokeninfo";

/// Claims returned by `tokeninfo`. Google encodes booleans as strings here,
/// so `email_verified` is kept as raw JSON.
#[derive(Debug, Clone, Deserialize)]
pub struct GoogleClaims {
    pub aud: String,
    pub sub: String,
    pub email: String,
    #[serde(default)]
    pub email_verified: serde_json::Value,
    pub name: Option<String>,
    pub picture: Option<String>,
}

/// A Google account that passed verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoogleIdentity {
    pub google_id: String,
    pub email: String,
    pub name: Option<String>,
    pub picture: Option<String>,
}

#[derive(Debug)]
pub struct GoogleVerifier {
    client_id: Option<String>,
    http: Client,
}

impl GoogleVerifier {
    pub fn new(client_id: Option<String>) -> Self {
        Self { client_id, http: Client::new() }
    }

    pub fn is_enabled(&self) -> bool {
        self.client_id.is_some()
    }

    /// Verifies `id_token` with Google.
    ///
    /// # Errors
    /// * 503 when no client id is configured
    /// * 401 when Google rejects the token or its claims do not match
    /// * 502 when Google cannot be reached
    pub async fn verify(&self, id_token: &str) -> ApiResult<GoogleIdentity> {
        let client_id = self
            .client_id
            .as_deref()
            .ok_or_else(|| ApiError::Unavailable("Google sign-in is not configured".into()))?;

        let res = self
            .http
            .get(TOKENINFO_URL)
            .query(&[("id_token", id_token)])
            .send()
            .await?;

        if !res.status().is_success() {
            tracing::warn!(status = %res.status(), "Google rejected ID token");
            return Err(ApiError::unauthorized("Invalid Google token"));
        }

        let claims: GoogleClaims = res.json().await.map_err(|e| {
            tracing::error!(error = ?e, "Failed to parse Google tokeninfo response");
            ApiError::Upstream(format!("invalid tokeninfo response: {e}"))
        })?;

        check_claims(claims, client_id)
    }
}

/// Audience must be ours and the email verified.
pub fn check_claims(claims: GoogleClaims, client_id: &str) -> ApiResult<GoogleIdentity> {
    if claims.aud != client_id {
        tracing::warn!(aud = %claims.aud, "Google token issued for another client");
        return Err(ApiError::unauthorized("Invalid Google token"));
    }

    let verified = match &claims.email_verified {
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::String(s) => s.eq_ignore_ascii_case("true"),
        _ => false,
    };
    if !verified {
        return Err(ApiError::unauthorized("Google email is not verified"));
    }

    Ok(GoogleIdentity {
        google_id: claims.sub,
        email: claims.email.to_lowercase(),
        name: claims.name,
        picture: claims.picture,
    })
}
