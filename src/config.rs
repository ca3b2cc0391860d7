//! Runtime configuration loaded from the environment.
//!
//! Every value has a default except `DATABASE_URL`. Call [`Settings::from_env`]
//! after `dotenv().ok()` so that a local `.env` file is honoured.

use std::{env, path::PathBuf, str::FromStr};

use anyhow::{Context, bail};

/// Credentials for the optional Supabase Storage image backend.
#[derive(Debug, Clone)]
pub struct SupabaseStorageSettings {
    /// Supabase project URL, e.g. `https://xyz.supabase.co`
    pub url: String,
    /// Service role key used for uploads
    pub service_key: String,
    /// Public bucket that receives ad images
    pub bucket: String,
}

/// Application settings shared through [`crate::AppState`].
#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    /// Lowercased emails that resolve to the admin role
    pub admin_emails: Vec<String>,
    pub session_ttl_days: i64,
    /// Marks the session cookie `Secure; SameSite=None` when true
    pub cookie_secure: bool,
    /// Google OAuth client id. Google sign-in is disabled when `None`.
    pub google_client_id: Option<String>,
    pub upload_dir: PathBuf,
    /// Prefix prepended to locally served image URLs
    pub public_base_url: String,
    pub supabase: Option<SupabaseStorageSettings>,
    /// Points credited to every new account
    pub registration_bonus: i64,
    /// Points deducted when an ad is posted
    pub ad_post_cost: i64,
}

impl Settings {
    /// Reads all settings from environment variables.
    ///
    /// # Errors
    /// Fails when `DATABASE_URL` is missing or a numeric/boolean variable
    /// cannot be parsed.
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;

        let supabase = match (
            optional("SUPABASE_URL"),
            optional("SUPABASE_SERVICE_KEY"),
            optional("SUPABASE_BUCKET"),
        ) {
            (Some(url), Some(service_key), Some(bucket)) => Some(SupabaseStorageSettings {
                url: url.trim_end_matches('/').to_string(),
                service_key,
                bucket,
            }),
            _ => None,
        };

        let settings = Self {
            database_url,
            host: optional("HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: parse_or("PORT", 8080)?,
            cors_origins: optional("CORS_ORIGINS")
                .map(|v| split_list(&v))
                .unwrap_or_else(|| vec!["http://localhost:3000".to_string()]),
            admin_emails: optional("ADMIN_EMAILS")
                .map(|v| {
                    split_list(&v)
                        .into_iter()
                        .map(|e| e.to_lowercase())
                        .collect()
                })
                .unwrap_or_default(),
            session_ttl_days: parse_or("SESSION_TTL_DAYS", 7)?,
            cookie_secure: parse_bool_or("COOKIE_SECURE", false)?,
            google_client_id: optional("GOOGLE_CLIENT_ID"),
            upload_dir: optional("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("uploads")),
            public_base_url: optional("PUBLIC_BASE_URL")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or_default(),
            supabase,
            registration_bonus: parse_or("REGISTRATION_BONUS", 1000)?,
            ad_post_cost: parse_or("AD_POST_COST", 1)?,
        };

        if settings.session_ttl_days <= 0 {
            bail!("SESSION_TTL_DAYS must be positive");
        }
        if settings.registration_bonus < 0 || settings.ad_post_cost < 0 {
            bail!("REGISTRATION_BONUS and AD_POST_COST must not be negative");
        }

        Ok(settings)
    }

    /// Settings for tests. Uploads go under the system temp directory.
    pub fn for_tests(database_url: &str) -> Self {
        Self {
            database_url: database_url.to_string(),
            host: "127.0.0.1".to_string(),
            port: 0,
            cors_origins: vec!["http://localhost:3000".to_string()],
            admin_emails: vec![],
            session_ttl_days: 7,
            cookie_secure: false,
            google_client_id: None,
            upload_dir: env::temp_dir().join("rentwala-test-uploads"),
            public_base_url: String::new(),
            supabase: None,
            registration_bonus: 1000,
            ad_post_cost: 1,
        }
    }

    /// Case-insensitive membership check against `ADMIN_EMAILS`.
    pub fn is_admin_email(&self, email: &str) -> bool {
        let email = email.to_lowercase();
        self.admin_emails.iter().any(|e| *e == email)
    }
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match optional(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{key} has an invalid value: {raw}")),
        None => Ok(default),
    }
}

fn parse_bool_or(key: &str, default: bool) -> anyhow::Result<bool> {
    match optional(key).as_deref().map(str::trim) {
        None => Ok(default),
        Some("1" | "true" | "TRUE" | "yes") => Ok(true),
        Some("0" | "false" | "FALSE" | "no") => Ok(false),
        Some(other) => bail!("{key} must be a boolean, got {other}"),
    }
}

/// Splits a comma-separated list, trimming entries and dropping empty ones.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
