//! Database connection utilities for the rentwala backend.
//!
//! Provides the Postgres pool and applies the embedded migrations.

use anyhow::Context;
use sqlx::{PgPool, postgres::PgPoolOptions};

use crate::config::Settings;

/// Establishes a connection pool to Postgres using `settings.database_url`.
///
/// # Errors
/// Returns an error if the database is unreachable.
pub async fn connect_pg_pool(settings: &Settings) -> anyhow::Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(&settings.database_url)
        .await
        .context("Failed to create Postgres pool")
}

/// Builds a pool that only connects on first use. Used by tests that never
/// reach the database.
pub fn lazy_pg_pool(database_url: &str) -> anyhow::Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(1)
        .connect_lazy(database_url)
        .context("Invalid DATABASE_URL")
}

/// Applies the migrations under `migrations/`.
pub async fn run_migrations(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("Failed to run database migrations")
}
