//! Main entry point for the rentwala_server backend.
//!
//! Loads configuration from the environment, connects to Postgres, applies
//! migrations, installs tracing (stdout + `system_logs`), and serves the API.

use actix_cors::Cors;
use actix_web::{App, HttpServer, http::header, web};
use dotenv::dotenv;
use rentwala::{
    AppState, PgLogLayer, Settings, get_subscriber, handlers, init_subscriber, run_migrations,
    telemetry::RequestLoggingMiddleware,
};
use tracing::Level;
use tracing_actix_web::TracingLogger;

fn cors(origins: &[String]) -> Cors {
    origins
        .iter()
        .fold(Cors::default(), |cors, origin| cors.allowed_origin(origin))
        .allow_any_method()
        .allowed_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
        .expose_headers([header::HeaderName::from_static("x-request-id")])
        .supports_credentials()
        .max_age(3600)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let settings = Settings::from_env()?;
    let app_state = AppState::new(settings).await?;

    let pg_layer = PgLogLayer::spawn(app_state.db.clone(), Level::INFO);
    let subscriber = get_subscriber(
        "rentwala".to_string(),
        "info,sqlx=warn,actix_server=warn".to_string(),
        std::io::stdout,
        Some(pg_layer),
    );
    init_subscriber(subscriber)?;

    run_migrations(&app_state.db).await?;

    let host = app_state.settings.host.clone();
    let port = app_state.settings.port;
    tracing::info!(
        host = %host,
        port,
        google_sign_in = app_state.google.is_enabled(),
        "Starting server"
    );

    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .app_data(handlers::json_config())
            .app_data(handlers::query_config())
            .app_data(handlers::path_config())
            .wrap(RequestLoggingMiddleware::new())
            .wrap(TracingLogger::default())
            .wrap(cors(&app_state.settings.cors_origins))
            .configure(handlers::configure_routes)
    })
    .bind((host.as_str(), port))?
    .run();

    let srv_handle = server.handle();

    let server_task = tokio::spawn(server);

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Shutdown signal received");
            srv_handle.stop(true).await;
        }
        res = server_task => {
            match res {
                Ok(Err(e)) => tracing::error!("Server failed: {}", e),
                Err(e) => tracing::error!("Server task failed: {}", e),
                Ok(Ok(())) => {}
            }
        }
    }

    Ok(())
}
