// src/main.rs
use axum::{extract::Extension, routing::get, Router};
use dotenv::dotenv;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::path::PathBuf;
use std::{net::SocketAddr, str::FromStr, sync::Arc};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

// ============================================================================
// MODULE IMPORTS
// ============================================================================

mod admin;
mod auth;
mod common;
mod services;

use auth::handshake::HandshakeController;
use auth::identity::{SqliteUserStore, UserStore};
use auth::tokens::TokenCodec;
use common::{AppConfig, AppState};
use services::{GoogleService, IdentityProvider};

// ============================================================================
// MAIN APPLICATION ENTRY POINT
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    // ========================================================================
    // ENVIRONMENT CONFIGURATION
    // ========================================================================

    // A missing JWT_SECRET stops the process here.
    let config = AppConfig::from_env()?;
    info!(
        token_ttl_hours = config.token_ttl.num_hours(),
        redirect_url = %config.google.redirect_url,
        "Configuration loaded"
    );

    // ========================================================================
    // DATABASE SETUP
    // ========================================================================

    if let Some(path_part) = config.database_url.strip_prefix("sqlite://") {
        let path_without_params = path_part.split('?').next().unwrap_or("");
        if !path_without_params.is_empty() && !path_without_params.starts_with(':') {
            if let Some(parent) = PathBuf::from(path_without_params).parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await?;
                }
            }
        }
    }

    let connect_options =
        SqliteConnectOptions::from_str(&config.database_url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .connect_with(connect_options)
        .await?;

    common::migrations::run_migrations(&pool).await?;

    // ========================================================================
    // SERVICE INITIALIZATION
    // ========================================================================

    let tokens = Arc::new(TokenCodec::new(&config.jwt_secret, config.token_ttl));
    let users: Arc<dyn UserStore> = Arc::new(SqliteUserStore::new(pool));
    let provider: Arc<dyn IdentityProvider> = Arc::new(GoogleService::new(
        config.google.clone(),
        config.provider_timeout,
    ));
    info!("GoogleService initialized");

    let handshake = Arc::new(HandshakeController::new(
        provider,
        users.clone(),
        tokens.clone(),
        config.oauth_state_ttl,
        config.provider_timeout,
    ));

    let app_state = Arc::new(AppState {
        users,
        handshake,
    });

    // ========================================================================
    // ROUTER COMPOSITION
    // ========================================================================

    let origins: Vec<axum::http::HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    let app = router(app_state, tokens)
        .layer(
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods([
                    axum::http::Method::GET,
                    axum::http::Method::POST,
                    axum::http::Method::PUT,
                    axum::http::Method::DELETE,
                    axum::http::Method::PATCH,
                    axum::http::Method::OPTIONS,
                ])
                .allow_headers([
                    axum::http::header::CONTENT_TYPE,
                    axum::http::header::AUTHORIZATION,
                ])
                .allow_credentials(true),
        )
        .layer(TraceLayer::new_for_http());

    // ========================================================================
    // SERVER STARTUP
    // ========================================================================

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Listening on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

/// All application routes with shared state attached
pub fn router(state: Arc<AppState>, tokens: Arc<TokenCodec>) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(auth::auth_routes(tokens.clone()))
        .merge(admin::admin_routes(tokens))
        .layer(Extension(state))
}

async fn health() -> &'static str {
    "PG Management System is running"
}
