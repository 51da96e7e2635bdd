//! Authentication routes

use axum::{middleware::from_fn_with_state, routing::get, Router};
use std::sync::Arc;

use super::handlers;
use super::middleware::require_auth;
use super::tokens::TokenCodec;

/// Creates and returns the authentication router
///
/// # Routes
/// - `GET /auth/login` - Redirect to Google
/// - `GET /auth/callback` - Provider callback, returns a session token
/// - `GET /api/me` - Claims of the current caller (protected)
pub fn auth_routes(tokens: Arc<TokenCodec>) -> Router {
    let protected = Router::new()
        .route("/api/me", get(handlers::me_handler))
        .route_layer(from_fn_with_state(tokens, require_auth));

    Router::new()
        .route("/auth/login", get(handlers::login))
        .route("/auth/callback", get(handlers::callback))
        .merge(protected)
}
