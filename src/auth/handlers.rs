//! Authentication handlers

use axum::extract::{Extension, Json, Query};
use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Redirect};
use std::sync::Arc;
use tracing::{error, info};

use super::extractors::AuthedUser;
use super::models::{CallbackParams, Claims, LoginResponse};
use crate::common::{ApiError, AppState};

/// Cookie that pins a login attempt to the browser that started it
pub const OAUTH_STATE_COOKIE: &str = "oauth_state";

fn state_cookie(value: &str, max_age_secs: u64) -> String {
    format!(
        "{}={}; HttpOnly; SameSite=Lax; Path=/auth; Max-Age={}",
        OAUTH_STATE_COOKIE, value, max_age_secs
    )
}

/// Value of cookie `name` from the request's `Cookie` headers
fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
}

/// GET /auth/login
/// Redirects the browser to the identity provider (307) and sets the
/// `oauth_state` cookie the callback is checked against
pub async fn login(Extension(state): Extension<Arc<AppState>>) -> impl IntoResponse {
    let attempt = state.handshake.begin().await;
    info!("Starting Google OAuth flow");

    let cookie = state_cookie(&attempt.state, state.handshake.state_ttl().as_secs());
    (
        [(SET_COOKIE, cookie)],
        Redirect::temporary(&attempt.redirect_url),
    )
}

/// GET /auth/callback?state=...&code=...
///
/// # Response
/// ```json
/// {
///   "token": "<jwt token>",
///   "email": "guest@example.com",
///   "name": "Guest"
/// }
/// ```
///
/// The attempt is spent either way, so the `oauth_state` cookie is cleared on
/// success and failure alike.
pub async fn callback(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<CallbackParams>,
) -> impl IntoResponse {
    let browser_state = cookie_value(&headers, OAUTH_STATE_COOKIE);
    let result: Result<Json<LoginResponse>, ApiError> = state
        .handshake
        .complete(params, browser_state)
        .await
        .map(Json)
        .map_err(|e| {
            error!(error = %e, "OAuth callback failed");
            ApiError::from(e)
        });

    ([(SET_COOKIE, state_cookie("", 0))], result)
}

/// GET /api/me
/// Returns the claims carried by the caller's token
pub async fn me_handler(AuthedUser(ctx): AuthedUser) -> Json<Claims> {
    Json(ctx.claims().clone())
}
