//! Request authorization pipeline
//!
//! `require_auth` validates the bearer token once and stores an
//! [`AuthContext`] in the request extensions. Any number of
//! `require_roles` layers placed inside it read that value instead of
//! touching the header again:
//!
//! ```ignore
//! Router::new()
//!     .route("/api/admin/users/:email", get(handler))
//!     .route_layer(from_fn_with_state(RoleGate::new(["admin"]), require_roles))
//!     .route_layer(from_fn_with_state(tokens, require_auth))
//! ```

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use super::models::Claims;
use super::tokens::{TokenCodec, TokenError};
use crate::common::{safe_email_log, ApiError};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("authorization header missing")]
    MissingHeader,

    #[error("authorization header is not 'Bearer <token>'")]
    MalformedHeader,

    #[error("invalid token: {0}")]
    InvalidToken(#[from] TokenError),

    #[error("role not allowed")]
    Forbidden,
}

/// Verified identity of the caller, set once per request
#[derive(Debug, Clone)]
pub struct AuthContext {
    claims: Arc<Claims>,
}

impl AuthContext {
    pub fn claims(&self) -> &Claims {
        &self.claims
    }

    pub fn email(&self) -> &str {
        &self.claims.email
    }

    pub fn role(&self) -> &str {
        &self.claims.role
    }
}

/// Role that passed the innermost role gate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantedRole(pub String);

/// Allow-list of roles for a group of routes
#[derive(Debug, Clone)]
pub struct RoleGate {
    allowed: Arc<HashSet<String>>,
}

impl RoleGate {
    pub fn new<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: Arc::new(roles.into_iter().map(Into::into).collect()),
        }
    }

    pub fn allows(&self, role: &str) -> bool {
        self.allowed.contains(role)
    }
}

/// Pulls the token out of `Authorization: Bearer <token>`.
///
/// The header must split on single spaces into exactly two parts.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let header = headers
        .get(AUTHORIZATION)
        .ok_or(AuthError::MissingHeader)?
        .to_str()
        .map_err(|_| AuthError::MalformedHeader)?;

    if header.is_empty() {
        return Err(AuthError::MissingHeader);
    }

    let parts: Vec<&str> = header.split(' ').collect();
    match parts.as_slice() {
        ["Bearer", token] if !token.is_empty() => Ok(*token),
        _ => Err(AuthError::MalformedHeader),
    }
}

pub async fn require_auth(
    State(tokens): State<Arc<TokenCodec>>,
    mut request: Request,
    next: Next,
) -> Response {
    let verified = bearer_token(request.headers())
        .and_then(|t| tokens.verify(t).map_err(AuthError::from));
    let claims = match verified {
        Ok(claims) => claims,
        Err(e) => {
            warn!(
                error = %e,
                method = %request.method(),
                uri = %request.uri(),
                "Authentication failed"
            );
            return ApiError::from(e).into_response();
        }
    };

    debug!(
        user_id = claims.user_id,
        email = %safe_email_log(&claims.email),
        "Request authenticated"
    );
    request.extensions_mut().insert(AuthContext {
        claims: Arc::new(claims),
    });
    next.run(request).await
}

pub async fn require_roles(
    State(gate): State<RoleGate>,
    mut request: Request,
    next: Next,
) -> Response {
    let role = match request.extensions().get::<AuthContext>() {
        Some(ctx) => ctx.role().to_string(),
        None => {
            warn!(uri = %request.uri(), "Role gate reached without an authenticated caller");
            return ApiError::from(AuthError::MissingHeader).into_response();
        }
    };

    if !gate.allows(&role) {
        warn!(role = %role, uri = %request.uri(), "Role not permitted for route");
        return ApiError::from(AuthError::Forbidden).into_response();
    }

    request.extensions_mut().insert(GrantedRole(role));
    next.run(request).await
}
