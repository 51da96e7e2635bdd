//! Authentication extractors for Axum

use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};
use tracing::warn;

use super::middleware::{AuthContext, AuthError};
use crate::common::ApiError;

/// Authenticated caller, as established by `require_auth`
///
/// Handlers behind `require_auth` take this instead of re-reading the
/// `Authorization` header. Without the middleware the extraction fails with 401.
#[derive(Debug, Clone)]
pub struct AuthedUser(pub AuthContext);

#[async_trait]
impl<S> FromRequestParts<S> for AuthedUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match parts.extensions.get::<AuthContext>() {
            Some(ctx) => Ok(AuthedUser(ctx.clone())),
            None => {
                warn!(uri = %parts.uri, "AuthedUser requested on a route without require_auth");
                Err(AuthError::MissingHeader.into())
            }
        }
    }
}
