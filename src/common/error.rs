// Error handling types for the API

use axum::{http::StatusCode, response::IntoResponse};
use std::fmt;
use tracing::error;

use crate::auth::handshake::HandshakeError;
use crate::auth::identity::IdentityError;
use crate::auth::middleware::AuthError;
use crate::auth::tokens::TokenError;

/// Client-facing message for every token verification failure.
pub const INVALID_TOKEN_MESSAGE: &str = "Invalid or expired token. Please login again.";

/// API error types
///
/// Every variant renders as a plain-text body with the matching status code.
#[derive(Debug)]
pub enum ApiError {
    Unauthorized(String),
    Forbidden(String),
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    BadGateway(String),
    InternalServer(String),
    DatabaseError(sqlx::Error),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            ApiError::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            ApiError::BadRequest(msg) => write!(f, "Bad Request: {}", msg),
            ApiError::NotFound(msg) => write!(f, "Not Found: {}", msg),
            ApiError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            ApiError::BadGateway(msg) => write!(f, "Bad Gateway: {}", msg),
            ApiError::InternalServer(msg) => write!(f, "Internal Server Error: {}", msg),
            ApiError::DatabaseError(e) => write!(f, "Database Error: {}", e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            ApiError::InternalServer(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            ApiError::DatabaseError(e) => {
                error!(error = %e, "Database error occurred");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Database operation failed".to_string(),
                )
            }
        };

        (status, message).into_response()
    }
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Signing(e) => {
                error!(error = %e, "Token signing failed");
                ApiError::InternalServer("Failed to generate token".to_string())
            }
            TokenError::ExpiryOutOfRange => {
                error!("Token lifetime overflows the expiry timestamp");
                ApiError::InternalServer("Failed to generate token".to_string())
            }
            // Which check failed is never revealed to the client.
            TokenError::Malformed | TokenError::BadSignature | TokenError::Expired => {
                ApiError::Unauthorized(INVALID_TOKEN_MESSAGE.to_string())
            }
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingHeader => {
                ApiError::Unauthorized("Authorization header required".to_string())
            }
            AuthError::MalformedHeader => {
                ApiError::Unauthorized("Invalid authorization header format".to_string())
            }
            AuthError::InvalidToken(e) => e.into(),
            AuthError::Forbidden => {
                ApiError::Forbidden("Forbidden: insufficient permissions".to_string())
            }
        }
    }
}

impl From<IdentityError> for ApiError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::Conflict => {
                ApiError::Conflict("User record was modified concurrently, retry".to_string())
            }
            IdentityError::Database(e) => ApiError::DatabaseError(e),
        }
    }
}

impl From<HandshakeError> for ApiError {
    fn from(err: HandshakeError) -> Self {
        match err {
            HandshakeError::Csrf => ApiError::BadRequest("Invalid state".to_string()),
            HandshakeError::MissingCode => {
                ApiError::BadRequest("No authorization code provided".to_string())
            }
            HandshakeError::ProviderDenied(_) => {
                ApiError::BadRequest("Authorization was denied by the provider".to_string())
            }
            HandshakeError::Provider(e) => match e {
                crate::services::ProviderError::ExchangeFailed(_) => {
                    ApiError::BadGateway("Code exchange failed".to_string())
                }
                crate::services::ProviderError::ProfileFetchFailed(_) => {
                    ApiError::BadGateway("Failed to get user info".to_string())
                }
            },
            HandshakeError::Identity(e) => e.into(),
            HandshakeError::Token(e) => e.into(),
        }
    }
}
