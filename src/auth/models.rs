//! Authentication data models

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Role assigned to accounts created through a federated login
pub const DEFAULT_ROLE: &str = "user";

/// Identity claims embedded in a session token
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Claims {
    pub user_id: i64,
    pub email: String,
    pub name: String,
    pub role: String,
    pub iat: usize,
    pub exp: usize,
}

/// User database model
#[derive(FromRow, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub name: String,
    pub google_id: Option<String>,
    pub role: String,
    pub created_at: String,
}

/// Candidate record for a first-seen identity
#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub email: String,
    pub name: String,
    pub google_id: Option<String>,
    /// Empty means [`DEFAULT_ROLE`].
    pub role: String,
}

/// Query string delivered by the provider to the callback endpoint
#[derive(Debug, Default, Deserialize)]
pub struct CallbackParams {
    pub state: Option<String>,
    pub code: Option<String>,
    pub error: Option<String>,
}

/// Body returned by a completed login
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoginResponse {
    pub token: String,
    pub email: String,
    pub name: String,
}
