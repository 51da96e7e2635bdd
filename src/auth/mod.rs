//! # Auth Module
//!
//! Google OAuth login, session tokens and request authorization:
//! - `tokens`: HS256 session token issue/verify
//! - `identity`: local user records keyed by email
//! - `handshake`: redirect/callback flow ending in a minted token
//! - `middleware`: bearer validation and role gates
//! - `AuthedUser` extractor for protected handlers

pub mod extractors;
pub mod handlers;
pub mod handshake;
pub mod identity;
pub mod middleware;
pub mod models;
pub mod oauth_state;
pub mod routes;
pub mod tokens;


pub use extractors::AuthedUser;
pub use middleware::{require_auth, require_roles, RoleGate};
pub use routes::auth_routes;
