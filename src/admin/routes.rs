// src/admin/routes.rs

use axum::{middleware::from_fn_with_state, routing::{get, put}, Router};
use std::sync::Arc;

use super::handlers;
use crate::auth::tokens::TokenCodec;
use crate::auth::{require_auth, require_roles, RoleGate};

/// Operator endpoints, restricted to the `admin` role
pub fn admin_routes(tokens: Arc<TokenCodec>) -> Router {
    Router::new()
        .route("/api/admin/users/:email", get(handlers::users::get_user))
        .route(
            "/api/admin/users/:email/role",
            put(handlers::users::update_user_role),
        )
        // Layers run bottom-up: authenticate first, then check the role.
        .route_layer(from_fn_with_state(RoleGate::new(["admin"]), require_roles))
        .route_layer(from_fn_with_state(tokens, require_auth))
}
