// src/admin/handlers/users.rs

use axum::{
    extract::{Extension, Path},
    Json,
};
use std::sync::Arc;
use tracing::{info, warn};

use crate::admin::models::UpdateRoleRequest;
use crate::auth::middleware::GrantedRole;
use crate::auth::models::User;
use crate::auth::AuthedUser;
use crate::common::{safe_email_log, ApiError, AppState};

/// GET /api/admin/users/:email - Look up a user record
pub async fn get_user(
    Extension(state): Extension<Arc<AppState>>,
    authed: AuthedUser,
    Path(email): Path<String>,
) -> Result<Json<User>, ApiError> {
    let user = state.users.find_by_email(&email).await?.ok_or_else(|| {
        ApiError::NotFound("User not found".to_string())
    })?;

    info!(
        admin = %safe_email_log(authed.0.email()),
        user_id = user.id,
        "Admin fetched user record"
    );
    Ok(Json(user))
}

/// PUT /api/admin/users/:email/role - Assign a role
///
/// Tokens already issued keep their old role until they expire.
pub async fn update_user_role(
    Extension(state): Extension<Arc<AppState>>,
    Extension(granted): Extension<GrantedRole>,
    authed: AuthedUser,
    Path(email): Path<String>,
    Json(payload): Json<UpdateRoleRequest>,
) -> Result<Json<User>, ApiError> {
    let role = payload.role.trim();
    if role.is_empty() {
        return Err(ApiError::BadRequest("role must not be empty".to_string()));
    }

    let user = match state.users.set_role(&email, role).await? {
        Some(u) => u,
        None => {
            warn!(email = %safe_email_log(&email), "Role update for unknown user");
            return Err(ApiError::NotFound("User not found".to_string()));
        }
    };

    info!(
        admin = %safe_email_log(authed.0.email()),
        admin_role = %granted.0,
        user_id = user.id,
        role = %user.role,
        "User role updated"
    );
    Ok(Json(user))
}
