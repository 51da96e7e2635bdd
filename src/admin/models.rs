// src/admin/models.rs

use serde::Deserialize;

/// Body of `PUT /api/admin/users/:email/role`
#[derive(Debug, Deserialize)]
pub struct UpdateRoleRequest {
    pub role: String,
}
