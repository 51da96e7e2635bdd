//! Local user records for federated identities

use async_trait::async_trait;
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::{debug, error, info};

use super::models::{NewUser, User, DEFAULT_ROLE};
use crate::common::safe_email_log;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("a user with this email already exists")]
    Conflict,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Persistence seam for user records keyed by email
#[async_trait]
pub trait UserStore: Send + Sync {
    /// `Ok(None)` when no user has this email.
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, IdentityError>;

    /// Inserts a new user, defaulting the role. Fails with
    /// [`IdentityError::Conflict`] if the email is already taken.
    async fn create(&self, user: NewUser) -> Result<User, IdentityError>;

    /// Records the provider subject id and display name on an account that
    /// has no provider id yet. The role is left untouched.
    async fn backfill_provider_id(
        &self,
        email: &str,
        provider_id: &str,
        name: &str,
    ) -> Result<(), IdentityError>;

    /// Operator-managed role change. `Ok(None)` when the email is unknown.
    async fn set_role(&self, email: &str, role: &str) -> Result<Option<User>, IdentityError>;
}

const USER_COLUMNS: &str = "id, email, name, google_id, role, created_at";

#[derive(Clone)]
pub struct SqliteUserStore {
    pool: SqlitePool,
}

impl SqliteUserStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStore for SqliteUserStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, IdentityError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE email = ?",
            USER_COLUMNS
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!(error = %e, email = %safe_email_log(email), "Database error looking up user");
            IdentityError::Database(e)
        })?;

        debug!(email = %safe_email_log(email), found = user.is_some(), "User lookup by email");
        Ok(user)
    }

    async fn create(&self, user: NewUser) -> Result<User, IdentityError> {
        let role = if user.role.is_empty() {
            DEFAULT_ROLE.to_string()
        } else {
            user.role
        };

        let created = sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users (email, name, google_id, role) VALUES (?, ?, ?, ?) RETURNING {}",
            USER_COLUMNS
        ))
        .bind(&user.email)
        .bind(&user.name)
        .bind(user.google_id.as_deref())
        .bind(&role)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                info!(email = %safe_email_log(&user.email), "User already created by a concurrent login");
                IdentityError::Conflict
            }
            e => {
                error!(error = %e, email = %safe_email_log(&user.email), "Database error creating user");
                IdentityError::Database(e)
            }
        })?;

        info!(user_id = created.id, email = %safe_email_log(&created.email), role = %created.role, "Created user");
        Ok(created)
    }

    async fn backfill_provider_id(
        &self,
        email: &str,
        provider_id: &str,
        name: &str,
    ) -> Result<(), IdentityError> {
        let result = sqlx::query(
            "UPDATE users SET google_id = ?, name = ? WHERE email = ? AND (google_id IS NULL OR google_id = '')",
        )
        .bind(provider_id)
        .bind(name)
        .bind(email)
        .execute(&self.pool)
        .await?;

        debug!(
            email = %safe_email_log(email),
            rows = result.rows_affected(),
            "Backfilled provider id"
        );
        Ok(())
    }

    async fn set_role(&self, email: &str, role: &str) -> Result<Option<User>, IdentityError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET role = ? WHERE email = ? RETURNING {}",
            USER_COLUMNS
        ))
        .bind(role)
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(ref u) = user {
            info!(user_id = u.id, role = %role, "Updated user role");
        }
        Ok(user)
    }
}
