//! User profile repository

use crate::db::DatabasePool;
use crate::models::{UpsertUserProfile, UserProfile};
use async_trait::async_trait;
use mailpulse_common::types::UserId;
use mailpulse_common::{Error, Result};

/// User profile repository trait
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn get_profile(&self, user_id: UserId) -> Result<Option<UserProfile>>;
    async fn upsert_profile(&self, input: UpsertUserProfile) -> Result<UserProfile>;
}

/// Database user repository
pub struct DbUserRepository {
    pool: DatabasePool,
}

impl DbUserRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for DbUserRepository {
    async fn get_profile(&self, user_id: UserId) -> Result<Option<UserProfile>> {
        sqlx::query_as::<_, UserProfile>("SELECT * FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    async fn upsert_profile(&self, input: UpsertUserProfile) -> Result<UserProfile> {
        sqlx::query_as::<_, UserProfile>(
            r#"
            INSERT INTO users (id, email, display_name)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET
                email = EXCLUDED.email,
                display_name = EXCLUDED.display_name,
                updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(input.id)
        .bind(&input.email)
        .bind(&input.display_name)
        .fetch_one(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }
}
