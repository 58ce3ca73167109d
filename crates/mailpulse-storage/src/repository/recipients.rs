//! Recipient and recipient group repositories
//!
//! Recipients are owned by the CRUD collaborator; the engine only reads them,
//! apart from the create/membership helpers used when seeding data.

use crate::db::DatabasePool;
use crate::models::{CreateRecipient, Recipient, RecipientGroup, RecipientStatus};
use async_trait::async_trait;
use mailpulse_common::types::{GroupId, RecipientId, UserId};
use mailpulse_common::{Error, Result};
use uuid::Uuid;

/// Recipient repository trait
#[async_trait]
pub trait RecipientRepository: Send + Sync {
    async fn create(&self, input: CreateRecipient) -> Result<Recipient>;
    async fn get(&self, id: RecipientId) -> Result<Option<Recipient>>;
    /// Fetch the given recipients owned by `user_id`, in any status
    async fn get_many(&self, user_id: UserId, ids: &[RecipientId]) -> Result<Vec<Recipient>>;
    async fn list_active(&self, user_id: UserId) -> Result<Vec<Recipient>>;
    async fn set_status(&self, id: RecipientId, status: RecipientStatus) -> Result<bool>;
}

/// Recipient group repository trait
#[async_trait]
pub trait GroupRepository: Send + Sync {
    async fn create(&self, user_id: UserId, name: &str) -> Result<RecipientGroup>;
    async fn add_member(&self, group_id: GroupId, recipient_id: RecipientId) -> Result<()>;
    async fn remove_member(&self, group_id: GroupId, recipient_id: RecipientId) -> Result<bool>;
    /// Distinct active members across the given groups of `user_id`
    async fn list_active_members(&self, user_id: UserId, group_ids: &[GroupId]) -> Result<Vec<Recipient>>;
}

/// Database recipient repository
pub struct DbRecipientRepository {
    pool: DatabasePool,
}

impl DbRecipientRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecipientRepository for DbRecipientRepository {
    async fn create(&self, input: CreateRecipient) -> Result<Recipient> {
        let id = Uuid::now_v7();
        let custom_fields = input.custom_fields.unwrap_or_else(|| serde_json::json!({}));

        sqlx::query_as::<_, Recipient>(
            r#"
            INSERT INTO recipients (id, user_id, email, first_name, last_name, custom_fields)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(input.user_id)
        .bind(input.email.to_lowercase())
        .bind(&input.first_name)
        .bind(&input.last_name)
        .bind(&custom_fields)
        .fetch_one(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }

    async fn get(&self, id: RecipientId) -> Result<Option<Recipient>> {
        sqlx::query_as::<_, Recipient>("SELECT * FROM recipients WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    async fn get_many(&self, user_id: UserId, ids: &[RecipientId]) -> Result<Vec<Recipient>> {
        sqlx::query_as::<_, Recipient>(
            "SELECT * FROM recipients WHERE user_id = $1 AND id = ANY($2) ORDER BY created_at, id",
        )
        .bind(user_id)
        .bind(ids)
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }

    async fn list_active(&self, user_id: UserId) -> Result<Vec<Recipient>> {
        sqlx::query_as::<_, Recipient>(
            "SELECT * FROM recipients WHERE user_id = $1 AND status = 'active' ORDER BY created_at, id",
        )
        .bind(user_id)
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }

    async fn set_status(&self, id: RecipientId, status: RecipientStatus) -> Result<bool> {
        let result = sqlx::query("UPDATE recipients SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(status.to_string())
            .execute(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }
}

/// Database recipient group repository
pub struct DbGroupRepository {
    pool: DatabasePool,
}

impl DbGroupRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GroupRepository for DbGroupRepository {
    async fn create(&self, user_id: UserId, name: &str) -> Result<RecipientGroup> {
        sqlx::query_as::<_, RecipientGroup>(
            "INSERT INTO recipient_groups (id, user_id, name) VALUES ($1, $2, $3) RETURNING *",
        )
        .bind(Uuid::now_v7())
        .bind(user_id)
        .bind(name)
        .fetch_one(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }

    async fn add_member(&self, group_id: GroupId, recipient_id: RecipientId) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO recipient_group_members (group_id, recipient_id)
            VALUES ($1, $2)
            ON CONFLICT (group_id, recipient_id) DO NOTHING
            "#,
        )
        .bind(group_id)
        .bind(recipient_id)
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    async fn remove_member(&self, group_id: GroupId, recipient_id: RecipientId) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM recipient_group_members WHERE group_id = $1 AND recipient_id = $2",
        )
        .bind(group_id)
        .bind(recipient_id)
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_active_members(&self, user_id: UserId, group_ids: &[GroupId]) -> Result<Vec<Recipient>> {
        sqlx::query_as::<_, Recipient>(
            r#"
            SELECT DISTINCT r.* FROM recipients r
            JOIN recipient_group_members m ON m.recipient_id = r.id
            JOIN recipient_groups g ON g.id = m.group_id
            WHERE g.user_id = $1
              AND m.group_id = ANY($2)
              AND r.status = 'active'
            ORDER BY r.created_at, r.id
            "#,
        )
        .bind(user_id)
        .bind(group_ids)
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }
}
