//! Campaign recipient snapshot repository
//!
//! The first-open and first-click guards live here as single conditional
//! statements so concurrent tracking hits cannot double count.

use crate::db::DatabasePool;
use crate::models::{CampaignRecipient, ClickUpdate, OpenUpdate};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mailpulse_common::types::{CampaignId, CampaignRecipientId, RecipientId};
use mailpulse_common::{Error, Result};
use sqlx::Row;
use uuid::Uuid;

/// Campaign recipient repository trait
#[async_trait]
pub trait CampaignRecipientRepository: Send + Sync {
    /// Insert one `pending` row per recipient. Existing pairs are kept as-is.
    async fn create_snapshot(
        &self,
        campaign_id: CampaignId,
        recipient_ids: &[RecipientId],
    ) -> Result<Vec<CampaignRecipient>>;
    async fn get(&self, id: CampaignRecipientId) -> Result<Option<CampaignRecipient>>;
    async fn list_by_campaign(&self, campaign_id: CampaignId) -> Result<Vec<CampaignRecipient>>;
    async fn mark_sent(&self, id: CampaignRecipientId, at: DateTime<Utc>) -> Result<()>;
    async fn mark_failed(&self, id: CampaignRecipientId, error: &str) -> Result<()>;
    /// Set `opened_at` if still null. `None` when the row does not exist.
    async fn record_open(&self, id: CampaignRecipientId, at: DateTime<Utc>) -> Result<Option<OpenUpdate>>;
    /// Overwrite `clicked_at` and escalate to `clicked`. `None` when the row does not exist.
    async fn record_click(&self, id: CampaignRecipientId, at: DateTime<Utc>) -> Result<Option<ClickUpdate>>;
}

/// Database campaign recipient repository
pub struct DbCampaignRecipientRepository {
    pool: DatabasePool,
}

impl DbCampaignRecipientRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CampaignRecipientRepository for DbCampaignRecipientRepository {
    async fn create_snapshot(
        &self,
        campaign_id: CampaignId,
        recipient_ids: &[RecipientId],
    ) -> Result<Vec<CampaignRecipient>> {
        let mut tx = self
            .pool
            .pool()
            .begin()
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        for recipient_id in recipient_ids {
            sqlx::query(
                r#"
                INSERT INTO campaign_recipients (id, campaign_id, recipient_id)
                VALUES ($1, $2, $3)
                ON CONFLICT (campaign_id, recipient_id) DO NOTHING
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(campaign_id)
            .bind(recipient_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        self.list_by_campaign(campaign_id).await
    }

    async fn get(&self, id: CampaignRecipientId) -> Result<Option<CampaignRecipient>> {
        sqlx::query_as::<_, CampaignRecipient>("SELECT * FROM campaign_recipients WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    async fn list_by_campaign(&self, campaign_id: CampaignId) -> Result<Vec<CampaignRecipient>> {
        sqlx::query_as::<_, CampaignRecipient>(
            "SELECT * FROM campaign_recipients WHERE campaign_id = $1 ORDER BY created_at, id",
        )
        .bind(campaign_id)
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }

    async fn mark_sent(&self, id: CampaignRecipientId, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE campaign_recipients
            SET status = CASE WHEN status = 'pending' THEN 'sent' ELSE status END,
                sent_at = $2,
                last_error = NULL,
                updated_at = $2
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(at)
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    async fn mark_failed(&self, id: CampaignRecipientId, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE campaign_recipients SET last_error = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(error)
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    async fn record_open(&self, id: CampaignRecipientId, at: DateTime<Utc>) -> Result<Option<OpenUpdate>> {
        let first = sqlx::query(
            r#"
            UPDATE campaign_recipients
            SET opened_at = $2,
                status = CASE WHEN status IN ('pending', 'sent') THEN 'opened' ELSE status END,
                updated_at = $2
            WHERE id = $1 AND opened_at IS NULL
            RETURNING campaign_id, recipient_id
            "#,
        )
        .bind(id)
        .bind(at)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        if let Some(row) = first {
            return Ok(Some(OpenUpdate {
                campaign_id: row.get("campaign_id"),
                recipient_id: row.get("recipient_id"),
                first_open: true,
            }));
        }

        let existing: Option<(CampaignId, RecipientId)> = sqlx::query_as(
            "SELECT campaign_id, recipient_id FROM campaign_recipients WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(existing.map(|(campaign_id, recipient_id)| OpenUpdate {
            campaign_id,
            recipient_id,
            first_open: false,
        }))
    }

    async fn record_click(&self, id: CampaignRecipientId, at: DateTime<Utc>) -> Result<Option<ClickUpdate>> {
        // The row lock taken by the inner select serialises concurrent clicks,
        // so exactly one of them observes a null `prev`.
        let row = sqlx::query(
            r#"
            UPDATE campaign_recipients cr
            SET clicked_at = $2,
                status = CASE WHEN cr.status = 'bounced' THEN cr.status ELSE 'clicked' END,
                updated_at = $2
            FROM (
                SELECT id, clicked_at AS prev
                FROM campaign_recipients
                WHERE id = $1
                FOR UPDATE
            ) old
            WHERE cr.id = old.id
            RETURNING cr.campaign_id, cr.recipient_id, (old.prev IS NULL) AS first_click
            "#,
        )
        .bind(id)
        .bind(at)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(row.map(|row| ClickUpdate {
            campaign_id: row.get("campaign_id"),
            recipient_id: row.get("recipient_id"),
            first_click: row.get("first_click"),
        }))
    }
}
