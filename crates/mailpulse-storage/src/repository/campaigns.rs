//! Campaign repository

use crate::db::DatabasePool;
use crate::models::{Campaign, CampaignOutcome, CampaignStatus, CreateCampaign};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mailpulse_common::types::{CampaignId, UserId};
use mailpulse_common::{Error, Result};
use uuid::Uuid;

/// Campaign repository trait
#[async_trait]
pub trait CampaignRepository: Send + Sync {
    async fn create(&self, input: CreateCampaign) -> Result<Campaign>;
    async fn get(&self, id: CampaignId) -> Result<Option<Campaign>>;
    async fn get_for_user(&self, user_id: UserId, id: CampaignId) -> Result<Option<Campaign>>;
    /// Scheduled campaigns whose time has come, oldest first
    async fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<Campaign>>;
    /// Move `scheduled -> sending`. Returns false when another sweep got there first.
    async fn claim_scheduled(&self, id: CampaignId, at: DateTime<Utc>) -> Result<bool>;
    /// Move a claimed campaign back to `scheduled` after a run that never started
    async fn release_claim(&self, id: CampaignId) -> Result<bool>;
    /// `draft -> scheduled`, once the snapshot and attachments are stored
    async fn mark_scheduled(&self, id: CampaignId) -> Result<bool>;
    /// Persist the `sending` marker before the first message goes out
    async fn begin_run(&self, id: CampaignId, total_recipients: i32, at: DateTime<Utc>) -> Result<bool>;
    async fn finish_run(&self, id: CampaignId, outcome: CampaignOutcome) -> Result<()>;
    async fn increment_opened(&self, id: CampaignId) -> Result<()>;
    async fn increment_clicked(&self, id: CampaignId) -> Result<()>;
    async fn archive(&self, user_id: UserId, id: CampaignId) -> Result<bool>;
}

/// Database campaign repository
pub struct DbCampaignRepository {
    pool: DatabasePool,
}

impl DbCampaignRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CampaignRepository for DbCampaignRepository {
    async fn create(&self, input: CreateCampaign) -> Result<Campaign> {
        let id = Uuid::now_v7();

        sqlx::query_as::<_, Campaign>(
            r#"
            INSERT INTO campaigns (id, user_id, name, subject, content, status, scheduled_at, total_recipients)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(input.user_id)
        .bind(&input.name)
        .bind(&input.subject)
        .bind(&input.content)
        .bind(input.status.to_string())
        .bind(input.scheduled_at)
        .bind(input.total_recipients)
        .fetch_one(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }

    async fn get(&self, id: CampaignId) -> Result<Option<Campaign>> {
        sqlx::query_as::<_, Campaign>("SELECT * FROM campaigns WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    async fn get_for_user(&self, user_id: UserId, id: CampaignId) -> Result<Option<Campaign>> {
        sqlx::query_as::<_, Campaign>("SELECT * FROM campaigns WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    async fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<Campaign>> {
        sqlx::query_as::<_, Campaign>(
            r#"
            SELECT * FROM campaigns
            WHERE status = 'scheduled'
              AND scheduled_at IS NOT NULL
              AND scheduled_at <= $1
            ORDER BY scheduled_at ASC
            "#,
        )
        .bind(now)
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }

    async fn claim_scheduled(&self, id: CampaignId, at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE campaigns
            SET status = 'sending', started_at = $2, updated_at = $2
            WHERE id = $1 AND status = 'scheduled'
            "#,
        )
        .bind(id)
        .bind(at)
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn release_claim(&self, id: CampaignId) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE campaigns
            SET status = 'scheduled', started_at = NULL, updated_at = NOW()
            WHERE id = $1 AND status = 'sending'
            "#,
        )
        .bind(id)
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_scheduled(&self, id: CampaignId) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE campaigns
            SET status = 'scheduled', updated_at = NOW()
            WHERE id = $1 AND status = 'draft' AND scheduled_at IS NOT NULL
            "#,
        )
        .bind(id)
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn begin_run(&self, id: CampaignId, total_recipients: i32, at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE campaigns
            SET status = 'sending',
                total_recipients = $2,
                started_at = COALESCE(started_at, $3),
                updated_at = $3
            WHERE id = $1 AND status IN ('draft', 'scheduled', 'sending')
            "#,
        )
        .bind(id)
        .bind(total_recipients)
        .bind(at)
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn finish_run(&self, id: CampaignId, outcome: CampaignOutcome) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE campaigns
            SET status = $2,
                stats_sent = $3,
                total_recipients = $4,
                sent_at = $5,
                updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(outcome.status.to_string())
        .bind(outcome.stats_sent)
        .bind(outcome.total_recipients)
        .bind(outcome.sent_at)
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("campaign {}", id)));
        }
        Ok(())
    }

    async fn increment_opened(&self, id: CampaignId) -> Result<()> {
        sqlx::query("UPDATE campaigns SET stats_opened = stats_opened + 1, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    async fn increment_clicked(&self, id: CampaignId) -> Result<()> {
        sqlx::query("UPDATE campaigns SET stats_clicked = stats_clicked + 1, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    async fn archive(&self, user_id: UserId, id: CampaignId) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE campaigns
            SET status = $3, updated_at = NOW()
            WHERE id = $1 AND user_id = $2 AND status <> 'sending'
            "#,
        )
        .bind(id)
        .bind(user_id)
        .bind(CampaignStatus::Archived.to_string())
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }
}
