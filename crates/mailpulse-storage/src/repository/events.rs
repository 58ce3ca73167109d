//! Email event log repository

use crate::db::DatabasePool;
use crate::models::{EmailEvent, NewEmailEvent};
use async_trait::async_trait;
use mailpulse_common::types::CampaignId;
use mailpulse_common::{Error, Result};
use uuid::Uuid;

/// Append-only event log
#[async_trait]
pub trait EmailEventRepository: Send + Sync {
    async fn append(&self, event: NewEmailEvent) -> Result<EmailEvent>;
    async fn list_by_campaign(&self, campaign_id: CampaignId) -> Result<Vec<EmailEvent>>;
}

/// Database event repository
pub struct DbEmailEventRepository {
    pool: DatabasePool,
}

impl DbEmailEventRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EmailEventRepository for DbEmailEventRepository {
    async fn append(&self, event: NewEmailEvent) -> Result<EmailEvent> {
        sqlx::query_as::<_, EmailEvent>(
            r#"
            INSERT INTO email_events (id, campaign_id, recipient_id, event_type, url, user_agent, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(event.campaign_id)
        .bind(event.recipient_id)
        .bind(event.event_type.to_string())
        .bind(&event.url)
        .bind(&event.user_agent)
        .bind(event.created_at)
        .fetch_one(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }

    async fn list_by_campaign(&self, campaign_id: CampaignId) -> Result<Vec<EmailEvent>> {
        sqlx::query_as::<_, EmailEvent>(
            "SELECT * FROM email_events WHERE campaign_id = $1 ORDER BY created_at, id",
        )
        .bind(campaign_id)
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }
}
