//! Campaign attachment repository

use crate::db::DatabasePool;
use crate::models::{AttachmentData, CampaignAttachment};
use async_trait::async_trait;
use mailpulse_common::types::CampaignId;
use mailpulse_common::{Error, Result};
use uuid::Uuid;

#[async_trait]
pub trait AttachmentRepository: Send + Sync {
    async fn add(&self, campaign_id: CampaignId, attachment: &AttachmentData) -> Result<CampaignAttachment>;
    async fn list(&self, campaign_id: CampaignId) -> Result<Vec<CampaignAttachment>>;
}

/// Database attachment repository
pub struct DbAttachmentRepository {
    pool: DatabasePool,
}

impl DbAttachmentRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AttachmentRepository for DbAttachmentRepository {
    async fn add(&self, campaign_id: CampaignId, attachment: &AttachmentData) -> Result<CampaignAttachment> {
        sqlx::query_as::<_, CampaignAttachment>(
            r#"
            INSERT INTO campaign_attachments (id, campaign_id, filename, content_type, content)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(campaign_id)
        .bind(&attachment.filename)
        .bind(&attachment.content_type)
        .bind(&attachment.content)
        .fetch_one(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }

    async fn list(&self, campaign_id: CampaignId) -> Result<Vec<CampaignAttachment>> {
        sqlx::query_as::<_, CampaignAttachment>(
            "SELECT * FROM campaign_attachments WHERE campaign_id = $1 ORDER BY created_at, id",
        )
        .bind(campaign_id)
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }
}
