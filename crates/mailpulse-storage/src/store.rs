//! Repository bundle handed to the engine

use crate::db::DatabasePool;
use crate::repository::*;
use mailpulse_common::Result;
use std::sync::Arc;

/// All repositories behind trait objects, so the engine can run on
/// Postgres or on the in-memory backend.
#[derive(Clone)]
pub struct Store {
    pub campaigns: Arc<dyn CampaignRepository>,
    pub recipients: Arc<dyn RecipientRepository>,
    pub groups: Arc<dyn GroupRepository>,
    pub campaign_recipients: Arc<dyn CampaignRecipientRepository>,
    pub events: Arc<dyn EmailEventRepository>,
    pub tokens: Arc<dyn OAuthTokenRepository>,
    pub users: Arc<dyn UserRepository>,
    pub attachments: Arc<dyn AttachmentRepository>,
    db: Option<DatabasePool>,
}

impl Store {
    /// Postgres-backed store
    pub fn postgres(pool: DatabasePool) -> Self {
        Self {
            campaigns: Arc::new(DbCampaignRepository::new(pool.clone())),
            recipients: Arc::new(DbRecipientRepository::new(pool.clone())),
            groups: Arc::new(DbGroupRepository::new(pool.clone())),
            campaign_recipients: Arc::new(DbCampaignRecipientRepository::new(pool.clone())),
            events: Arc::new(DbEmailEventRepository::new(pool.clone())),
            tokens: Arc::new(DbOAuthTokenRepository::new(pool.clone())),
            users: Arc::new(DbUserRepository::new(pool.clone())),
            attachments: Arc::new(DbAttachmentRepository::new(pool.clone())),
            db: Some(pool),
        }
    }

    /// Store backed by a single in-memory state
    #[cfg(any(test, feature = "memory"))]
    pub fn memory(backend: Arc<crate::memory::MemoryStore>) -> Self {
        Self {
            campaigns: backend.clone(),
            recipients: backend.clone(),
            groups: backend.clone(),
            campaign_recipients: backend.clone(),
            events: backend.clone(),
            tokens: backend.clone(),
            users: backend.clone(),
            attachments: backend,
            db: None,
        }
    }

    /// Check the backing database, if any
    pub async fn health_check(&self) -> Result<()> {
        match &self.db {
            Some(pool) => pool.health_check().await,
            None => Ok(()),
        }
    }
}
