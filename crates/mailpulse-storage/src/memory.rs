//! In-memory storage backend
//!
//! Mirrors the Postgres repositories closely enough to exercise the engine
//! without a database. Every operation runs under one write lock, which gives
//! the same atomicity the conditional SQL statements provide.

use crate::models::*;
use crate::repository::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mailpulse_common::types::{
    CampaignId, CampaignRecipientId, GroupId, RecipientId, UserId,
};
use mailpulse_common::{Error, Result};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct MemoryState {
    users: HashMap<UserId, UserProfile>,
    tokens: HashMap<UserId, OAuthTokenRecord>,
    recipients: Vec<Recipient>,
    groups: Vec<RecipientGroup>,
    members: Vec<(GroupId, RecipientId)>,
    campaigns: Vec<Campaign>,
    campaign_recipients: Vec<CampaignRecipient>,
    events: Vec<EmailEvent>,
    attachments: Vec<CampaignAttachment>,
}

/// In-memory backend implementing every repository trait
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
    /// Operation name to the number of calls still allowed to succeed
    failing: RwLock<HashMap<&'static str, usize>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later call of the named operation fail with a database error
    pub async fn fail_operation(&self, operation: &'static str) {
        self.fail_operation_after(operation, 0).await;
    }

    /// Let the next `calls` calls of the named operation succeed, then fail
    pub async fn fail_operation_after(&self, operation: &'static str, calls: usize) {
        self.failing.write().await.insert(operation, calls);
    }

    pub async fn clear_failures(&self) {
        self.failing.write().await.clear();
    }

    async fn check(&self, operation: &'static str) -> Result<()> {
        match self.failing.write().await.get_mut(operation) {
            Some(0) => Err(Error::Database(format!("injected failure: {}", operation))),
            Some(remaining) => {
                *remaining -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// All events, in append order
    pub async fn all_events(&self) -> Vec<EmailEvent> {
        self.state.read().await.events.clone()
    }

    /// All campaigns, in creation order
    pub async fn all_campaigns(&self) -> Vec<Campaign> {
        self.state.read().await.campaigns.clone()
    }
}

#[async_trait]
impl CampaignRepository for MemoryStore {
    async fn create(&self, input: CreateCampaign) -> Result<Campaign> {
        self.check("campaigns.create").await?;
        let now = Utc::now();
        let campaign = Campaign {
            id: Uuid::now_v7(),
            user_id: input.user_id,
            name: input.name,
            subject: input.subject,
            content: input.content,
            status: input.status.to_string(),
            scheduled_at: input.scheduled_at,
            total_recipients: input.total_recipients,
            stats_sent: 0,
            stats_opened: 0,
            stats_clicked: 0,
            stats_bounced: 0,
            started_at: None,
            sent_at: None,
            created_at: now,
            updated_at: now,
        };
        self.state.write().await.campaigns.push(campaign.clone());
        Ok(campaign)
    }

    async fn get(&self, id: CampaignId) -> Result<Option<Campaign>> {
        let state = self.state.read().await;
        Ok(state.campaigns.iter().find(|c| c.id == id).cloned())
    }

    async fn get_for_user(&self, user_id: UserId, id: CampaignId) -> Result<Option<Campaign>> {
        let state = self.state.read().await;
        Ok(state
            .campaigns
            .iter()
            .find(|c| c.id == id && c.user_id == user_id)
            .cloned())
    }

    async fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<Campaign>> {
        self.check("campaigns.list_due").await?;
        let state = self.state.read().await;
        let mut due: Vec<Campaign> = state
            .campaigns
            .iter()
            .filter(|c| c.status == "scheduled" && c.scheduled_at.is_some_and(|at| at <= now))
            .cloned()
            .collect();
        due.sort_by_key(|c| c.scheduled_at);
        Ok(due)
    }

    async fn claim_scheduled(&self, id: CampaignId, at: DateTime<Utc>) -> Result<bool> {
        self.check("campaigns.claim_scheduled").await?;
        let mut state = self.state.write().await;
        match state
            .campaigns
            .iter_mut()
            .find(|c| c.id == id && c.status == "scheduled")
        {
            Some(campaign) => {
                campaign.status = CampaignStatus::Sending.to_string();
                campaign.started_at = Some(at);
                campaign.updated_at = at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn release_claim(&self, id: CampaignId) -> Result<bool> {
        let mut state = self.state.write().await;
        match state
            .campaigns
            .iter_mut()
            .find(|c| c.id == id && c.status == "sending")
        {
            Some(campaign) => {
                campaign.status = CampaignStatus::Scheduled.to_string();
                campaign.started_at = None;
                campaign.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_scheduled(&self, id: CampaignId) -> Result<bool> {
        self.check("campaigns.mark_scheduled").await?;
        let mut state = self.state.write().await;
        match state
            .campaigns
            .iter_mut()
            .find(|c| c.id == id && c.status == "draft" && c.scheduled_at.is_some())
        {
            Some(campaign) => {
                campaign.status = CampaignStatus::Scheduled.to_string();
                campaign.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn begin_run(&self, id: CampaignId, total_recipients: i32, at: DateTime<Utc>) -> Result<bool> {
        self.check("campaigns.begin_run").await?;
        let mut state = self.state.write().await;
        match state.campaigns.iter_mut().find(|c| {
            c.id == id && matches!(c.status.as_str(), "draft" | "scheduled" | "sending")
        }) {
            Some(campaign) => {
                campaign.status = CampaignStatus::Sending.to_string();
                campaign.total_recipients = total_recipients;
                campaign.started_at.get_or_insert(at);
                campaign.updated_at = at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn finish_run(&self, id: CampaignId, outcome: CampaignOutcome) -> Result<()> {
        self.check("campaigns.finish_run").await?;
        let mut state = self.state.write().await;
        let campaign = state
            .campaigns
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| Error::NotFound(format!("campaign {}", id)))?;
        campaign.status = outcome.status.to_string();
        campaign.stats_sent = outcome.stats_sent;
        campaign.total_recipients = outcome.total_recipients;
        campaign.sent_at = Some(outcome.sent_at);
        campaign.updated_at = outcome.sent_at;
        Ok(())
    }

    async fn increment_opened(&self, id: CampaignId) -> Result<()> {
        self.check("campaigns.increment_opened").await?;
        let mut state = self.state.write().await;
        if let Some(campaign) = state.campaigns.iter_mut().find(|c| c.id == id) {
            campaign.stats_opened += 1;
        }
        Ok(())
    }

    async fn increment_clicked(&self, id: CampaignId) -> Result<()> {
        self.check("campaigns.increment_clicked").await?;
        let mut state = self.state.write().await;
        if let Some(campaign) = state.campaigns.iter_mut().find(|c| c.id == id) {
            campaign.stats_clicked += 1;
        }
        Ok(())
    }

    async fn archive(&self, user_id: UserId, id: CampaignId) -> Result<bool> {
        let mut state = self.state.write().await;
        match state
            .campaigns
            .iter_mut()
            .find(|c| c.id == id && c.user_id == user_id && c.status != "sending")
        {
            Some(campaign) => {
                campaign.status = CampaignStatus::Archived.to_string();
                campaign.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl RecipientRepository for MemoryStore {
    async fn create(&self, input: CreateRecipient) -> Result<Recipient> {
        let mut state = self.state.write().await;
        let email = input.email.to_lowercase();
        if state
            .recipients
            .iter()
            .any(|r| r.user_id == input.user_id && r.email == email)
        {
            return Err(Error::Database(format!("duplicate recipient {}", email)));
        }

        let now = Utc::now();
        let recipient = Recipient {
            id: Uuid::now_v7(),
            user_id: input.user_id,
            email,
            first_name: input.first_name,
            last_name: input.last_name,
            custom_fields: input.custom_fields.unwrap_or_else(|| serde_json::json!({})),
            status: RecipientStatus::Active.to_string(),
            created_at: now,
            updated_at: now,
        };
        state.recipients.push(recipient.clone());
        Ok(recipient)
    }

    async fn get(&self, id: RecipientId) -> Result<Option<Recipient>> {
        let state = self.state.read().await;
        Ok(state.recipients.iter().find(|r| r.id == id).cloned())
    }

    async fn get_many(&self, user_id: UserId, ids: &[RecipientId]) -> Result<Vec<Recipient>> {
        self.check("recipients.get_many").await?;
        let state = self.state.read().await;
        Ok(state
            .recipients
            .iter()
            .filter(|r| r.user_id == user_id && ids.contains(&r.id))
            .cloned()
            .collect())
    }

    async fn list_active(&self, user_id: UserId) -> Result<Vec<Recipient>> {
        let state = self.state.read().await;
        Ok(state
            .recipients
            .iter()
            .filter(|r| r.user_id == user_id && r.is_active())
            .cloned()
            .collect())
    }

    async fn set_status(&self, id: RecipientId, status: RecipientStatus) -> Result<bool> {
        let mut state = self.state.write().await;
        match state.recipients.iter_mut().find(|r| r.id == id) {
            Some(recipient) => {
                recipient.status = status.to_string();
                recipient.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl GroupRepository for MemoryStore {
    async fn create(&self, user_id: UserId, name: &str) -> Result<RecipientGroup> {
        let group = RecipientGroup {
            id: Uuid::now_v7(),
            user_id,
            name: name.to_string(),
            created_at: Utc::now(),
        };
        self.state.write().await.groups.push(group.clone());
        Ok(group)
    }

    async fn add_member(&self, group_id: GroupId, recipient_id: RecipientId) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.members.contains(&(group_id, recipient_id)) {
            state.members.push((group_id, recipient_id));
        }
        Ok(())
    }

    async fn remove_member(&self, group_id: GroupId, recipient_id: RecipientId) -> Result<bool> {
        let mut state = self.state.write().await;
        let before = state.members.len();
        state.members.retain(|m| *m != (group_id, recipient_id));
        Ok(state.members.len() < before)
    }

    async fn list_active_members(&self, user_id: UserId, group_ids: &[GroupId]) -> Result<Vec<Recipient>> {
        let state = self.state.read().await;
        let owned: HashSet<GroupId> = state
            .groups
            .iter()
            .filter(|g| g.user_id == user_id && group_ids.contains(&g.id))
            .map(|g| g.id)
            .collect();
        let member_ids: HashSet<RecipientId> = state
            .members
            .iter()
            .filter(|(group_id, _)| owned.contains(group_id))
            .map(|(_, recipient_id)| *recipient_id)
            .collect();

        Ok(state
            .recipients
            .iter()
            .filter(|r| member_ids.contains(&r.id) && r.is_active())
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CampaignRecipientRepository for MemoryStore {
    async fn create_snapshot(
        &self,
        campaign_id: CampaignId,
        recipient_ids: &[RecipientId],
    ) -> Result<Vec<CampaignRecipient>> {
        self.check("campaign_recipients.create_snapshot").await?;
        let mut state = self.state.write().await;
        let now = Utc::now();
        for recipient_id in recipient_ids {
            let exists = state
                .campaign_recipients
                .iter()
                .any(|cr| cr.campaign_id == campaign_id && cr.recipient_id == *recipient_id);
            if !exists {
                state.campaign_recipients.push(CampaignRecipient {
                    id: Uuid::new_v4(),
                    campaign_id,
                    recipient_id: *recipient_id,
                    status: DeliveryStatus::Pending.to_string(),
                    sent_at: None,
                    opened_at: None,
                    clicked_at: None,
                    last_error: None,
                    created_at: now,
                    updated_at: now,
                });
            }
        }

        Ok(state
            .campaign_recipients
            .iter()
            .filter(|cr| cr.campaign_id == campaign_id)
            .cloned()
            .collect())
    }

    async fn get(&self, id: CampaignRecipientId) -> Result<Option<CampaignRecipient>> {
        let state = self.state.read().await;
        Ok(state.campaign_recipients.iter().find(|cr| cr.id == id).cloned())
    }

    async fn list_by_campaign(&self, campaign_id: CampaignId) -> Result<Vec<CampaignRecipient>> {
        self.check("campaign_recipients.list_by_campaign").await?;
        let state = self.state.read().await;
        Ok(state
            .campaign_recipients
            .iter()
            .filter(|cr| cr.campaign_id == campaign_id)
            .cloned()
            .collect())
    }

    async fn mark_sent(&self, id: CampaignRecipientId, at: DateTime<Utc>) -> Result<()> {
        self.check("campaign_recipients.mark_sent").await?;
        let mut state = self.state.write().await;
        if let Some(row) = state.campaign_recipients.iter_mut().find(|cr| cr.id == id) {
            if row.status == "pending" {
                row.status = DeliveryStatus::Sent.to_string();
            }
            row.sent_at = Some(at);
            row.last_error = None;
            row.updated_at = at;
        }
        Ok(())
    }

    async fn mark_failed(&self, id: CampaignRecipientId, error: &str) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(row) = state.campaign_recipients.iter_mut().find(|cr| cr.id == id) {
            row.last_error = Some(error.to_string());
            row.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn record_open(&self, id: CampaignRecipientId, at: DateTime<Utc>) -> Result<Option<OpenUpdate>> {
        self.check("campaign_recipients.record_open").await?;
        let mut state = self.state.write().await;
        let Some(row) = state.campaign_recipients.iter_mut().find(|cr| cr.id == id) else {
            return Ok(None);
        };

        let first_open = row.opened_at.is_none();
        if first_open {
            row.opened_at = Some(at);
            if matches!(row.status.as_str(), "pending" | "sent") {
                row.status = DeliveryStatus::Opened.to_string();
            }
            row.updated_at = at;
        }

        Ok(Some(OpenUpdate {
            campaign_id: row.campaign_id,
            recipient_id: row.recipient_id,
            first_open,
        }))
    }

    async fn record_click(&self, id: CampaignRecipientId, at: DateTime<Utc>) -> Result<Option<ClickUpdate>> {
        self.check("campaign_recipients.record_click").await?;
        let mut state = self.state.write().await;
        let Some(row) = state.campaign_recipients.iter_mut().find(|cr| cr.id == id) else {
            return Ok(None);
        };

        let first_click = row.clicked_at.is_none();
        row.clicked_at = Some(at);
        if row.status != "bounced" {
            row.status = DeliveryStatus::Clicked.to_string();
        }
        row.updated_at = at;

        Ok(Some(ClickUpdate {
            campaign_id: row.campaign_id,
            recipient_id: row.recipient_id,
            first_click,
        }))
    }
}

#[async_trait]
impl EmailEventRepository for MemoryStore {
    async fn append(&self, event: NewEmailEvent) -> Result<EmailEvent> {
        self.check("events.append").await?;
        let row = EmailEvent {
            id: Uuid::now_v7(),
            campaign_id: event.campaign_id,
            recipient_id: event.recipient_id,
            event_type: event.event_type.to_string(),
            url: event.url,
            user_agent: event.user_agent,
            created_at: event.created_at,
        };
        self.state.write().await.events.push(row.clone());
        Ok(row)
    }

    async fn list_by_campaign(&self, campaign_id: CampaignId) -> Result<Vec<EmailEvent>> {
        let state = self.state.read().await;
        Ok(state
            .events
            .iter()
            .filter(|e| e.campaign_id == campaign_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl OAuthTokenRepository for MemoryStore {
    async fn find(&self, user_id: UserId) -> Result<Option<OAuthTokenRecord>> {
        self.check("tokens.find").await?;
        Ok(self.state.read().await.tokens.get(&user_id).cloned())
    }

    async fn upsert(&self, input: SaveOAuthToken) -> Result<()> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let created_at = state
            .tokens
            .get(&input.user_id)
            .map(|t| t.created_at)
            .unwrap_or(now);
        state.tokens.insert(
            input.user_id,
            OAuthTokenRecord {
                user_id: input.user_id,
                access_token: input.access_token,
                refresh_token: input.refresh_token,
                expires_at: input.expires_at,
                account_email: input.account_email,
                created_at,
                updated_at: now,
            },
        );
        Ok(())
    }

    async fn update_access_token(
        &self,
        user_id: UserId,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        self.check("tokens.update_access_token").await?;
        let mut state = self.state.write().await;
        let record = state
            .tokens
            .get_mut(&user_id)
            .ok_or_else(|| Error::NotConnected(user_id.to_string()))?;
        record.access_token = access_token.to_string();
        if let Some(refresh_token) = refresh_token {
            record.refresh_token = refresh_token.to_string();
        }
        record.expires_at = expires_at;
        record.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn get_profile(&self, user_id: UserId) -> Result<Option<UserProfile>> {
        Ok(self.state.read().await.users.get(&user_id).cloned())
    }

    async fn upsert_profile(&self, input: UpsertUserProfile) -> Result<UserProfile> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let created_at = state
            .users
            .get(&input.id)
            .map(|u| u.created_at)
            .unwrap_or(now);
        let profile = UserProfile {
            id: input.id,
            email: input.email,
            display_name: input.display_name,
            created_at,
            updated_at: now,
        };
        state.users.insert(profile.id, profile.clone());
        Ok(profile)
    }
}

#[async_trait]
impl AttachmentRepository for MemoryStore {
    async fn add(&self, campaign_id: CampaignId, attachment: &AttachmentData) -> Result<CampaignAttachment> {
        self.check("attachments.add").await?;
        let row = CampaignAttachment {
            id: Uuid::now_v7(),
            campaign_id,
            filename: attachment.filename.clone(),
            content_type: attachment.content_type.clone(),
            content: attachment.content.clone(),
            created_at: Utc::now(),
        };
        self.state.write().await.attachments.push(row.clone());
        Ok(row)
    }

    async fn list(&self, campaign_id: CampaignId) -> Result<Vec<CampaignAttachment>> {
        let state = self.state.read().await;
        Ok(state
            .attachments
            .iter()
            .filter(|a| a.campaign_id == campaign_id)
            .cloned()
            .collect())
    }
}
