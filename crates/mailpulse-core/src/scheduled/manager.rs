//! Campaign Manager - audience resolution, scheduling and campaign lifecycle

use crate::dispatch::clamp_count;
use chrono::{DateTime, Utc};
use mailpulse_common::types::{CampaignId, GroupId, RecipientId, UserId};
use mailpulse_storage::models::{
    AttachmentData, Campaign, CampaignRecipient, CampaignStatus, CreateCampaign, EmailEvent,
    Recipient,
};
use mailpulse_storage::Store;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

/// Campaign manager errors
#[derive(Error, Debug)]
pub enum CampaignError {
    #[error("Campaign not found")]
    NotFound,

    #[error("Audience has no active recipients")]
    EmptyAudience,

    #[error("Scheduled campaigns need a send time")]
    NotScheduled,

    #[error("Campaign cannot change state while {0}")]
    InvalidState(String),

    #[error("Storage error: {0}")]
    Storage(#[from] mailpulse_common::Error),
}

/// Who a campaign targets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "ids", rename_all = "snake_case")]
pub enum Audience {
    /// Every active recipient of the user
    All,
    /// Active members of these groups, each recipient once
    Groups(Vec<GroupId>),
    /// These recipients, if active
    Recipients(Vec<RecipientId>),
}

/// Schedule campaign input
#[derive(Debug, Clone)]
pub struct ScheduleCampaign {
    pub user_id: UserId,
    pub name: String,
    pub subject: String,
    pub content: String,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub audience: Audience,
    pub attachments: Vec<AttachmentData>,
}

/// Campaign with its per-recipient rows and event log
#[derive(Debug, Clone, Serialize)]
pub struct CampaignReport {
    pub campaign: Campaign,
    pub recipients: Vec<CampaignRecipient>,
    pub events: Vec<EmailEvent>,
}

/// Campaign Manager
#[derive(Clone)]
pub struct CampaignManager {
    store: Store,
}

impl CampaignManager {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Resolve an audience to active recipients. Unsubscribed recipients are
    /// excluded here; once snapshotted, a recipient stays in the campaign.
    pub async fn resolve_audience(
        &self,
        user_id: UserId,
        audience: &Audience,
    ) -> Result<Vec<Recipient>, CampaignError> {
        let recipients = match audience {
            Audience::All => self.store.recipients.list_active(user_id).await?,
            Audience::Groups(group_ids) => {
                self.store
                    .groups
                    .list_active_members(user_id, group_ids)
                    .await?
            }
            Audience::Recipients(ids) => self
                .store
                .recipients
                .get_many(user_id, ids)
                .await?
                .into_iter()
                .filter(Recipient::is_active)
                .collect(),
        };
        Ok(recipients)
    }

    /// Resolve an audience for an immediate send
    pub async fn audience_for_send(
        &self,
        user_id: UserId,
        audience: &Audience,
    ) -> Result<Vec<Recipient>, CampaignError> {
        let recipients = self.resolve_audience(user_id, audience).await?;
        if recipients.is_empty() {
            return Err(CampaignError::EmptyAudience);
        }
        Ok(recipients)
    }

    /// Create a scheduled campaign and snapshot its audience.
    ///
    /// The row stays `draft` until the snapshot and attachments are stored, so
    /// a sweep never sees a half-written campaign. A failure leaves a draft
    /// that is never dispatched.
    pub async fn schedule_campaign(&self, input: ScheduleCampaign) -> Result<Campaign, CampaignError> {
        let scheduled_at = input.scheduled_at.ok_or(CampaignError::NotScheduled)?;

        let recipients = self.resolve_audience(input.user_id, &input.audience).await?;
        if recipients.is_empty() {
            return Err(CampaignError::EmptyAudience);
        }
        let recipient_ids: Vec<RecipientId> = recipients.iter().map(|r| r.id).collect();

        let campaign = self
            .store
            .campaigns
            .create(CreateCampaign {
                user_id: input.user_id,
                name: input.name,
                subject: input.subject,
                content: input.content,
                status: CampaignStatus::Draft,
                scheduled_at: Some(scheduled_at),
                total_recipients: clamp_count(recipient_ids.len()),
            })
            .await?;

        if let Err(e) = self.store_payload(campaign.id, &recipient_ids, &input.attachments).await {
            warn!("Campaign {} left as draft: {}", campaign.id, e);
            return Err(e);
        }

        if !self.store.campaigns.mark_scheduled(campaign.id).await? {
            let current = self.get_campaign(input.user_id, campaign.id).await?;
            return Err(CampaignError::InvalidState(current.status));
        }

        info!(
            "Campaign {} scheduled with {} recipients, starting at {}",
            campaign.id,
            recipient_ids.len(),
            scheduled_at
        );

        self.get_campaign(input.user_id, campaign.id).await
    }

    async fn store_payload(
        &self,
        campaign_id: CampaignId,
        recipient_ids: &[RecipientId],
        attachments: &[AttachmentData],
    ) -> Result<(), CampaignError> {
        self.store
            .campaign_recipients
            .create_snapshot(campaign_id, recipient_ids)
            .await?;

        for attachment in attachments {
            self.store.attachments.add(campaign_id, attachment).await?;
        }
        Ok(())
    }

    pub async fn get_campaign(&self, user_id: UserId, campaign_id: CampaignId) -> Result<Campaign, CampaignError> {
        self.store
            .campaigns
            .get_for_user(user_id, campaign_id)
            .await?
            .ok_or(CampaignError::NotFound)
    }

    /// Archive a campaign. Campaigns are never deleted.
    pub async fn archive_campaign(
        &self,
        user_id: UserId,
        campaign_id: CampaignId,
    ) -> Result<Campaign, CampaignError> {
        let campaign = self.get_campaign(user_id, campaign_id).await?;
        if campaign.status_enum() == Some(CampaignStatus::Archived) {
            return Ok(campaign);
        }

        if !self.store.campaigns.archive(user_id, campaign_id).await? {
            return Err(CampaignError::InvalidState(campaign.status));
        }

        info!("Campaign {} archived", campaign_id);
        self.get_campaign(user_id, campaign_id).await
    }

    pub async fn campaign_report(
        &self,
        user_id: UserId,
        campaign_id: CampaignId,
    ) -> Result<CampaignReport, CampaignError> {
        let campaign = self.get_campaign(user_id, campaign_id).await?;
        let recipients = self
            .store
            .campaign_recipients
            .list_by_campaign(campaign_id)
            .await?;
        let events = self.store.events.list_by_campaign(campaign_id).await?;

        Ok(CampaignReport {
            campaign,
            recipients,
            events,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduled::CampaignScheduler;
    use crate::testing::Fixture;
    use mailpulse_storage::models::{AttachmentData, RecipientStatus};
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    fn input(user_id: UserId, audience: Audience) -> ScheduleCampaign {
        ScheduleCampaign {
            user_id,
            name: "Newsletter".to_string(),
            subject: "News for {{first_name}}".to_string(),
            content: "<p>News</p>".to_string(),
            scheduled_at: Some(Utc::now()),
            audience,
            attachments: vec![],
        }
    }

    #[tokio::test]
    async fn test_resolve_audience_filters_unsubscribed() {
        let fixture = Fixture::new().await;
        let a = fixture.recipient("a@example.com", None).await;
        let b = fixture.recipient("b@example.com", None).await;
        let c = fixture.recipient("c@example.com", None).await;
        fixture
            .store
            .recipients
            .set_status(b.id, RecipientStatus::Unsubscribed)
            .await
            .unwrap();
        let manager = CampaignManager::new(fixture.store.clone());

        let all = manager.resolve_audience(fixture.user_id, &Audience::All).await.unwrap();
        assert_eq!(all.iter().map(|r| r.id).collect::<Vec<_>>(), vec![a.id, c.id]);

        let picked = manager
            .resolve_audience(fixture.user_id, &Audience::Recipients(vec![b.id, c.id]))
            .await
            .unwrap();
        assert_eq!(picked.iter().map(|r| r.id).collect::<Vec<_>>(), vec![c.id]);

        let other_user = manager
            .resolve_audience(Uuid::new_v4(), &Audience::Recipients(vec![a.id]))
            .await
            .unwrap();
        assert!(other_user.is_empty());
    }

    #[tokio::test]
    async fn test_groups_are_deduplicated() {
        let fixture = Fixture::new().await;
        let a = fixture.recipient("a@example.com", None).await;
        let b = fixture.recipient("b@example.com", None).await;
        let g1 = fixture.group("One", &[a.id, b.id]).await;
        let g2 = fixture.group("Two", &[b.id]).await;
        let manager = CampaignManager::new(fixture.store.clone());

        let members = manager
            .resolve_audience(fixture.user_id, &Audience::Groups(vec![g1.id, g2.id]))
            .await
            .unwrap();
        assert_eq!(members.len(), 2);
    }

    #[tokio::test]
    async fn test_schedule_snapshots_audience() {
        let fixture = Fixture::new().await;
        let a = fixture.recipient("a@example.com", None).await;
        let b = fixture.recipient("b@example.com", None).await;
        let manager = CampaignManager::new(fixture.store.clone());

        let mut request = input(fixture.user_id, Audience::All);
        request.attachments = vec![AttachmentData {
            filename: "menu.pdf".to_string(),
            content_type: "application/pdf".to_string(),
            content: vec![1, 2, 3],
        }];
        let campaign = manager.schedule_campaign(request).await.unwrap();

        assert_eq!(campaign.status_enum(), Some(CampaignStatus::Scheduled));
        assert_eq!(campaign.total_recipients, 2);

        let report = manager.campaign_report(fixture.user_id, campaign.id).await.unwrap();
        let mut snapshot: Vec<_> = report.recipients.iter().map(|r| r.recipient_id).collect();
        snapshot.sort();
        let mut expected = vec![a.id, b.id];
        expected.sort();
        assert_eq!(snapshot, expected);
        assert!(report.events.is_empty());

        let attachments = fixture.store.attachments.list(campaign.id).await.unwrap();
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].content, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_failed_attachment_never_dispatches() {
        let fixture = Fixture::new().await;
        fixture.connect(Utc::now() + chrono::Duration::hours(1)).await;
        fixture.recipient("a@example.com", None).await;
        let manager = CampaignManager::new(fixture.store.clone());
        let scheduler = CampaignScheduler::new(fixture.store.clone(), fixture.dispatcher());

        let request = || {
            let mut request = input(fixture.user_id, Audience::All);
            request.attachments = vec![AttachmentData {
                filename: "contract.pdf".to_string(),
                content_type: "application/pdf".to_string(),
                content: b"%PDF-1.4".to_vec(),
            }];
            request
        };

        fixture.backend.fail_operation("attachments.add").await;
        let err = manager.schedule_campaign(request()).await.unwrap_err();
        assert!(matches!(err, CampaignError::Storage(_)));

        // The half-written campaign is a draft, invisible to the sweep
        assert!(fixture.store.campaigns.list_due(Utc::now()).await.unwrap().is_empty());
        assert!(scheduler.process_scheduled().await.unwrap().is_empty());
        assert_eq!(fixture.provider.sent_count(), 0);

        fixture.backend.clear_failures().await;
        let campaign = manager.schedule_campaign(request()).await.unwrap();
        let runs = scheduler.process_scheduled().await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].id, campaign.id);
        let messages = fixture.provider.messages_to("a@example.com");
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("contract.pdf"));
    }

    #[tokio::test]
    async fn test_snapshot_failure_leaves_draft() {
        let fixture = Fixture::new().await;
        fixture.recipient("a@example.com", None).await;
        let manager = CampaignManager::new(fixture.store.clone());

        fixture
            .backend
            .fail_operation("campaign_recipients.create_snapshot")
            .await;
        assert!(matches!(
            manager.schedule_campaign(input(fixture.user_id, Audience::All)).await,
            Err(CampaignError::Storage(_))
        ));
        assert!(fixture.store.campaigns.list_due(Utc::now()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_schedule_validation() {
        let fixture = Fixture::new().await;
        let manager = CampaignManager::new(fixture.store.clone());

        let err = manager
            .schedule_campaign(input(fixture.user_id, Audience::All))
            .await
            .unwrap_err();
        assert!(matches!(err, CampaignError::EmptyAudience));

        fixture.recipient("a@example.com", None).await;
        let mut request = input(fixture.user_id, Audience::All);
        request.scheduled_at = None;
        let err = manager.schedule_campaign(request).await.unwrap_err();
        assert!(matches!(err, CampaignError::NotScheduled));

        let err = manager
            .audience_for_send(fixture.user_id, &Audience::Recipients(vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, CampaignError::EmptyAudience));
    }

    #[tokio::test]
    async fn test_archive() {
        let fixture = Fixture::new().await;
        let a = fixture.recipient("a@example.com", None).await;
        let (campaign, _) = fixture.scheduled_campaign(&[a.id], Utc::now()).await;
        let manager = CampaignManager::new(fixture.store.clone());

        let archived = manager.archive_campaign(fixture.user_id, campaign.id).await.unwrap();
        assert_eq!(archived.status_enum(), Some(CampaignStatus::Archived));
        // idempotent
        manager.archive_campaign(fixture.user_id, campaign.id).await.unwrap();

        assert!(matches!(
            manager.archive_campaign(Uuid::new_v4(), campaign.id).await,
            Err(CampaignError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_archive_refused_while_sending() {
        let fixture = Fixture::new().await;
        let a = fixture.recipient("a@example.com", None).await;
        let (campaign, _) = fixture.scheduled_campaign(&[a.id], Utc::now()).await;
        assert!(fixture
            .store
            .campaigns
            .claim_scheduled(campaign.id, Utc::now())
            .await
            .unwrap());
        let manager = CampaignManager::new(fixture.store.clone());

        assert!(matches!(
            manager.archive_campaign(fixture.user_id, campaign.id).await,
            Err(CampaignError::InvalidState(status)) if status == "sending"
        ));
    }

    #[test]
    fn test_audience_wire_format() {
        let audience: Audience = serde_json::from_str(r#"{"type":"all"}"#).unwrap();
        assert_eq!(audience, Audience::All);

        let id = Uuid::nil();
        let audience: Audience =
            serde_json::from_value(serde_json::json!({"type": "groups", "ids": [id]})).unwrap();
        assert_eq!(audience, Audience::Groups(vec![id]));
    }
}
