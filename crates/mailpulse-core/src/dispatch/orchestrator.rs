//! Delivery Orchestrator - one personalized message per recipient
//!
//! A run moves its campaign `draft|scheduled -> sending` before the first
//! message, snapshots the audience so every message carries its tracking id,
//! then sends strictly in order. A recipient that fails is logged and skipped.
//! The run ends `sent` when every recipient succeeded, `partially_failed`
//! otherwise.

use super::{DispatchError, SendError, Throttle};
use crate::compose::{self, MessageComposer};
use crate::personalize;
use crate::token::{MailboxSession, TokenStore};
use crate::tracking::TrackingLinks;
use chrono::Utc;
use lettre::message::Mailbox;
use mailpulse_common::types::{CampaignId, CampaignRecipientId, RecipientId, UserId};
use mailpulse_storage::models::{
    AttachmentData, CampaignOutcome, CampaignStatus, CreateCampaign, EventType, NewEmailEvent,
    Recipient,
};
use mailpulse_storage::Store;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Input of one dispatch run
#[derive(Debug, Clone)]
pub struct SendCampaignRequest {
    pub user_id: UserId,
    /// Set on the scheduled path; a new campaign row is created otherwise
    pub campaign_id: Option<CampaignId>,
    pub name: String,
    pub subject: String,
    pub content: String,
    pub recipients: Vec<Recipient>,
    pub attachments: Vec<AttachmentData>,
}

/// Outcome of one dispatch run
#[derive(Debug, Clone, Serialize)]
pub struct DispatchReport {
    pub campaign_id: CampaignId,
    pub sent: usize,
    pub failed: usize,
    pub total: usize,
    pub status: CampaignStatus,
    /// The run was interrupted by shutdown before every recipient was tried
    pub cancelled: bool,
}

/// Delivery orchestrator
#[derive(Clone)]
pub struct Dispatcher {
    store: Store,
    tokens: TokenStore,
    links: TrackingLinks,
    composer: MessageComposer,
    throttle: Arc<dyn Throttle>,
}

impl Dispatcher {
    pub fn new(store: Store, tokens: TokenStore, links: TrackingLinks, throttle: Arc<dyn Throttle>) -> Self {
        Self {
            store,
            tokens,
            links,
            composer: MessageComposer::new(),
            throttle,
        }
    }

    pub fn with_composer(mut self, composer: MessageComposer) -> Self {
        self.composer = composer;
        self
    }

    /// Send one campaign. Returns once every recipient has been tried.
    pub async fn send_campaign(&self, request: SendCampaignRequest) -> Result<DispatchReport, DispatchError> {
        let mut session = self.tokens.get_valid_client(request.user_id).await?;
        let from = self.sender_identity(request.user_id, &session).await?;

        let _permit = self
            .throttle
            .acquire_run()
            .await
            .ok_or(DispatchError::ShuttingDown)?;

        let total = request.recipients.len();
        let campaign_id = self.begin(&request, total).await?;

        let recipient_ids: Vec<RecipientId> = request.recipients.iter().map(|r| r.id).collect();
        let snapshot = match self
            .store
            .campaign_recipients
            .create_snapshot(campaign_id, &recipient_ids)
            .await
        {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.abandon(&request, campaign_id, total).await;
                return Err(DispatchError::Persistence(e));
            }
        };
        let tracking_ids: HashMap<RecipientId, CampaignRecipientId> =
            snapshot.iter().map(|row| (row.recipient_id, row.id)).collect();

        info!(
            "Dispatching campaign {} to {} recipients from {}",
            campaign_id, total, from
        );

        let mut sent = 0usize;
        let mut cancelled = false;

        for (index, recipient) in request.recipients.iter().enumerate() {
            if index > 0 && !self.throttle.pause().await {
                warn!(
                    "Shutdown during campaign {}, stopping after {} of {} recipients",
                    campaign_id, index, total
                );
                cancelled = true;
                break;
            }

            let Some(&tracking_id) = tracking_ids.get(&recipient.id) else {
                warn!("Recipient {} missing from snapshot of {}", recipient.id, campaign_id);
                continue;
            };

            match self
                .deliver(&mut session, &from, &request, recipient, tracking_id)
                .await
            {
                Ok(message_id) => {
                    sent += 1;
                    self.record_sent(campaign_id, recipient.id, tracking_id).await;
                    debug!(
                        campaign_id = %campaign_id,
                        recipient = %recipient.email,
                        message_id = %message_id,
                        "Message sent"
                    );
                }
                Err(e) => {
                    warn!(
                        campaign_id = %campaign_id,
                        recipient = %recipient.email,
                        error = %e,
                        "Send failed, continuing with next recipient"
                    );
                    if let Err(db_err) = self
                        .store
                        .campaign_recipients
                        .mark_failed(tracking_id, &e.to_string())
                        .await
                    {
                        warn!("Failed to record send failure for {}: {}", tracking_id, db_err);
                    }
                }
            }
        }

        let status = if sent == total && !cancelled {
            CampaignStatus::Sent
        } else {
            CampaignStatus::PartiallyFailed
        };

        let outcome = CampaignOutcome {
            status,
            stats_sent: clamp_count(sent),
            total_recipients: clamp_count(total),
            sent_at: Utc::now(),
        };

        if let Err(source) = self.store.campaigns.finish_run(campaign_id, outcome).await {
            error!(
                "Campaign {} sent {} of {} messages but the result could not be recorded: {}",
                campaign_id, sent, total, source
            );
            return Err(DispatchError::Unrecorded {
                campaign_id,
                sent,
                source,
            });
        }

        info!(
            "Campaign {} finished: {} sent, {} failed, status {}",
            campaign_id,
            sent,
            total - sent,
            status
        );

        Ok(DispatchReport {
            campaign_id,
            sent,
            failed: total - sent,
            total,
            status,
            cancelled,
        })
    }

    /// Display name from the user profile, address from the connected account
    async fn sender_identity(
        &self,
        user_id: UserId,
        session: &MailboxSession,
    ) -> Result<Mailbox, DispatchError> {
        let profile = self
            .store
            .users
            .get_profile(user_id)
            .await
            .map_err(DispatchError::Persistence)?;
        let display_name = profile.and_then(|p| p.display_name);

        compose::mailbox(display_name.as_deref(), session.account_email())
            .map_err(DispatchError::InvalidSender)
    }

    /// Persist the `sending` marker, creating the campaign on the immediate path
    async fn begin(&self, request: &SendCampaignRequest, total: usize) -> Result<CampaignId, DispatchError> {
        let campaign_id = match request.campaign_id {
            Some(id) => id,
            None => {
                self.store
                    .campaigns
                    .create(CreateCampaign {
                        user_id: request.user_id,
                        name: request.name.clone(),
                        subject: request.subject.clone(),
                        content: request.content.clone(),
                        status: CampaignStatus::Draft,
                        scheduled_at: None,
                        total_recipients: clamp_count(total),
                    })
                    .await
                    .map_err(DispatchError::Persistence)?
                    .id
            }
        };

        let started = self
            .store
            .campaigns
            .begin_run(campaign_id, clamp_count(total), Utc::now())
            .await
            .map_err(DispatchError::Persistence)?;
        if !started {
            return Err(DispatchError::InvalidState(campaign_id));
        }

        Ok(campaign_id)
    }

    /// Close a run that failed before the first message. A scheduled campaign
    /// is released by its scheduler; a new one ends `partially_failed` with
    /// nothing sent instead of staying `sending`.
    async fn abandon(&self, request: &SendCampaignRequest, campaign_id: CampaignId, total: usize) {
        if request.campaign_id.is_some() {
            return;
        }

        let outcome = CampaignOutcome {
            status: CampaignStatus::PartiallyFailed,
            stats_sent: 0,
            total_recipients: clamp_count(total),
            sent_at: Utc::now(),
        };
        if let Err(e) = self.store.campaigns.finish_run(campaign_id, outcome).await {
            error!("Campaign {} is stuck in sending: {}", campaign_id, e);
        }
    }

    async fn deliver(
        &self,
        session: &mut MailboxSession,
        from: &Mailbox,
        request: &SendCampaignRequest,
        recipient: &Recipient,
        tracking_id: CampaignRecipientId,
    ) -> Result<String, SendError> {
        let subject = personalize::render(&request.subject, recipient);
        let body = personalize::render(&request.content, recipient);

        let mut missing = personalize::unresolved(&request.subject, recipient);
        missing.extend(personalize::unresolved(&request.content, recipient));
        if !missing.is_empty() {
            warn!(
                "Unresolved fields {:?} for recipient {}, sending as-is",
                missing, recipient.id
            );
        }

        let html = self.links.instrument(&body, tracking_id);
        let to = compose::mailbox(display_name(recipient).as_deref(), &recipient.email)?;
        let raw = self
            .composer
            .compose(from, &to, &subject, &html, &request.attachments)?;

        session.send_raw(&raw).await
    }

    async fn record_sent(
        &self,
        campaign_id: CampaignId,
        recipient_id: RecipientId,
        tracking_id: CampaignRecipientId,
    ) {
        let now = Utc::now();
        if let Err(e) = self.store.campaign_recipients.mark_sent(tracking_id, now).await {
            warn!("Failed to mark {} sent: {}", tracking_id, e);
        }

        let event = NewEmailEvent {
            campaign_id,
            recipient_id,
            event_type: EventType::Sent,
            url: None,
            user_agent: None,
            created_at: now,
        };
        if let Err(e) = self.store.events.append(event).await {
            warn!("Failed to log send of {}: {}", tracking_id, e);
        }
    }
}

fn display_name(recipient: &Recipient) -> Option<String> {
    let parts: Vec<&str> = [recipient.first_name.as_deref(), recipient.last_name.as_deref()]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" "))
    }
}

/// Count column value, saturating at `i32::MAX`
pub(crate) fn clamp_count(n: usize) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    use chrono::Duration;
    use mailpulse_storage::models::DeliveryStatus;
    use mailpulse_storage::repository::CampaignRecipientRepository;
    use pretty_assertions::assert_eq;

    fn request(fixture: &Fixture, recipients: Vec<Recipient>) -> SendCampaignRequest {
        SendCampaignRequest {
            user_id: fixture.user_id,
            campaign_id: None,
            name: "Spring launch".to_string(),
            subject: "Hello {{first_name}}".to_string(),
            content: r#"<html><body><p>Hi {{first_name}} at {{company}}</p><a href="https://example.com/offer">Offer</a></body></html>"#.to_string(),
            recipients,
            attachments: vec![],
        }
    }

    async fn five(fixture: &Fixture) -> Vec<Recipient> {
        let mut recipients = Vec::new();
        for i in 1..=5 {
            recipients.push(
                fixture
                    .recipient(&format!("r{}@example.com", i), Some(&format!("R{}", i)))
                    .await,
            );
        }
        recipients
    }

    #[test]
    fn test_counts_saturate() {
        assert_eq!(clamp_count(3), 3);
        assert_eq!(clamp_count(i32::MAX as usize + 1), i32::MAX);
        assert_eq!(clamp_count(usize::MAX), i32::MAX);
    }

    #[tokio::test]
    async fn test_send_all_succeed() {
        let fixture = Fixture::new().await;
        fixture.connect(Utc::now() + Duration::hours(1)).await;
        let recipients = five(&fixture).await;

        let report = fixture
            .dispatcher()
            .send_campaign(request(&fixture, recipients))
            .await
            .unwrap();

        assert_eq!(report.sent, 5);
        assert_eq!(report.failed, 0);
        assert_eq!(report.status, CampaignStatus::Sent);
        assert!(!report.cancelled);

        let campaign = fixture.campaign(report.campaign_id).await;
        assert_eq!(campaign.status_enum(), Some(CampaignStatus::Sent));
        assert_eq!(campaign.stats_sent, 5);
        assert_eq!(campaign.total_recipients, 5);
        assert!(campaign.sent_at.is_some());
        assert!(campaign.started_at.is_some());
        assert_eq!(fixture.provider.sent_count(), 5);
    }

    #[tokio::test]
    async fn test_partial_failure_does_not_abort_batch() {
        let fixture = Fixture::new().await;
        fixture.connect(Utc::now() + Duration::hours(1)).await;
        let recipients = five(&fixture).await;
        fixture.provider.reject_recipient("r3@example.com");

        let report = fixture
            .dispatcher()
            .send_campaign(request(&fixture, recipients.clone()))
            .await
            .unwrap();

        assert_eq!(report.sent, 4);
        assert_eq!(report.failed, 1);
        assert_eq!(report.total, 5);
        assert_eq!(report.status, CampaignStatus::PartiallyFailed);

        let campaign = fixture.campaign(report.campaign_id).await;
        assert_eq!(campaign.stats_sent, 4);
        assert_eq!(campaign.total_recipients, 5);
        assert_eq!(campaign.status_enum(), Some(CampaignStatus::PartiallyFailed));

        let sent_events: Vec<_> = fixture
            .backend
            .all_events()
            .await
            .into_iter()
            .filter(|e| e.event_type_enum() == Some(EventType::Sent))
            .collect();
        assert_eq!(sent_events.len(), 4);
        assert!(sent_events.iter().all(|e| e.recipient_id != recipients[2].id));

        let rows = CampaignRecipientRepository::list_by_campaign(fixture.backend.as_ref(), report.campaign_id)
            .await
            .unwrap();
        let failed = rows.iter().find(|r| r.recipient_id == recipients[2].id).unwrap();
        assert_eq!(failed.status_enum(), Some(DeliveryStatus::Pending));
        assert!(failed.last_error.is_some());
        assert_eq!(
            rows.iter()
                .filter(|r| r.status_enum() == Some(DeliveryStatus::Sent))
                .count(),
            4
        );
    }

    #[tokio::test]
    async fn test_not_connected_sends_nothing() {
        let fixture = Fixture::new().await;
        let recipients = five(&fixture).await;

        let err = fixture
            .dispatcher()
            .send_campaign(request(&fixture, recipients))
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::NotConnected(id) if id == fixture.user_id));
        assert_eq!(fixture.provider.sent_count(), 0);
        assert!(fixture.backend.all_events().await.is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_failure_does_not_leave_sending() {
        let fixture = Fixture::new().await;
        fixture.connect(Utc::now() + Duration::hours(1)).await;
        let recipients = five(&fixture).await;
        fixture
            .backend
            .fail_operation("campaign_recipients.create_snapshot")
            .await;

        let result = fixture
            .dispatcher()
            .send_campaign(request(&fixture, recipients))
            .await;
        assert!(matches!(result, Err(DispatchError::Persistence(_))));
        assert_eq!(fixture.provider.sent_count(), 0);

        let campaigns = fixture.backend.all_campaigns().await;
        assert_eq!(campaigns.len(), 1);
        assert_eq!(campaigns[0].status_enum(), Some(CampaignStatus::PartiallyFailed));
        assert_eq!(campaigns[0].stats_sent, 0);
        assert_eq!(campaigns[0].total_recipients, 5);
    }

    #[tokio::test]
    async fn test_messages_are_personalized_and_tracked() {
        let fixture = Fixture::new().await;
        fixture.connect(Utc::now() + Duration::hours(1)).await;
        let ada = fixture
            .recipient_with_fields("ada@example.com", Some("Ada"), serde_json::json!({"company": "Analytical"}))
            .await;

        let report = fixture
            .dispatcher()
            .send_campaign(request(&fixture, vec![ada.clone()]))
            .await
            .unwrap();

        let rows = CampaignRecipientRepository::list_by_campaign(fixture.backend.as_ref(), report.campaign_id)
            .await
            .unwrap();
        let tracking_id = rows[0].id;

        let raw = fixture.provider.sent_messages().pop().unwrap();
        let message = String::from_utf8(URL_SAFE_NO_PAD.decode(raw).unwrap()).unwrap();
        assert!(message.contains("Subject: Hello Ada"));
        assert!(message.contains("From: Owner <owner@example.com>"));
        assert!(message.contains("To: Ada <ada@example.com>"));

        let parsed = mail_parser::MessageParser::default()
            .parse(message.as_bytes())
            .unwrap();
        let html = parsed.body_html(0).unwrap().to_string();
        assert!(html.contains("Hi Ada at Analytical"));
        assert!(html.contains(&format!("/track/open/{}", tracking_id)));
        assert!(html.contains(&format!("id={}", tracking_id)));
        assert!(!html.contains("href=\"https://example.com/offer\""));
    }

    #[tokio::test]
    async fn test_scheduled_path_updates_existing_campaign() {
        let fixture = Fixture::new().await;
        fixture.connect(Utc::now() + Duration::hours(1)).await;
        let recipients = five(&fixture).await;
        let ids: Vec<_> = recipients.iter().map(|r| r.id).collect();
        let (campaign, _) = fixture.scheduled_campaign(&ids, Utc::now()).await;

        let mut req = request(&fixture, recipients);
        req.campaign_id = Some(campaign.id);
        let report = fixture.dispatcher().send_campaign(req).await.unwrap();

        assert_eq!(report.campaign_id, campaign.id);
        let rows = CampaignRecipientRepository::list_by_campaign(fixture.backend.as_ref(), campaign.id)
            .await
            .unwrap();
        assert_eq!(rows.len(), 5);
        assert_eq!(fixture.campaign(campaign.id).await.stats_sent, 5);
    }

    #[tokio::test]
    async fn test_archived_campaign_is_not_dispatched() {
        let fixture = Fixture::new().await;
        fixture.connect(Utc::now() + Duration::hours(1)).await;
        let recipients = five(&fixture).await;
        let ids: Vec<_> = recipients.iter().map(|r| r.id).collect();
        let (campaign, _) = fixture.scheduled_campaign(&ids, Utc::now()).await;
        fixture.archive(campaign.id).await;

        let mut req = request(&fixture, recipients);
        req.campaign_id = Some(campaign.id);
        let err = fixture.dispatcher().send_campaign(req).await.unwrap_err();
        assert!(matches!(err, DispatchError::InvalidState(id) if id == campaign.id));
        assert_eq!(fixture.provider.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_unrecorded_result_is_surfaced_without_resend() {
        let fixture = Fixture::new().await;
        fixture.connect(Utc::now() + Duration::hours(1)).await;
        let recipients = five(&fixture).await;
        fixture.backend.fail_operation("campaigns.finish_run").await;

        let err = fixture
            .dispatcher()
            .send_campaign(request(&fixture, recipients))
            .await
            .unwrap_err();

        match err {
            DispatchError::Unrecorded { sent, campaign_id, .. } => {
                assert_eq!(sent, 5);
                let campaign = fixture.campaign(campaign_id).await;
                assert_eq!(campaign.status_enum(), Some(CampaignStatus::Sending));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(fixture.provider.sent_count(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_mid_batch_marks_partial() {
        let fixture = Fixture::new().await;
        fixture.connect(Utc::now() + Duration::hours(1)).await;
        let recipients = five(&fixture).await;
        fixture.provider.cancel_after(2, fixture.shutdown.clone());

        let report = fixture
            .dispatcher_with_delay(std::time::Duration::from_secs(60))
            .send_campaign(request(&fixture, recipients))
            .await
            .unwrap();

        assert!(report.cancelled);
        assert_eq!(report.sent, 2);
        assert_eq!(report.status, CampaignStatus::PartiallyFailed);
        assert_eq!(
            fixture.campaign(report.campaign_id).await.status_enum(),
            Some(CampaignStatus::PartiallyFailed)
        );
    }

    #[test]
    fn test_display_name() {
        let fixture_recipient = |first: Option<&str>, last: Option<&str>| Recipient {
            id: uuid::Uuid::new_v4(),
            user_id: uuid::Uuid::new_v4(),
            email: "x@example.com".to_string(),
            first_name: first.map(str::to_string),
            last_name: last.map(str::to_string),
            custom_fields: serde_json::json!({}),
            status: "active".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert_eq!(display_name(&fixture_recipient(Some("Ada"), Some("Lovelace"))).as_deref(), Some("Ada Lovelace"));
        assert_eq!(display_name(&fixture_recipient(None, Some("Lovelace"))).as_deref(), Some("Lovelace"));
        assert_eq!(display_name(&fixture_recipient(Some(" "), None)), None);
    }
}
