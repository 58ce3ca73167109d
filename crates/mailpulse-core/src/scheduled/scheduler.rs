//! Campaign Scheduler - dispatches scheduled campaigns once they are due
//!
//! Each due campaign is claimed (`scheduled -> sending`) before anything is
//! sent, so overlapping sweeps never pick the same campaign twice. The audience
//! is the snapshot taken at scheduling time, not the current group membership.

use crate::dispatch::{DispatchError, Dispatcher, SendCampaignRequest};
use chrono::Utc;
use mailpulse_common::types::{CampaignId, RecipientId};
use mailpulse_common::Result;
use mailpulse_storage::models::{AttachmentData, Campaign, Recipient};
use mailpulse_storage::Store;
use serde::Serialize;
use std::collections::HashMap;
use tokio::time::{interval, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// One campaign handled by a sweep
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduledRun {
    pub id: CampaignId,
    pub sent: usize,
}

/// Campaign Scheduler
#[derive(Clone)]
pub struct CampaignScheduler {
    store: Store,
    dispatcher: Dispatcher,
    /// Interval between sweeps (seconds)
    poll_interval_secs: u64,
}

impl CampaignScheduler {
    pub fn new(store: Store, dispatcher: Dispatcher) -> Self {
        Self {
            store,
            dispatcher,
            poll_interval_secs: 60,
        }
    }

    /// Set poll interval
    pub fn with_poll_interval(mut self, secs: u64) -> Self {
        self.poll_interval_secs = secs.max(1);
        self
    }

    /// Sweep due campaigns until shutdown
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = interval(Duration::from_secs(self.poll_interval_secs));

        info!("Campaign scheduler started (interval: {}s)", self.poll_interval_secs);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if let Err(e) = self.process_scheduled().await {
                error!("Error processing scheduled campaigns: {}", e);
            }
        }

        info!("Campaign scheduler stopped");
    }

    /// Dispatch every campaign whose send time has passed. A storage error on
    /// one campaign leaves it for the next sweep; only listing due campaigns
    /// fails the whole sweep.
    pub async fn process_scheduled(&self) -> Result<Vec<ScheduledRun>> {
        let due = self.store.campaigns.list_due(Utc::now()).await?;
        let mut processed = Vec::new();

        for campaign in due {
            let campaign_id = campaign.id;
            match self.process_campaign(campaign).await {
                Ok(Some(run)) => processed.push(run),
                Ok(None) => {}
                Err(e) => warn!("Skipping campaign {} this sweep: {}", campaign_id, e),
            }
        }

        Ok(processed)
    }

    async fn process_campaign(&self, campaign: Campaign) -> Result<Option<ScheduledRun>> {
        let snapshot = self
            .store
            .campaign_recipients
            .list_by_campaign(campaign.id)
            .await?;
        if snapshot.is_empty() {
            info!("Campaign {} has no recipients, skipping", campaign.id);
            return Ok(None);
        }

        if !self
            .store
            .campaigns
            .claim_scheduled(campaign.id, Utc::now())
            .await?
        {
            info!("Campaign {} already claimed, skipping", campaign.id);
            return Ok(None);
        }

        let (recipients, attachments) = match self.load_payload(&campaign, &snapshot).await {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to load campaign {}: {}", campaign.id, e);
                self.release(campaign.id).await;
                return Ok(None);
            }
        };

        let request = SendCampaignRequest {
            user_id: campaign.user_id,
            campaign_id: Some(campaign.id),
            name: campaign.name,
            subject: campaign.subject,
            content: campaign.content,
            recipients,
            attachments,
        };

        match self.dispatcher.send_campaign(request).await {
            Ok(report) => Ok(Some(ScheduledRun {
                id: campaign.id,
                sent: report.sent,
            })),
            Err(DispatchError::Unrecorded { sent, .. }) => {
                // Messages are out; the campaign stays claimed so it is never re-sent.
                error!(
                    "Campaign {} sent {} messages but its status was not recorded",
                    campaign.id, sent
                );
                Ok(Some(ScheduledRun {
                    id: campaign.id,
                    sent,
                }))
            }
            Err(e) => {
                warn!("Campaign {} not dispatched: {}", campaign.id, e);
                self.release(campaign.id).await;
                Ok(None)
            }
        }
    }

    /// Recipients in snapshot order, plus the campaign attachments
    async fn load_payload(
        &self,
        campaign: &Campaign,
        snapshot: &[mailpulse_storage::models::CampaignRecipient],
    ) -> Result<(Vec<Recipient>, Vec<AttachmentData>)> {
        let ids: Vec<RecipientId> = snapshot.iter().map(|row| row.recipient_id).collect();
        let mut by_id: HashMap<RecipientId, Recipient> = self
            .store
            .recipients
            .get_many(campaign.user_id, &ids)
            .await?
            .into_iter()
            .map(|r| (r.id, r))
            .collect();
        let recipients = ids.iter().filter_map(|id| by_id.remove(id)).collect();

        let attachments = self
            .store
            .attachments
            .list(campaign.id)
            .await?
            .into_iter()
            .map(AttachmentData::from)
            .collect();

        Ok((recipients, attachments))
    }

    async fn release(&self, campaign_id: CampaignId) {
        if let Err(e) = self.store.campaigns.release_claim(campaign_id).await {
            error!("Failed to release claim on campaign {}: {}", campaign_id, e);
        }
    }
}
