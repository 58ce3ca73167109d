//! Engagement Collector - turns pixel and redirect hits into events and counters
//!
//! The first-open and first-click guards are single conditional updates in
//! the repository; the campaign counters move only when a guard reports a
//! first occurrence. Every hit is logged as an event.

use chrono::{DateTime, Utc};
use mailpulse_common::types::CampaignRecipientId;
use mailpulse_common::{Error, Result};
use mailpulse_storage::models::{ClickUpdate, EventType, NewEmailEvent, OpenUpdate};
use mailpulse_storage::Store;
use tracing::{debug, warn};

/// Parse the id segment of a tracking URL. A trailing `.gif` is accepted.
pub fn parse_tracking_id(raw: &str) -> Option<CampaignRecipientId> {
    let raw = raw.trim();
    let raw = raw
        .strip_suffix(".gif")
        .or_else(|| raw.strip_suffix(".GIF"))
        .unwrap_or(raw);
    raw.parse().ok()
}

/// Engagement collector
#[derive(Clone)]
pub struct EngagementCollector {
    store: Store,
}

impl EngagementCollector {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Record one open hit. `Ok(None)` when the id matches no snapshot row.
    ///
    /// The counter increment and the event append are both attempted even if
    /// one of them fails; the first failure is returned.
    pub async fn record_open(
        &self,
        id: CampaignRecipientId,
        user_agent: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<Option<OpenUpdate>> {
        let Some(update) = self.store.campaign_recipients.record_open(id, at).await? else {
            return Ok(None);
        };

        let mut failure: Option<Error> = None;

        if update.first_open {
            if let Err(e) = self.store.campaigns.increment_opened(update.campaign_id).await {
                warn!("Failed to increment opens for campaign {}: {}", update.campaign_id, e);
                failure = Some(e);
            }
        }

        let event = NewEmailEvent {
            campaign_id: update.campaign_id,
            recipient_id: update.recipient_id,
            event_type: EventType::Opened,
            url: None,
            user_agent: user_agent.map(str::to_string),
            created_at: at,
        };
        if let Err(e) = self.store.events.append(event).await {
            warn!("Failed to log open for {}: {}", id, e);
            failure.get_or_insert(e);
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(Some(update)),
        }
    }

    /// Record one click hit. Every click is logged; the counter moves on the
    /// first one only.
    pub async fn record_click(
        &self,
        id: CampaignRecipientId,
        url: &str,
        user_agent: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<Option<ClickUpdate>> {
        let Some(update) = self.store.campaign_recipients.record_click(id, at).await? else {
            return Ok(None);
        };

        let mut failure: Option<Error> = None;

        let event = NewEmailEvent {
            campaign_id: update.campaign_id,
            recipient_id: update.recipient_id,
            event_type: EventType::Clicked,
            url: Some(url.to_string()),
            user_agent: user_agent.map(str::to_string),
            created_at: at,
        };
        if let Err(e) = self.store.events.append(event).await {
            warn!("Failed to log click for {}: {}", id, e);
            failure = Some(e);
        }

        if update.first_click {
            if let Err(e) = self.store.campaigns.increment_clicked(update.campaign_id).await {
                warn!("Failed to increment clicks for campaign {}: {}", update.campaign_id, e);
                failure.get_or_insert(e);
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(Some(update)),
        }
    }

    /// Best-effort open tracking for the pixel endpoint. Never fails.
    pub async fn track_open(&self, raw_id: &str, user_agent: Option<&str>) {
        let Some(id) = parse_tracking_id(raw_id) else {
            debug!("Ignoring open hit with invalid id {:?}", raw_id);
            return;
        };

        match self.record_open(id, user_agent, Utc::now()).await {
            Ok(Some(update)) => debug!(
                campaign_id = %update.campaign_id,
                first_open = update.first_open,
                "Open recorded"
            ),
            Ok(None) => debug!("Ignoring open hit for unknown id {}", id),
            Err(e) => warn!("Open tracking failed for {}: {}", id, e),
        }
    }

    /// Best-effort click tracking for the redirect endpoint. Never fails.
    pub async fn track_click(&self, raw_id: Option<&str>, url: &str, user_agent: Option<&str>) {
        let Some(id) = raw_id.and_then(parse_tracking_id) else {
            debug!("Ignoring click hit with missing or invalid id");
            return;
        };

        match self.record_click(id, url, user_agent, Utc::now()).await {
            Ok(Some(update)) => debug!(
                campaign_id = %update.campaign_id,
                first_click = update.first_click,
                "Click recorded"
            ),
            Ok(None) => debug!("Ignoring click hit for unknown id {}", id),
            Err(e) => warn!("Click tracking failed for {}: {}", id, e),
        }
    }
}
