//! Common types for MailPulse

use uuid::Uuid;

/// Unique identifier for users (mailbox owners)
pub type UserId = Uuid;

/// Unique identifier for campaigns
pub type CampaignId = Uuid;

/// Unique identifier for recipients
pub type RecipientId = Uuid;

/// Unique identifier for recipient groups
pub type GroupId = Uuid;

/// Unique identifier for campaign/recipient snapshot rows.
///
/// This is the opaque id embedded in tracking URLs.
pub type CampaignRecipientId = Uuid;

/// Unique identifier for engagement events
pub type EventId = Uuid;
