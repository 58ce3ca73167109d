//! Database models

use chrono::{DateTime, Utc};
use mailpulse_common::types::{
    CampaignId, CampaignRecipientId, EventId, GroupId, RecipientId, UserId,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

/// Mailbox owner profile
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    pub email: String,
    pub display_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Create or update a user profile
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertUserProfile {
    pub id: UserId,
    pub email: String,
    pub display_name: Option<String>,
}

/// Stored OAuth credentials. Both tokens are ciphertext.
#[derive(Clone, FromRow)]
pub struct OAuthTokenRecord {
    pub user_id: UserId,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub account_email: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl std::fmt::Debug for OAuthTokenRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthTokenRecord")
            .field("user_id", &self.user_id)
            .field("expires_at", &self.expires_at)
            .field("account_email", &self.account_email)
            .finish_non_exhaustive()
    }
}

/// Write-side shape of an OAuth token record, tokens already encrypted
#[derive(Clone)]
pub struct SaveOAuthToken {
    pub user_id: UserId,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub account_email: String,
}

/// Recipient status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientStatus {
    Active,
    Unsubscribed,
}

impl std::fmt::Display for RecipientStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecipientStatus::Active => write!(f, "active"),
            RecipientStatus::Unsubscribed => write!(f, "unsubscribed"),
        }
    }
}

impl std::str::FromStr for RecipientStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(RecipientStatus::Active),
            "unsubscribed" => Ok(RecipientStatus::Unsubscribed),
            _ => Err(format!("Invalid recipient status: {}", s)),
        }
    }
}

/// Recipient model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq)]
pub struct Recipient {
    pub id: RecipientId,
    pub user_id: UserId,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub custom_fields: Value,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Recipient {
    /// Get status enum
    pub fn status_enum(&self) -> Option<RecipientStatus> {
        self.status.parse().ok()
    }

    pub fn is_active(&self) -> bool {
        self.status_enum() == Some(RecipientStatus::Active)
    }

    /// Look up a custom field, rendering scalars as text
    pub fn custom_field(&self, key: &str) -> Option<String> {
        match self.custom_fields.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }
}

/// Create recipient input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRecipient {
    pub user_id: UserId,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    #[serde(default)]
    pub custom_fields: Option<Value>,
}

/// Recipient group model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct RecipientGroup {
    pub id: GroupId,
    pub user_id: UserId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Campaign status
///
/// `draft|scheduled -> sending -> sent|partially_failed`, with `archived`
/// reachable from any state that is not currently sending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Scheduled,
    Sending,
    Sent,
    PartiallyFailed,
    Archived,
}

impl std::fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CampaignStatus::Draft => write!(f, "draft"),
            CampaignStatus::Scheduled => write!(f, "scheduled"),
            CampaignStatus::Sending => write!(f, "sending"),
            CampaignStatus::Sent => write!(f, "sent"),
            CampaignStatus::PartiallyFailed => write!(f, "partially_failed"),
            CampaignStatus::Archived => write!(f, "archived"),
        }
    }
}

impl std::str::FromStr for CampaignStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(CampaignStatus::Draft),
            "scheduled" => Ok(CampaignStatus::Scheduled),
            "sending" => Ok(CampaignStatus::Sending),
            "sent" => Ok(CampaignStatus::Sent),
            "partially_failed" => Ok(CampaignStatus::PartiallyFailed),
            "archived" => Ok(CampaignStatus::Archived),
            _ => Err(format!("Invalid campaign status: {}", s)),
        }
    }
}

/// Campaign model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub user_id: UserId,
    pub name: String,
    pub subject: String,
    pub content: String,
    pub status: String,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub total_recipients: i32,
    pub stats_sent: i32,
    pub stats_opened: i32,
    pub stats_clicked: i32,
    pub stats_bounced: i32,
    pub started_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    /// Get status enum
    pub fn status_enum(&self) -> Option<CampaignStatus> {
        self.status.parse().ok()
    }

    /// Open rate over successfully sent messages
    pub fn open_rate(&self) -> f64 {
        if self.stats_sent == 0 {
            0.0
        } else {
            self.stats_opened as f64 / self.stats_sent as f64
        }
    }
}

/// Create campaign input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCampaign {
    pub user_id: UserId,
    pub name: String,
    pub subject: String,
    pub content: String,
    pub status: CampaignStatus,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub total_recipients: i32,
}

/// Final result of a dispatch run, written once the loop finishes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CampaignOutcome {
    pub status: CampaignStatus,
    pub stats_sent: i32,
    pub total_recipients: i32,
    pub sent_at: DateTime<Utc>,
}

/// Per-recipient delivery status, ordered by engagement strength
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Opened,
    Clicked,
    Bounced,
}

impl DeliveryStatus {
    /// Engagement rank. Bounced sits outside the ladder and is terminal.
    pub fn rank(&self) -> u8 {
        match self {
            DeliveryStatus::Pending => 0,
            DeliveryStatus::Sent => 1,
            DeliveryStatus::Opened => 2,
            DeliveryStatus::Clicked => 3,
            DeliveryStatus::Bounced => u8::MAX,
        }
    }

    /// Status after observing `signal`; never moves down the ladder
    pub fn escalate(self, signal: DeliveryStatus) -> DeliveryStatus {
        if self == DeliveryStatus::Bounced || signal.rank() <= self.rank() {
            self
        } else {
            signal
        }
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryStatus::Pending => write!(f, "pending"),
            DeliveryStatus::Sent => write!(f, "sent"),
            DeliveryStatus::Opened => write!(f, "opened"),
            DeliveryStatus::Clicked => write!(f, "clicked"),
            DeliveryStatus::Bounced => write!(f, "bounced"),
        }
    }
}

impl std::str::FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DeliveryStatus::Pending),
            "sent" => Ok(DeliveryStatus::Sent),
            "opened" => Ok(DeliveryStatus::Opened),
            "clicked" => Ok(DeliveryStatus::Clicked),
            "bounced" => Ok(DeliveryStatus::Bounced),
            _ => Err(format!("Invalid delivery status: {}", s)),
        }
    }
}

/// Snapshot row joining a campaign with one targeted recipient
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CampaignRecipient {
    pub id: CampaignRecipientId,
    pub campaign_id: CampaignId,
    pub recipient_id: RecipientId,
    pub status: String,
    pub sent_at: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
    pub clicked_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CampaignRecipient {
    /// Get status enum
    pub fn status_enum(&self) -> Option<DeliveryStatus> {
        self.status.parse().ok()
    }
}

/// Outcome of an open hit against a snapshot row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenUpdate {
    pub campaign_id: CampaignId,
    pub recipient_id: RecipientId,
    /// True only for the hit that set `opened_at`
    pub first_open: bool,
}

/// Outcome of a click hit against a snapshot row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClickUpdate {
    pub campaign_id: CampaignId,
    pub recipient_id: RecipientId,
    /// True only when `clicked_at` was null before this hit
    pub first_click: bool,
}

/// Engagement event type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Sent,
    Opened,
    Clicked,
    Bounced,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventType::Sent => write!(f, "sent"),
            EventType::Opened => write!(f, "opened"),
            EventType::Clicked => write!(f, "clicked"),
            EventType::Bounced => write!(f, "bounced"),
        }
    }
}

impl std::str::FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(EventType::Sent),
            "opened" => Ok(EventType::Opened),
            "clicked" => Ok(EventType::Clicked),
            "bounced" => Ok(EventType::Bounced),
            _ => Err(format!("Invalid event type: {}", s)),
        }
    }
}

/// Immutable engagement log row
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct EmailEvent {
    pub id: EventId,
    pub campaign_id: CampaignId,
    pub recipient_id: RecipientId,
    pub event_type: String,
    pub url: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl EmailEvent {
    pub fn event_type_enum(&self) -> Option<EventType> {
        self.event_type.parse().ok()
    }
}

/// Append event input
#[derive(Debug, Clone)]
pub struct NewEmailEvent {
    pub campaign_id: CampaignId,
    pub recipient_id: RecipientId,
    pub event_type: EventType,
    pub url: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Campaign-level attachment
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CampaignAttachment {
    pub id: Uuid,
    pub campaign_id: CampaignId,
    pub filename: String,
    pub content_type: String,
    #[serde(skip_serializing)]
    pub content: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

/// Attachment payload as supplied by the composing collaborator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentData {
    pub filename: String,
    pub content_type: String,
    pub content: Vec<u8>,
}

impl From<CampaignAttachment> for AttachmentData {
    fn from(attachment: CampaignAttachment) -> Self {
        Self {
            filename: attachment.filename,
            content_type: attachment.content_type,
            content: attachment.content,
        }
    }
}
