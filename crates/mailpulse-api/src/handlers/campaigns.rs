//! Campaign handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use mailpulse_core::{
    Audience, CampaignError, DispatchError, ScheduleCampaign, SendCampaignRequest,
};
use mailpulse_storage::models::{AttachmentData, Campaign, CampaignRecipient, EmailEvent};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{api_error, storage_error, ApiError};
use crate::auth::AppState;

/// Attachment as sent over JSON
#[derive(Debug, Deserialize)]
pub struct AttachmentPayload {
    pub filename: String,
    pub content_type: Option<String>,
    /// Standard base64 of the file content
    pub content: String,
}

impl AttachmentPayload {
    fn decode(self) -> Result<AttachmentData, ApiError> {
        let content = STANDARD.decode(self.content.trim()).map_err(|e| {
            api_error(
                StatusCode::BAD_REQUEST,
                "invalid_attachment",
                format!("Attachment {} is not valid base64: {}", self.filename, e),
            )
        })?;
        Ok(AttachmentData {
            filename: self.filename,
            content_type: self
                .content_type
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            content,
        })
    }
}

fn decode_attachments(attachments: Vec<AttachmentPayload>) -> Result<Vec<AttachmentData>, ApiError> {
    attachments.into_iter().map(AttachmentPayload::decode).collect()
}

/// Request body for an immediate send
#[derive(Debug, Deserialize)]
pub struct SendCampaignBody {
    pub name: String,
    pub subject: String,
    pub content: String,
    pub audience: Audience,
    #[serde(default)]
    pub attachments: Vec<AttachmentPayload>,
}

/// Request body for scheduling a campaign
#[derive(Debug, Deserialize)]
pub struct ScheduleCampaignBody {
    pub name: String,
    pub subject: String,
    pub content: String,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub audience: Audience,
    #[serde(default)]
    pub attachments: Vec<AttachmentPayload>,
}

/// Immediate send result
#[derive(Debug, Serialize)]
pub struct SendCampaignResponse {
    pub campaign_id: Uuid,
    pub sent: usize,
    pub failed: usize,
    pub total: usize,
    pub status: String,
}

/// Campaign response
#[derive(Debug, Serialize)]
pub struct CampaignResponse {
    pub id: Uuid,
    pub name: String,
    pub subject: String,
    pub status: String,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub total_recipients: i32,
    pub stats_sent: i32,
    pub stats_opened: i32,
    pub stats_clicked: i32,
    pub stats_bounced: i32,
    pub open_rate: f64,
    pub started_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Campaign> for CampaignResponse {
    fn from(c: Campaign) -> Self {
        let open_rate = c.open_rate();
        Self {
            id: c.id,
            name: c.name,
            subject: c.subject,
            status: c.status,
            scheduled_at: c.scheduled_at,
            total_recipients: c.total_recipients,
            stats_sent: c.stats_sent,
            stats_opened: c.stats_opened,
            stats_clicked: c.stats_clicked,
            stats_bounced: c.stats_bounced,
            open_rate,
            started_at: c.started_at,
            sent_at: c.sent_at,
            created_at: c.created_at,
            updated_at: c.updated_at,
        }
    }
}

/// Per-recipient rows and the event log of one campaign
#[derive(Debug, Serialize)]
pub struct CampaignRecipientsResponse {
    pub campaign_id: Uuid,
    pub data: Vec<CampaignRecipient>,
    pub events: Vec<EmailEvent>,
}

fn campaign_error(e: CampaignError) -> ApiError {
    match e {
        CampaignError::NotFound => api_error(StatusCode::NOT_FOUND, "not_found", "Campaign not found"),
        CampaignError::EmptyAudience => api_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "empty_audience",
            e.to_string(),
        ),
        CampaignError::NotScheduled => api_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "missing_schedule",
            e.to_string(),
        ),
        CampaignError::InvalidState(_) => {
            api_error(StatusCode::CONFLICT, "invalid_state", e.to_string())
        }
        CampaignError::Storage(e) => {
            error!("Campaign storage error: {}", e);
            storage_error(e)
        }
    }
}

fn dispatch_error(e: DispatchError) -> ApiError {
    let status = StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        error!("Campaign dispatch failed: {}", e);
    } else {
        warn!("Campaign dispatch refused: {}", e);
    }
    api_error(status, e.code(), e.to_string())
}

/// Send a campaign now
///
/// POST /api/v1/users/:user_id/campaigns/send
pub async fn send_campaign(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<Uuid>,
    Json(body): Json<SendCampaignBody>,
) -> Result<Json<SendCampaignResponse>, ApiError> {
    let attachments = decode_attachments(body.attachments)?;
    let recipients = state
        .manager
        .audience_for_send(user_id, &body.audience)
        .await
        .map_err(campaign_error)?;

    let report = state
        .dispatcher
        .send_campaign(SendCampaignRequest {
            user_id,
            campaign_id: None,
            name: body.name,
            subject: body.subject,
            content: body.content,
            recipients,
            attachments,
        })
        .await
        .map_err(dispatch_error)?;

    info!(
        "Campaign {} sent by user {}: {}/{} delivered",
        report.campaign_id, user_id, report.sent, report.total
    );

    Ok(Json(SendCampaignResponse {
        campaign_id: report.campaign_id,
        sent: report.sent,
        failed: report.failed,
        total: report.total,
        status: report.status.to_string(),
    }))
}

/// Schedule a campaign
///
/// POST /api/v1/users/:user_id/campaigns/schedule
pub async fn schedule_campaign(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<Uuid>,
    Json(body): Json<ScheduleCampaignBody>,
) -> Result<(StatusCode, Json<CampaignResponse>), ApiError> {
    let attachments = decode_attachments(body.attachments)?;

    let campaign = state
        .manager
        .schedule_campaign(ScheduleCampaign {
            user_id,
            name: body.name,
            subject: body.subject,
            content: body.content,
            scheduled_at: body.scheduled_at,
            audience: body.audience,
            attachments,
        })
        .await
        .map_err(campaign_error)?;

    Ok((StatusCode::CREATED, Json(CampaignResponse::from(campaign))))
}

/// Get a campaign by ID
///
/// GET /api/v1/users/:user_id/campaigns/:campaign_id
pub async fn get_campaign(
    State(state): State<Arc<AppState>>,
    Path((user_id, campaign_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<CampaignResponse>, ApiError> {
    let campaign = state
        .manager
        .get_campaign(user_id, campaign_id)
        .await
        .map_err(campaign_error)?;

    Ok(Json(CampaignResponse::from(campaign)))
}

/// Per-recipient delivery and engagement
///
/// GET /api/v1/users/:user_id/campaigns/:campaign_id/recipients
pub async fn list_campaign_recipients(
    State(state): State<Arc<AppState>>,
    Path((user_id, campaign_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<CampaignRecipientsResponse>, ApiError> {
    let report = state
        .manager
        .campaign_report(user_id, campaign_id)
        .await
        .map_err(campaign_error)?;

    Ok(Json(CampaignRecipientsResponse {
        campaign_id,
        data: report.recipients,
        events: report.events,
    }))
}

/// Archive a campaign
///
/// POST /api/v1/users/:user_id/campaigns/:campaign_id/archive
pub async fn archive_campaign(
    State(state): State<Arc<AppState>>,
    Path((user_id, campaign_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<CampaignResponse>, ApiError> {
    let campaign = state
        .manager
        .archive_campaign(user_id, campaign_id)
        .await
        .map_err(campaign_error)?;

    Ok(Json(CampaignResponse::from(campaign)))
}
