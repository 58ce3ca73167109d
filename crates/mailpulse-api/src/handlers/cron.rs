//! Cron trigger for scheduled campaigns

use axum::{extract::State, Json};
use mailpulse_core::ScheduledRun;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};

use super::{storage_error, ApiError};
use crate::auth::AppState;

/// Sweep result
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum CronResponse {
    Processed { processed: Vec<ScheduledRun> },
    Idle { message: String },
}

/// Dispatch every due scheduled campaign
pub async fn process_scheduled(
    State(state): State<Arc<AppState>>,
) -> Result<Json<CronResponse>, ApiError> {
    let processed = state.scheduler.process_scheduled().await.map_err(|e| {
        error!("Scheduled sweep failed: {}", e);
        storage_error(e)
    })?;

    if processed.is_empty() {
        return Ok(Json(CronResponse::Idle {
            message: "no work".to_string(),
        }));
    }

    info!("Scheduled sweep dispatched {} campaigns", processed.len());
    Ok(Json(CronResponse::Processed { processed }))
}
