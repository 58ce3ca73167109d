//! Tracking handlers: open pixel and click redirector
//!
//! Both endpoints always serve their primary response. Recording the hit is
//! best effort and never changes what the mail client sees, except that the
//! redirector refuses destinations that are not absolute http(s) URLs.

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
};
use mailpulse_core::redirect_target;
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

use super::api_error;
use crate::auth::AppState;

/// 1x1 transparent GIF
pub static PIXEL_GIF: [u8; 43] = [
    0x47, 0x49, 0x46, 0x38, 0x39, 0x61, 0x01, 0x00, 0x01, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00,
    0x00, 0xff, 0xff, 0xff, 0x21, 0xf9, 0x04, 0x01, 0x00, 0x00, 0x00, 0x00, 0x2c, 0x00, 0x00,
    0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x02, 0x02, 0x44, 0x01, 0x00, 0x3b,
];

/// Query parameters of the click redirector
#[derive(Debug, Deserialize)]
pub struct ClickQuery {
    pub u: Option<String>,
    pub id: Option<String>,
}

fn user_agent(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
}

/// Open pixel
pub async fn open_pixel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    state.collector.track_open(&id, user_agent(&headers)).await;

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "image/gif"),
            (header::CACHE_CONTROL, "no-store, no-cache, must-revalidate, max-age=0"),
        ],
        &PIXEL_GIF[..],
    )
        .into_response()
}

/// Click redirector
pub async fn click_redirect(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ClickQuery>,
    headers: HeaderMap,
) -> Response {
    let Some(destination) = query.u.as_deref().and_then(redirect_target) else {
        debug!("Rejecting click with missing or invalid destination");
        return api_error(
            StatusCode::BAD_REQUEST,
            "invalid_destination",
            "Parameter 'u' must be an absolute http(s) URL",
        )
        .into_response();
    };

    state
        .collector
        .track_click(query.id.as_deref(), destination.as_str(), user_agent(&headers))
        .await;

    Redirect::temporary(destination.as_str()).into_response()
}
