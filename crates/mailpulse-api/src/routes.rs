//! API routes

use axum::{
    http::{header, HeaderValue, Method},
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::auth::{cron_auth_middleware, internal_auth_middleware, AppState};
use crate::handlers::{campaigns, cron, health, tracking};

/// Create the API router
pub fn create_router(state: AppState, cors_origins: &[String]) -> Router {
    let state = Arc::new(state);

    // Health check routes (no auth required)
    let health_routes = Router::new()
        .route("/", get(health::health))
        .route("/live", get(health::liveness))
        .route("/ready", get(health::readiness))
        .with_state(state.clone());

    // Tracking routes, hit by mail clients (no auth)
    let tracking_routes = Router::new()
        .route("/open/:id", get(tracking::open_pixel))
        .route("/click", get(tracking::click_redirect))
        .with_state(state.clone());

    // Cron trigger
    let cron_routes = Router::new()
        .route("/process-scheduled", get(cron::process_scheduled))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            cron_auth_middleware,
        ))
        .with_state(state.clone());

    // Campaign routes
    let campaign_routes = Router::new()
        .route("/send", post(campaigns::send_campaign))
        .route("/schedule", post(campaigns::schedule_campaign))
        .route("/:campaign_id", get(campaigns::get_campaign))
        .route("/:campaign_id/recipients", get(campaigns::list_campaign_recipients))
        .route("/:campaign_id/archive", post(campaigns::archive_campaign));

    // API v1 routes with authentication
    let api_v1 = Router::new()
        .nest("/users/:user_id/campaigns", campaign_routes)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            internal_auth_middleware,
        ))
        .with_state(state);

    let router = Router::new()
        .nest("/health", health_routes)
        .nest("/track", tracking_routes)
        .nest("/cron", cron_routes)
        .nest("/api/v1", api_v1);

    match cors_layer(cors_origins) {
        Some(cors) => router.layer(cors).layer(TraceLayer::new_for_http()),
        None => router.layer(TraceLayer::new_for_http()),
    }
}

/// CORS for the composing application. No layer when no origin is configured.
fn cors_layer(origins: &[String]) -> Option<CorsLayer> {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin {:?}", origin);
                None
            }
        })
        .collect();

    if origins.is_empty() {
        return None;
    }

    Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cors_layer_needs_valid_origins() {
        assert!(cors_layer(&[]).is_none());
        assert!(cors_layer(&["bad\norigin".to_string()]).is_none());
        assert!(cors_layer(&["https://app.example.com".to_string()]).is_some());
    }
}
