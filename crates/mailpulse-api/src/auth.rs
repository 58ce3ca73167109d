//! Authentication module

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use mailpulse_core::{CampaignManager, CampaignScheduler, Dispatcher, EngagementCollector};
use mailpulse_storage::Store;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::warn;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub dispatcher: Dispatcher,
    pub scheduler: CampaignScheduler,
    pub manager: CampaignManager,
    pub collector: EngagementCollector,
    /// Bearer token for `/api/v1`; the internal API is closed when unset
    pub internal_token: Option<String>,
    /// Bearer token for `/cron/*`; the cron endpoint is open when unset
    pub cron_secret: Option<String>,
}

impl AppState {
    pub fn new(store: Store, dispatcher: Dispatcher, scheduler: CampaignScheduler) -> Self {
        Self {
            manager: CampaignManager::new(store.clone()),
            collector: EngagementCollector::new(store.clone()),
            store,
            dispatcher,
            scheduler,
            internal_token: None,
            cron_secret: None,
        }
    }

    pub fn with_internal_token(mut self, token: Option<String>) -> Self {
        self.internal_token = token.filter(|t| !t.is_empty());
        self
    }

    pub fn with_cron_secret(mut self, secret: Option<String>) -> Self {
        self.cron_secret = secret.filter(|s| !s.is_empty());
        self
    }
}

/// Extract a bearer token from the request
pub fn extract_bearer(req: &Request) -> Option<&str> {
    let auth = req.headers().get("authorization")?.to_str().ok()?;
    auth.strip_prefix("Bearer ").map(str::trim)
}

/// Hash a secret for comparison
fn hash_secret(secret: &str) -> Vec<u8> {
    Sha256::digest(secret.as_bytes()).to_vec()
}

/// Compare a presented secret with the configured one. Both sides are hashed
/// first so the comparison runs over fixed-length digests.
fn verify_secret(presented: &str, expected: &str) -> bool {
    let presented = hash_secret(presented);
    let expected = hash_secret(expected);
    presented
        .iter()
        .zip(expected.iter())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

fn check_bearer(req: &Request, expected: &str) -> Result<(), StatusCode> {
    let presented = extract_bearer(req).ok_or_else(|| {
        warn!("Missing bearer token in request to {}", req.uri().path());
        StatusCode::UNAUTHORIZED
    })?;

    if !verify_secret(presented, expected) {
        warn!("Bearer token mismatch for {}", req.uri().path());
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(())
}

/// Authentication middleware for the internal campaign API
pub async fn internal_auth_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(expected) = state.internal_token.as_deref() else {
        warn!(
            "Internal API request to {} rejected: api.internal_token is not configured",
            request.uri().path()
        );
        return Err(StatusCode::UNAUTHORIZED);
    };

    check_bearer(&request, expected)?;
    Ok(next.run(request).await)
}

/// Authentication middleware for the cron trigger
pub async fn cron_auth_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if let Some(expected) = state.cron_secret.as_deref() {
        check_bearer(&request, expected)?;
    }
    Ok(next.run(request).await)
}
