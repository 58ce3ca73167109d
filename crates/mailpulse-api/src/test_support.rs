//! Router fixture backed by the in-memory store and a recording provider

use crate::auth::AppState;
use crate::routes::create_router;
use async_trait::async_trait;
use axum::http::{HeaderName, HeaderValue};
use axum_test::TestServer;
use chrono::{Duration as ChronoDuration, Utc};
use mailpulse_core::{
    CampaignScheduler, Credentials, Dispatcher, MailProvider, ProviderError, SendThrottle,
    TokenCipher, TokenGrant, TokenRefresher, TokenStore, TrackingLinks,
};
use mailpulse_storage::models::{CreateRecipient, Recipient, UpsertUserProfile};
use mailpulse_storage::{MemoryStore, Store};
use secrecy::SecretString;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub const INTERNAL_TOKEN: &str = "internal-test-token";
pub const CRON_SECRET: &str = "cron-test-secret";
const KEY: &str = "00112233445566778899aabbccddeeff00112233445566778899aabbccddeeff";

/// Accepts every message and counts it
#[derive(Default)]
pub struct CountingProvider {
    sent: AtomicUsize,
}

impl CountingProvider {
    pub fn sent(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MailProvider for CountingProvider {
    async fn send_raw(&self, _access_token: &SecretString, _raw: &str) -> Result<String, ProviderError> {
        let n = self.sent.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("msg-{}", n))
    }
}

#[async_trait]
impl TokenRefresher for CountingProvider {
    async fn refresh(&self, _refresh_token: &SecretString) -> Result<TokenGrant, ProviderError> {
        Ok(TokenGrant {
            access_token: SecretString::from("refreshed".to_string()),
            expires_in: Some(3600),
            refresh_token: None,
        })
    }
}

pub struct TestApp {
    pub server: TestServer,
    pub store: Store,
    pub tokens: TokenStore,
    pub provider: Arc<CountingProvider>,
    pub user_id: Uuid,
}

impl TestApp {
    pub async fn new() -> Self {
        let backend = Arc::new(MemoryStore::new());
        let store = Store::memory(backend);
        let provider = Arc::new(CountingProvider::default());
        let cipher = TokenCipher::from_hex_key(KEY).unwrap();
        let tokens = TokenStore::new(store.tokens.clone(), cipher, provider.clone(), provider.clone());
        let links = TrackingLinks::new("https://track.example.com").unwrap();
        let throttle = Arc::new(SendThrottle::new(Duration::ZERO, 2, CancellationToken::new()));
        let dispatcher = Dispatcher::new(store.clone(), tokens.clone(), links, throttle);
        let scheduler = CampaignScheduler::new(store.clone(), dispatcher.clone());

        let user_id = Uuid::new_v4();
        store
            .users
            .upsert_profile(UpsertUserProfile {
                id: user_id,
                email: "owner@example.com".to_string(),
                display_name: Some("Owner".to_string()),
            })
            .await
            .unwrap();

        let state = AppState::new(store.clone(), dispatcher, scheduler)
            .with_internal_token(Some(INTERNAL_TOKEN.to_string()))
            .with_cron_secret(Some(CRON_SECRET.to_string()));
        let server = TestServer::new(create_router(state, &[])).unwrap();

        Self {
            server,
            store,
            tokens,
            provider,
            user_id,
        }
    }

    pub async fn connect(&self) {
        let credentials = Credentials::new(
            "access",
            "refresh",
            Utc::now() + ChronoDuration::hours(1),
            "owner@example.com",
        );
        self.tokens.save(self.user_id, &credentials).await.unwrap();
    }

    pub async fn recipient(&self, email: &str, first_name: &str) -> Recipient {
        self.store
            .recipients
            .create(CreateRecipient {
                user_id: self.user_id,
                email: email.to_string(),
                first_name: Some(first_name.to_string()),
                last_name: None,
                custom_fields: None,
            })
            .await
            .unwrap()
    }
}

pub fn bearer(token: &str) -> (HeaderName, HeaderValue) {
    (
        HeaderName::from_static("authorization"),
        HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
    )
}
