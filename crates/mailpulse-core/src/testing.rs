//! Shared fixtures for engine tests: an in-memory store, a scripted provider
//! and helpers to seed recipients and campaigns

use crate::dispatch::{Dispatcher, SendThrottle};
use crate::provider::{MailProvider, ProviderError, TokenGrant, TokenRefresher};
use crate::token::{Credentials, TokenCipher, TokenStore};
use crate::tracking::TrackingLinks;
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use mailpulse_common::types::{CampaignId, GroupId, RecipientId, UserId};
use mailpulse_storage::models::{
    Campaign, CampaignRecipient, CampaignStatus, CreateCampaign, CreateRecipient, Recipient,
    RecipientGroup, UpsertUserProfile,
};
use mailpulse_storage::repository::*;
use mailpulse_storage::{MemoryStore, Store};
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub const TEST_KEY: &str = "8f3a1c2e4b5d6f708192a3b4c5d6e7f8091a2b3c4d5e6f708192a3b4c5d6e7f8";

#[derive(Default)]
struct ProviderState {
    attempts: Vec<(String, String, bool)>,
    revoked: HashSet<String>,
    rejected: HashSet<String>,
    refreshes: usize,
    fail_refresh: bool,
    cancel_after: Option<(usize, CancellationToken)>,
}

/// Provider double: records every send attempt and issues `access-N` tokens
#[derive(Default)]
pub struct FakeProvider {
    state: Mutex<ProviderState>,
}

impl FakeProvider {
    /// Answer 401 for this access token
    pub fn revoke(&self, token: &str) {
        self.state.lock().unwrap().revoked.insert(token.to_string());
    }

    /// Reject every message addressed to this recipient
    pub fn reject_recipient(&self, email: &str) {
        self.state.lock().unwrap().rejected.insert(email.to_string());
    }

    pub fn fail_refresh(&self) {
        self.state.lock().unwrap().fail_refresh = true;
    }

    /// Cancel `token` once this many messages were accepted
    pub fn cancel_after(&self, sends: usize, token: CancellationToken) {
        self.state.lock().unwrap().cancel_after = Some((sends, token));
    }

    pub fn refresh_count(&self) -> usize {
        self.state.lock().unwrap().refreshes
    }

    /// Access tokens of every attempt, accepted or not
    pub fn sent_tokens(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .attempts
            .iter()
            .map(|(token, _, _)| token.clone())
            .collect()
    }

    /// Raw payloads of accepted messages
    pub fn sent_messages(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .attempts
            .iter()
            .filter(|(_, _, ok)| *ok)
            .map(|(_, raw, _)| raw.clone())
            .collect()
    }

    pub fn sent_count(&self) -> usize {
        self.sent_messages().len()
    }

    /// Decoded accepted messages addressed to `email`
    pub fn messages_to(&self, email: &str) -> Vec<String> {
        let needle = format!("<{}>", email);
        self.sent_messages()
            .into_iter()
            .map(|raw| decode(&raw))
            .filter(|message| message.contains(&needle))
            .collect()
    }
}

fn decode(raw: &str) -> String {
    String::from_utf8_lossy(&URL_SAFE_NO_PAD.decode(raw).unwrap_or_default()).into_owned()
}

#[async_trait]
impl MailProvider for FakeProvider {
    async fn send_raw(&self, access_token: &SecretString, raw: &str) -> Result<String, ProviderError> {
        let mut state = self.state.lock().unwrap();
        let token = access_token.expose_secret().to_string();

        if state.revoked.contains(&token) {
            state.attempts.push((token, raw.to_string(), false));
            return Err(ProviderError::Unauthorized);
        }

        let message = decode(raw);
        let rejected = state
            .rejected
            .iter()
            .any(|email| message.contains(&format!("<{}>", email)));
        state.attempts.push((token, raw.to_string(), !rejected));
        if rejected {
            return Err(ProviderError::Rejected {
                status: 400,
                body: "Invalid To header".to_string(),
            });
        }

        let accepted = state.attempts.iter().filter(|(_, _, ok)| *ok).count();
        if let Some((after, token)) = &state.cancel_after {
            if accepted >= *after {
                token.cancel();
            }
        }
        Ok(format!("msg-{}", accepted))
    }
}

#[async_trait]
impl TokenRefresher for FakeProvider {
    async fn refresh(&self, _refresh_token: &SecretString) -> Result<TokenGrant, ProviderError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_refresh {
            return Err(ProviderError::Rejected {
                status: 400,
                body: r#"{"error":"invalid_grant"}"#.to_string(),
            });
        }
        state.refreshes += 1;
        Ok(TokenGrant {
            access_token: SecretString::from(format!("access-{}", state.refreshes)),
            expires_in: None,
            refresh_token: None,
        })
    }
}

/// One user with an in-memory store and a scripted provider
pub struct Fixture {
    pub user_id: UserId,
    pub backend: Arc<MemoryStore>,
    pub store: Store,
    pub provider: Arc<FakeProvider>,
    pub tokens: TokenStore,
    pub shutdown: CancellationToken,
}

impl Fixture {
    pub async fn new() -> Self {
        let backend = Arc::new(MemoryStore::new());
        let store = Store::memory(backend.clone());
        let provider = Arc::new(FakeProvider::default());
        let cipher = TokenCipher::from_hex_key(TEST_KEY).unwrap();
        let tokens = TokenStore::new(store.tokens.clone(), cipher, provider.clone(), provider.clone());
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

        Self {
            user_id,
            backend,
            store,
            provider,
            tokens,
            shutdown: CancellationToken::new(),
        }
    }

    /// Store credentials `access-0` / `refresh-0`
    pub async fn connect(&self, expires_at: DateTime<Utc>) {
        let credentials = Credentials::new("access-0", "refresh-0", expires_at, "owner@example.com");
        self.tokens.save(self.user_id, &credentials).await.unwrap();
    }

    pub fn links(&self) -> TrackingLinks {
        TrackingLinks::new("https://track.example.com").unwrap()
    }

    pub fn dispatcher(&self) -> Dispatcher {
        self.dispatcher_with_delay(Duration::ZERO)
    }

    pub fn dispatcher_with_delay(&self, delay: Duration) -> Dispatcher {
        let throttle = Arc::new(SendThrottle::new(delay, 2, self.shutdown.clone()));
        Dispatcher::new(self.store.clone(), self.tokens.clone(), self.links(), throttle)
    }

    pub async fn recipient(&self, email: &str, first_name: Option<&str>) -> Recipient {
        self.recipient_with_fields(email, first_name, serde_json::json!({}))
            .await
    }

    pub async fn recipient_with_fields(
        &self,
        email: &str,
        first_name: Option<&str>,
        custom_fields: serde_json::Value,
    ) -> Recipient {
        self.store
            .recipients
            .create(CreateRecipient {
                user_id: self.user_id,
                email: email.to_string(),
                first_name: first_name.map(str::to_string),
                last_name: None,
                custom_fields: Some(custom_fields),
            })
            .await
            .unwrap()
    }

    pub async fn group(&self, name: &str, members: &[RecipientId]) -> RecipientGroup {
        let group = self.store.groups.create(self.user_id, name).await.unwrap();
        for member in members {
            self.store.groups.add_member(group.id, *member).await.unwrap();
        }
        group
    }

    pub async fn remove_member(&self, group_id: GroupId, recipient_id: RecipientId) {
        assert!(self
            .store
            .groups
            .remove_member(group_id, recipient_id)
            .await
            .unwrap());
    }

    async fn campaign_with(
        &self,
        recipient_ids: &[RecipientId],
        status: CampaignStatus,
        scheduled_at: Option<DateTime<Utc>>,
    ) -> (Campaign, Vec<CampaignRecipient>) {
        let campaign = self
            .store
            .campaigns
            .create(CreateCampaign {
                user_id: self.user_id,
                name: "Fixture".to_string(),
                subject: "Hi {{first_name}}".to_string(),
                content: "<p>Hello {{first_name}}</p>".to_string(),
                status,
                scheduled_at,
                total_recipients: recipient_ids.len() as i32,
            })
            .await
            .unwrap();
        let rows = self
            .store
            .campaign_recipients
            .create_snapshot(campaign.id, recipient_ids)
            .await
            .unwrap();
        (campaign, rows)
    }

    /// A campaign already sent to `recipient_ids`
    pub async fn sent_campaign(&self, recipient_ids: &[RecipientId]) -> (Campaign, Vec<CampaignRecipient>) {
        let (campaign, rows) = self
            .campaign_with(recipient_ids, CampaignStatus::Sent, None)
            .await;
        for row in &rows {
            self.store
                .campaign_recipients
                .mark_sent(row.id, Utc::now())
                .await
                .unwrap();
        }
        (campaign, rows)
    }

    pub async fn scheduled_campaign(
        &self,
        recipient_ids: &[RecipientId],
        at: DateTime<Utc>,
    ) -> (Campaign, Vec<CampaignRecipient>) {
        self.campaign_with(recipient_ids, CampaignStatus::Scheduled, Some(at))
            .await
    }

    pub async fn campaign(&self, id: CampaignId) -> Campaign {
        self.store.campaigns.get(id).await.unwrap().unwrap()
    }

    pub async fn archive(&self, id: CampaignId) {
        assert!(self.store.campaigns.archive(self.user_id, id).await.unwrap());
    }
}
