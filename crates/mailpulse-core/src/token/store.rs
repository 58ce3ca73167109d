//! Token Store - per-user OAuth credentials, encrypted at rest
//!
//! Refresh is split in two: [`TokenStore::refresh`] asks the provider for new
//! credentials without touching storage, and [`TokenStore::persist_refresh`]
//! writes them back. A [`MailboxSession`] runs both inline before a send when
//! the access token is at or near expiry, so the refreshed token is stored
//! before the send call returns.

use super::cipher::{CipherError, TokenCipher};
use crate::dispatch::SendError;
use crate::provider::{MailProvider, ProviderError, TokenRefresher};
use chrono::{DateTime, Duration, Utc};
use mailpulse_common::types::UserId;
use mailpulse_storage::models::SaveOAuthToken;
use mailpulse_storage::repository::OAuthTokenRepository;
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Lifetime assumed when the token endpoint does not state one
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

/// Token errors
#[derive(Error, Debug)]
pub enum TokenError {
    #[error("mailbox not connected for user {0}")]
    NotConnected(UserId),

    #[error("stored token could not be decrypted: {0}")]
    Decrypt(#[source] CipherError),

    #[error("no refresh token stored")]
    RefreshUnavailable,

    #[error("token refresh failed: {0}")]
    Refresh(#[source] ProviderError),

    #[error("token storage error: {0}")]
    Storage(#[from] mailpulse_common::Error),
}

/// Decrypted OAuth credentials for one mailbox
#[derive(Debug)]
pub struct Credentials {
    pub access_token: SecretString,
    pub refresh_token: SecretString,
    pub expires_at: DateTime<Utc>,
    pub account_email: String,
}

impl Credentials {
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_at: DateTime<Utc>,
        account_email: impl Into<String>,
    ) -> Self {
        Self {
            access_token: SecretString::from(access_token.into()),
            refresh_token: SecretString::from(refresh_token.into()),
            expires_at,
            account_email: account_email.into(),
        }
    }
}

/// Token store
#[derive(Clone)]
pub struct TokenStore {
    repo: Arc<dyn OAuthTokenRepository>,
    cipher: TokenCipher,
    provider: Arc<dyn MailProvider>,
    refresher: Arc<dyn TokenRefresher>,
    refresh_skew: Duration,
}

impl TokenStore {
    pub fn new(
        repo: Arc<dyn OAuthTokenRepository>,
        cipher: TokenCipher,
        provider: Arc<dyn MailProvider>,
        refresher: Arc<dyn TokenRefresher>,
    ) -> Self {
        Self {
            repo,
            cipher,
            provider,
            refresher,
            refresh_skew: Duration::seconds(60),
        }
    }

    /// Refresh this many seconds before the stated expiry
    pub fn with_refresh_skew(mut self, secs: i64) -> Self {
        self.refresh_skew = Duration::seconds(secs.max(0));
        self
    }

    /// Load and decrypt the credentials of `user_id`
    pub async fn load(&self, user_id: UserId) -> Result<Credentials, TokenError> {
        let record = self
            .repo
            .find(user_id)
            .await?
            .ok_or(TokenError::NotConnected(user_id))?;

        Ok(Credentials {
            access_token: self.cipher.decrypt(&record.access_token).map_err(TokenError::Decrypt)?,
            refresh_token: self.cipher.decrypt(&record.refresh_token).map_err(TokenError::Decrypt)?,
            expires_at: record.expires_at,
            account_email: record.account_email,
        })
    }

    /// Store credentials obtained from OAuth consent, replacing any previous record
    pub async fn save(&self, user_id: UserId, credentials: &Credentials) -> Result<(), TokenError> {
        self.repo
            .upsert(SaveOAuthToken {
                user_id,
                access_token: self.seal(&credentials.access_token)?,
                refresh_token: self.seal(&credentials.refresh_token)?,
                expires_at: credentials.expires_at,
                account_email: credentials.account_email.clone(),
            })
            .await?;
        info!("Stored mailbox credentials for user {}", user_id);
        Ok(())
    }

    pub fn is_expired(&self, credentials: &Credentials, now: DateTime<Utc>) -> bool {
        credentials.expires_at - self.refresh_skew <= now
    }

    /// Exchange the refresh token for new credentials. Nothing is persisted.
    pub async fn refresh(
        &self,
        credentials: &Credentials,
        now: DateTime<Utc>,
    ) -> Result<Credentials, TokenError> {
        if credentials.refresh_token.expose_secret().is_empty() {
            return Err(TokenError::RefreshUnavailable);
        }

        let grant = self
            .refresher
            .refresh(&credentials.refresh_token)
            .await
            .map_err(TokenError::Refresh)?;

        let lifetime = grant
            .expires_in
            .and_then(|secs| i64::try_from(secs).ok())
            .unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);

        let refresh_token = match grant.refresh_token {
            Some(rotated) => rotated,
            None => SecretString::from(credentials.refresh_token.expose_secret().to_string()),
        };

        Ok(Credentials {
            access_token: grant.access_token,
            refresh_token,
            expires_at: now + Duration::seconds(lifetime),
            account_email: credentials.account_email.clone(),
        })
    }

    /// Write refreshed credentials back to the token record
    pub async fn persist_refresh(&self, user_id: UserId, credentials: &Credentials) -> Result<(), TokenError> {
        let access_token = self.seal(&credentials.access_token)?;
        let refresh_token = self.seal(&credentials.refresh_token)?;
        self.repo
            .update_access_token(user_id, &access_token, Some(&refresh_token), credentials.expires_at)
            .await?;
        debug!("Persisted refreshed token for user {}, expires {}", user_id, credentials.expires_at);
        Ok(())
    }

    /// Load credentials, refreshing and persisting them first if they are
    /// already at expiry, and open a send session
    pub async fn get_valid_client(&self, user_id: UserId) -> Result<MailboxSession, TokenError> {
        let mut session = MailboxSession {
            user_id,
            credentials: self.load(user_id).await?,
            tokens: self.clone(),
        };
        session.ensure_fresh().await?;
        Ok(session)
    }

    fn seal(&self, secret: &SecretString) -> Result<String, TokenError> {
        self.cipher
            .encrypt(secret.expose_secret())
            .map_err(|e| TokenError::Storage(mailpulse_common::Error::Crypto(e.to_string())))
    }
}

/// Authenticated send client for one user's mailbox
pub struct MailboxSession {
    user_id: UserId,
    credentials: Credentials,
    tokens: TokenStore,
}

impl MailboxSession {
    /// Address of the connected provider account
    pub fn account_email(&self) -> &str {
        &self.credentials.account_email
    }

    async fn ensure_fresh(&mut self) -> Result<(), TokenError> {
        if self.tokens.is_expired(&self.credentials, Utc::now()) {
            self.force_refresh().await?;
        }
        Ok(())
    }

    async fn force_refresh(&mut self) -> Result<(), TokenError> {
        let refreshed = self.tokens.refresh(&self.credentials, Utc::now()).await?;
        self.tokens.persist_refresh(self.user_id, &refreshed).await?;
        self.credentials = refreshed;
        Ok(())
    }

    /// Send one raw message. A rejected access token is refreshed once and
    /// the send retried once.
    pub async fn send_raw(&mut self, raw: &str) -> Result<String, SendError> {
        self.ensure_fresh().await?;

        match self
            .tokens
            .provider
            .send_raw(&self.credentials.access_token, raw)
            .await
        {
            Err(ProviderError::Unauthorized) => {
                warn!("Access token rejected for user {}, refreshing", self.user_id);
                self.force_refresh().await?;
                Ok(self
                    .tokens
                    .provider
                    .send_raw(&self.credentials.access_token, raw)
                    .await?)
            }
            result => Ok(result?),
        }
    }
}
