//! OAuth token repository
//!
//! Stores ciphertext only; encryption happens in the token store above.

use crate::db::DatabasePool;
use crate::models::{OAuthTokenRecord, SaveOAuthToken};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mailpulse_common::types::UserId;
use mailpulse_common::{Error, Result};

/// OAuth token repository trait
#[async_trait]
pub trait OAuthTokenRepository: Send + Sync {
    async fn find(&self, user_id: UserId) -> Result<Option<OAuthTokenRecord>>;
    /// Insert or replace the record, as on a fresh consent
    async fn upsert(&self, input: SaveOAuthToken) -> Result<()>;
    /// Rewrite the access token after a refresh. The refresh token is only
    /// replaced when the provider rotated it.
    async fn update_access_token(
        &self,
        user_id: UserId,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_at: DateTime<Utc>,
    ) -> Result<()>;
}

/// Database OAuth token repository
pub struct DbOAuthTokenRepository {
    pool: DatabasePool,
}

impl DbOAuthTokenRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OAuthTokenRepository for DbOAuthTokenRepository {
    async fn find(&self, user_id: UserId) -> Result<Option<OAuthTokenRecord>> {
        sqlx::query_as::<_, OAuthTokenRecord>("SELECT * FROM oauth_tokens WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    async fn upsert(&self, input: SaveOAuthToken) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO oauth_tokens (user_id, access_token, refresh_token, expires_at, account_email)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (user_id) DO UPDATE SET
                access_token = EXCLUDED.access_token,
                refresh_token = EXCLUDED.refresh_token,
                expires_at = EXCLUDED.expires_at,
                account_email = EXCLUDED.account_email,
                updated_at = NOW()
            "#,
        )
        .bind(input.user_id)
        .bind(&input.access_token)
        .bind(&input.refresh_token)
        .bind(input.expires_at)
        .bind(&input.account_email)
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    async fn update_access_token(
        &self,
        user_id: UserId,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE oauth_tokens
            SET access_token = $2,
                refresh_token = COALESCE($3, refresh_token),
                expires_at = $4,
                updated_at = NOW()
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .bind(access_token)
        .bind(refresh_token)
        .bind(expires_at)
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(Error::NotConnected(user_id.to_string()));
        }
        Ok(())
    }
}
