//! Gmail REST client for raw-message sends and token refresh

use super::{sanitize_error_body, MailProvider, ProviderError, TokenGrant, TokenRefresher};
use async_trait::async_trait;
use mailpulse_common::config::OAuthConfig;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct SendResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Gmail API client
pub struct GmailApi {
    client: Client,
    api_base_url: String,
    token_url: String,
    client_id: String,
    client_secret: SecretString,
}

impl GmailApi {
    pub fn from_config(config: &OAuthConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()
            .map_err(|e| ProviderError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            token_url: config.token_url.clone(),
            client_id: config.client_id.clone(),
            client_secret: SecretString::from(config.client_secret.clone()),
        })
    }

    fn send_url(&self) -> String {
        format!("{}/gmail/v1/users/me/messages/send", self.api_base_url)
    }
}

#[async_trait]
impl MailProvider for GmailApi {
    async fn send_raw(&self, access_token: &SecretString, raw: &str) -> Result<String, ProviderError> {
        let response = self
            .client
            .post(self.send_url())
            .bearer_auth(access_token.expose_secret())
            .json(&serde_json::json!({ "raw": raw }))
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(ProviderError::Unauthorized);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Rejected {
                status: status.as_u16(),
                body: sanitize_error_body(&body),
            });
        }

        let sent: SendResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Transport(format!("Failed to parse send response: {}", e)))?;

        debug!("Provider accepted message {}", sent.id);
        Ok(sent.id)
    }
}

#[async_trait]
impl TokenRefresher for GmailApi {
    async fn refresh(&self, refresh_token: &SecretString) -> Result<TokenGrant, ProviderError> {
        info!("Refreshing access token");

        let params = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.expose_secret()),
            ("refresh_token", refresh_token.expose_secret()),
            ("grant_type", "refresh_token"),
        ];

        let response = self
            .client
            .post(&self.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(format!("Token refresh failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Rejected {
                status: status.as_u16(),
                body: sanitize_error_body(&body),
            });
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Transport(format!("Failed to parse refresh response: {}", e)))?;

        Ok(TokenGrant {
            access_token: SecretString::from(token.access_token),
            expires_in: token.expires_in,
            refresh_token: token.refresh_token.map(SecretString::from),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn api(server: &MockServer) -> GmailApi {
        GmailApi::from_config(&OAuthConfig {
            client_id: "client-1".to_string(),
            client_secret: "shh".to_string(),
            token_url: format!("{}/token", server.uri()),
            api_base_url: server.uri(),
            refresh_skew_secs: 60,
            http_timeout_secs: 5,
        })
        .unwrap()
    }

    fn token(value: &str) -> SecretString {
        SecretString::from(value.to_string())
    }

    #[tokio::test]
    async fn test_send_raw() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/gmail/v1/users/me/messages/send"))
            .and(header("authorization", "Bearer access-1"))
            .and(body_json(serde_json::json!({ "raw": "UkFX" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "msg-1",
                "threadId": "t-1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let id = api(&server).send_raw(&token("access-1"), "UkFX").await.unwrap();
        assert_eq!(id, "msg-1");
    }

    #[tokio::test]
    async fn test_send_unauthorized() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = api(&server).send_raw(&token("stale"), "UkFX").await.unwrap_err();
        assert!(matches!(err, ProviderError::Unauthorized));
    }

    #[tokio::test]
    async fn test_send_rejected_body_truncated() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("x".repeat(1000)))
            .mount(&server)
            .await;

        match api(&server).send_raw(&token("a"), "UkFX").await.unwrap_err() {
            ProviderError::Rejected { status, body } => {
                assert_eq!(status, 400);
                assert!(body.len() < 300);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_refresh_grant() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=refresh-1"))
            .and(body_string_contains("client_id=client-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "access-2",
                "expires_in": 3599,
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let grant = api(&server).refresh(&token("refresh-1")).await.unwrap();
        assert_eq!(grant.access_token.expose_secret(), "access-2");
        assert_eq!(grant.expires_in, Some(3599));
        assert!(grant.refresh_token.is_none());
    }

    #[tokio::test]
    async fn test_refresh_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(serde_json::json!({ "error": "invalid_grant" })),
            )
            .mount(&server)
            .await;

        let err = api(&server).refresh(&token("revoked")).await.unwrap_err();
        assert!(matches!(err, ProviderError::Rejected { status: 400, .. }));
    }
}
