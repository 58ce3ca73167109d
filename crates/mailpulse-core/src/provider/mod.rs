//! Mailbox provider seam: the send API and the OAuth token endpoint

mod gmail;

pub use gmail::GmailApi;

use async_trait::async_trait;
use secrecy::SecretString;
use thiserror::Error;

/// Provider errors
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    /// The access token was rejected
    #[error("provider rejected the access token")]
    Unauthorized,

    #[error("provider returned {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("provider transport error: {0}")]
    Transport(String),
}

/// Fresh credentials issued by the token endpoint
#[derive(Debug)]
pub struct TokenGrant {
    pub access_token: SecretString,
    /// Lifetime in seconds, when the provider states one
    pub expires_in: Option<u64>,
    /// Set only when the provider rotated the refresh token
    pub refresh_token: Option<SecretString>,
}

/// Raw-message send API of a connected mailbox
#[async_trait]
pub trait MailProvider: Send + Sync {
    /// Send a base64url encoded RFC 2822 message. Returns the provider's message id.
    async fn send_raw(&self, access_token: &SecretString, raw: &str) -> Result<String, ProviderError>;
}

/// OAuth refresh-token grant
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &SecretString) -> Result<TokenGrant, ProviderError>;
}

const MAX_ERROR_BODY_CHARS: usize = 200;

/// Truncate provider error bodies before they reach logs or stored errors
pub(crate) fn sanitize_error_body(body: &str) -> String {
    let body = body.trim();
    if body.chars().count() > MAX_ERROR_BODY_CHARS {
        let truncated: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
        format!("{}... (truncated)", truncated)
    } else {
        body.to_string()
    }
}
