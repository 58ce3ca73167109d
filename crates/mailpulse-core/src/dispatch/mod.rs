//! Delivery Orchestrator and its throttling policy

mod orchestrator;
mod throttle;

pub(crate) use orchestrator::clamp_count;
pub use orchestrator::{DispatchReport, Dispatcher, SendCampaignRequest};
pub use throttle::{SendThrottle, Throttle};

use crate::compose::ComposeError;
use crate::provider::ProviderError;
use crate::token::TokenError;
use mailpulse_common::types::{CampaignId, UserId};
use thiserror::Error;

/// Failure to deliver to one recipient. The batch continues.
#[derive(Error, Debug)]
pub enum SendError {
    #[error("compose failed: {0}")]
    Compose(#[from] ComposeError),

    #[error("provider send failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("credentials failed: {0}")]
    Token(#[from] TokenError),
}

/// Failure of a whole dispatch run
#[derive(Error, Debug)]
pub enum DispatchError {
    /// No token record; nothing was attempted
    #[error("mailbox not connected for user {0}")]
    NotConnected(UserId),

    /// Stored credentials unusable (decrypt or refresh failure); nothing was attempted
    #[error("mailbox credentials unusable: {0}")]
    Credentials(#[source] TokenError),

    #[error("invalid sender identity: {0}")]
    InvalidSender(#[source] ComposeError),

    #[error("campaign {0} is not in a dispatchable state")]
    InvalidState(CampaignId),

    #[error("persistence error: {0}")]
    Persistence(#[source] mailpulse_common::Error),

    /// Messages went out but the final campaign update failed. Never re-send.
    #[error("campaign {campaign_id} sent {sent} messages but the result was not recorded: {source}")]
    Unrecorded {
        campaign_id: CampaignId,
        sent: usize,
        source: mailpulse_common::Error,
    },

    #[error("dispatcher is shutting down")]
    ShuttingDown,
}

impl From<TokenError> for DispatchError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::NotConnected(user_id) => DispatchError::NotConnected(user_id),
            other => DispatchError::Credentials(other),
        }
    }
}

impl DispatchError {
    /// HTTP status for API responses
    pub fn status_code(&self) -> u16 {
        match self {
            DispatchError::NotConnected(_) => 409,
            DispatchError::Credentials(_) => 409,
            DispatchError::InvalidSender(_) => 422,
            DispatchError::InvalidState(_) => 409,
            DispatchError::Persistence(_) => 500,
            DispatchError::Unrecorded { .. } => 500,
            DispatchError::ShuttingDown => 503,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            DispatchError::NotConnected(_) => "not_connected",
            DispatchError::Credentials(_) => "credentials_error",
            DispatchError::InvalidSender(_) => "invalid_sender",
            DispatchError::InvalidState(_) => "invalid_state",
            DispatchError::Persistence(_) => "persistence_error",
            DispatchError::Unrecorded { .. } => "unrecorded",
            DispatchError::ShuttingDown => "shutting_down",
        }
    }
}
