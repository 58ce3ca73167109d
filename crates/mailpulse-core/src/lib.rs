//! MailPulse Core - Campaign dispatch and engagement tracking
//!
//! This crate holds the engine behind MailPulse: encrypted mailbox
//! credentials, per-recipient personalization, MIME composition, the
//! throttled delivery orchestrator, the scheduled-campaign sweep and the
//! open/click collector.

pub mod compose;
pub mod dispatch;
pub mod personalize;
pub mod provider;
pub mod scheduled;
pub mod token;
pub mod tracking;

#[cfg(test)]
mod testing;

pub use compose::{ComposeError, MessageComposer};
pub use dispatch::{DispatchError, DispatchReport, Dispatcher, SendCampaignRequest, SendError, SendThrottle, Throttle};
pub use provider::{GmailApi, MailProvider, ProviderError, TokenGrant, TokenRefresher};
pub use scheduled::{Audience, CampaignError, CampaignManager, CampaignReport, CampaignScheduler, ScheduleCampaign, ScheduledRun};
pub use token::{Credentials, MailboxSession, TokenCipher, TokenError, TokenStore};
pub use tracking::{parse_tracking_id, redirect_target, EngagementCollector, TrackingError, TrackingLinks};
