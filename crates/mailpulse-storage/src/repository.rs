//! Repository layer for data access

pub mod attachments;
pub mod campaign_recipients;
pub mod campaigns;
pub mod events;
pub mod oauth_tokens;
pub mod recipients;
pub mod users;

// Repository traits
pub use attachments::AttachmentRepository;
pub use campaign_recipients::CampaignRecipientRepository;
pub use campaigns::CampaignRepository;
pub use events::EmailEventRepository;
pub use oauth_tokens::OAuthTokenRepository;
pub use recipients::{GroupRepository, RecipientRepository};
pub use users::UserRepository;

// Postgres implementations
pub use attachments::DbAttachmentRepository;
pub use campaign_recipients::DbCampaignRecipientRepository;
pub use campaigns::DbCampaignRepository;
pub use events::DbEmailEventRepository;
pub use oauth_tokens::DbOAuthTokenRepository;
pub use recipients::{DbGroupRepository, DbRecipientRepository};
pub use users::DbUserRepository;
