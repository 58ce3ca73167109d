//! Scheduled Campaign Module - audience resolution and the due-campaign sweep

mod manager;
mod scheduler;

pub use manager::{Audience, CampaignError, CampaignManager, CampaignReport, ScheduleCampaign};
pub use scheduler::{CampaignScheduler, ScheduledRun};
