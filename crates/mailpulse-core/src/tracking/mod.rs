//! Engagement tracking: link instrumentation and the collector behind the
//! open pixel and click redirector

mod collector;
mod links;

pub use collector::{parse_tracking_id, EngagementCollector};
pub use links::{redirect_target, TrackingLinks};

use thiserror::Error;

/// Tracking errors
#[derive(Error, Debug)]
pub enum TrackingError {
    #[error("invalid public base URL {0}")]
    InvalidBaseUrl(String),
}
