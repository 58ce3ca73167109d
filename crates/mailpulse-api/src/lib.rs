//! MailPulse API - HTTP surface
//!
//! This crate provides the axum router for MailPulse: the public tracking
//! endpoints hit by mail clients, the cron trigger for scheduled campaigns,
//! and the internal campaign API used by the composing application.

pub mod auth;
pub mod handlers;
pub mod routes;

#[cfg(test)]
mod test_support;

pub use auth::AppState;
pub use routes::create_router;
