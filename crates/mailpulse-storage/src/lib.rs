//! MailPulse Storage - Database access for the campaign engine
//!
//! This crate provides the PostgreSQL pool and migrations, the row models,
//! repository traits with their Postgres implementations, and an optional
//! in-memory backend (feature `memory`).

pub mod db;
#[cfg(any(test, feature = "memory"))]
pub mod memory;
pub mod models;
pub mod repository;
pub mod store;

pub use db::DatabasePool;
#[cfg(any(test, feature = "memory"))]
pub use memory::MemoryStore;
pub use models::*;
pub use repository::*;
pub use store::Store;
