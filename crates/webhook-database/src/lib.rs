//! SQLite persistence for the webhook pipeline.
//!
//! This crate provides:
//! - The outbox table (`webhook_events`) and its state transitions
//! - The minimal household domain tables the event producer writes to
//! - Versioned migrations
//! - A synchronous `Database` and an async `AsyncDatabase`
//!
//! # Architecture
//!
//! Every query is a standalone function in [`queries`] taking a `&Connection`,
//! so the same code runs inside a domain transaction, behind the sync
//! `Database`, or on the dedicated thread of `AsyncDatabase`:
//!
//! ```ignore
//! let db = AsyncDatabase::open(path).await?;
//! let pending = db.call(|conn| queries::peek_pending_events(conn, 50)).await?;
//! ```
//!
//! Only SQL belongs inside `db.call()`. Network calls happen outside.

mod db;
mod error;
mod executor;
mod migrations;
mod models;
pub mod queries;

pub use db::Database;
pub use error::{DatabaseError, DatabaseResult};
pub use executor::AsyncDatabase;
pub use migrations::run_migrations;
pub use models::*;
