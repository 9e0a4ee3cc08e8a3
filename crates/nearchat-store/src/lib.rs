//! # nearchat-store
//!
//! SQLite persistence for the nearchat relay.
//!
//! The relay writes here from a background worker and reads back only to
//! replay recent nearby messages.  The crate exposes a synchronous `Database`
//! handle that wraps a `rusqlite::Connection` and provides typed helpers for
//! the two persisted models: last-known user positions and relayed messages.

pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod users;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use models::*;
