//! SQLite backend for the journey store.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. Every write is one SQLite transaction
//! executed inside a single `call`, so a write either commits whole or leaves
//! no trace, even if the calling future is dropped.

mod encode;
mod schema;
mod store;
mod sql;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteStore;

#[cfg(test)]
mod tests;
