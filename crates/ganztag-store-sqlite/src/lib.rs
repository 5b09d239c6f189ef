//! SQLite backend for the ganztag occupancy store.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. Because that thread executes one
//! closure at a time, every [`ActiveStore::transact`] call is serialised:
//! two scans of the same tag can never interleave.
//!
//! [`ActiveStore::transact`]: ganztag_core::store::ActiveStore::transact

mod encode;
mod schema;
mod store;
mod tx;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteStore;

#[cfg(test)]
mod tests;
