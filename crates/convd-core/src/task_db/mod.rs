//! Persistent task store (SQLite via sqlx).
//!
//! Stores conversion tasks with their lifecycle state, chosen formats and typed
//! options, plus the credit and entitlement tables used by the ledger.

pub mod db;
mod tasks;
pub mod types;

pub use db::*;
pub use types::*;
