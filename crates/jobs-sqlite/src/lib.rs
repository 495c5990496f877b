//! SQLite-backed job store: fingerprint-keyed upserts, run-statistics log and exports.

mod error;
mod export;
mod insert;
mod models;
mod open;
mod query;
mod schema;

pub use error::{Result, StoreError};
pub use models::*;
pub use open::Db;
