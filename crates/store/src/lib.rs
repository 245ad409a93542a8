//! Versioned SQLite document store for mirrored game API resources.
//!
//! Every resource the game API exposes is mirrored into its own table of
//! opaque JSON documents. The store is not the source of truth - the game
//! servers are. If the database file is deleted, the next sync rebuilds it.
//!
//! # Architecture
//! - **Schema**: a static registry of versioned, additive-only migrations
//!   (tables and `json_extract()` expression indexes). The on-disk version
//!   lives in `PRAGMA user_version`.
//! - **Manager**: owns the single connection pool. Handles are counted, the
//!   pool is opened (and migrated) by the first and closed by the last.
//! - **Freshness**: per-resource timestamps of the last complete sync.

mod db;
pub mod error;
pub mod freshness;
mod key;
mod query;
pub mod schema;
mod table;

pub use crate::db::{Store, StoreManager, StoreOptions};
pub use crate::freshness::{Clock, FreshnessClass, FreshnessTracker, ManualClock, SystemClock, Thresholds};
pub use crate::key::{IndexValue, Key};
pub use crate::schema::{CURRENT_VERSION, DATABASE_NAME, Table};
pub use crate::table::{IndexLookup, ReconcileReport, TableStore};
