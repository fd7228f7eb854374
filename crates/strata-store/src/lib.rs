//! `strata-store` — SQLite metadata store for reports, parameters,
//! schedules and run records.
//!
//! Schema initialisation is idempotent ([`db::init_db`]); all access goes
//! through [`MetadataStore`], which wraps a single connection and keeps
//! every read-modify-write inside one SQL statement or an explicit
//! transaction.

pub mod db;
pub mod error;
pub mod store;
pub mod types;

pub use error::{Result, StoreError};
pub use store::MetadataStore;
pub use types::{Report, RunRecord, RunStatus, Schedule};
