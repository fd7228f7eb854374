//! `strata-cache` — content-addressed result cache.
//!
//! Results are keyed by a SHA-256 hash of `(report id, rendered SQL, value
//! bindings)` and materialised as one SQLite file per hash under a sharded
//! directory (`<root>/<hh>/<hash>.db`, `hh` = first two hex characters).
//! Files are write-once: identical inputs are assumed to produce identical
//! output, so an existing entry is never rewritten. Reads support
//! server-side filtering, sorting (nulls last) and paging.

pub mod error;
pub mod hash;
pub mod store;

pub use error::{CacheError, Result};
pub use hash::canonical_hash;
pub use store::{ReadOptions, ResultCache, SortDirection};
