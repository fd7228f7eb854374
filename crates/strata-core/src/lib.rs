//! `strata-core` — shared types, configuration and the common error type
//! for the Strata report engine.

pub mod config;
pub mod error;
pub mod types;

pub use error::{Result, StrataError};
pub use types::{ColumnInfo, DataType, ParamClass, ParameterDefinition, Row};
