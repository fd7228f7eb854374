//! `strata-query` — SQL template handling and report execution.
//!
//! # Overview
//!
//! A report's SQL template carries two disjoint placeholder syntaxes:
//!
//! | Marker      | Class      | Handling                                      |
//! |-------------|------------|-----------------------------------------------|
//! | `{{ name }}`| structural | validated against an allow-list, spliced into the SQL text |
//! | `$name`     | value      | cast to a typed [`ParamValue`], bound by name at execution |
//!
//! [`executor::execute_report`] runs the full pipeline — validate, render,
//! cast, execute — against a private in-memory engine session and never
//! returns an `Err`: every failure mode lands in [`executor::QueryResult::error`].

pub mod error;
pub mod executor;
pub mod template;

pub use error::{CastError, QueryError, TemplateError};
pub use executor::{execute_report, QueryResult};
pub use template::{
    cast_value, extract_parameters, render_structural, validate_structural_value,
    ExtractedParameter, ParamValue,
};
