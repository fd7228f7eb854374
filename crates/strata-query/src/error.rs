use thiserror::Error;

/// A structural substitution failure.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("undefined structural parameter '{0}'")]
    UndefinedParameter(String),

    #[error("unresolved template syntax near {0:?}")]
    UnresolvedSyntax(String),
}

/// A value-parameter cast failure. The parameter name is attached by the
/// executor, which knows which binding was being cast.
#[derive(Debug, Error)]
#[error("{reason}")]
pub struct CastError {
    pub reason: String,
}

impl CastError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Errors that can occur while executing a report.
///
/// [`crate::executor::execute_report`] converts every variant into a
/// `QueryResult.error` string; this enum never escapes to its callers.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("{0}")]
    Validation(String),

    #[error("Template rendering error: {0}")]
    Template(#[from] TemplateError),

    #[error("Parameter '{name}': {source}")]
    Cast { name: String, source: CastError },

    #[error("Query error: {0}")]
    Engine(#[from] rusqlite::Error),
}
