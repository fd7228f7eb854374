use thiserror::Error;

/// Errors for schedule definition handling.
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// The recurrence document is unparseable or fails validation.
    #[error("Invalid schedule definition: {0}")]
    InvalidDefinition(String),
}

pub type Result<T> = std::result::Result<T, ScheduleError>;
