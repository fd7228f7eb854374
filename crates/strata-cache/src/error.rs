use thiserror::Error;

/// Errors from the result cache.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unknown sort column: {0}")]
    UnknownColumn(String),
}

pub type Result<T> = std::result::Result<T, CacheError>;
