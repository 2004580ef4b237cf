use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Configuration error: {0}")] Config(String),

    #[error("Backend error: {0}")] Backend(String),

    #[error("Database error: {0}")] Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")] Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")] Io(#[from] std::io::Error),
}

impl CacheError {
    /// Whether a retry of the same operation can reasonably succeed.
    pub fn is_recoverable(&self) -> bool {
        match self {
            CacheError::Backend(_) => true,
            CacheError::Database(_) => true,
            CacheError::Io(_) => true,
            _ => false,
        }
    }
}

pub type CacheResult<T> = Result<T, CacheError>;
