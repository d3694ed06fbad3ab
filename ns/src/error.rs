//! Storage error types

use thiserror::Error;

/// Errors that can occur during store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Row not found: {0}")]
    NotFound(String),

    #[error("JSON column error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Check whether the error indicates a missing row
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
            || matches!(self, StoreError::Sqlite(rusqlite::Error::QueryReturnedNoRows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_not_found() {
        assert!(StoreError::NotFound("task x".to_string()).is_not_found());
        assert!(StoreError::Sqlite(rusqlite::Error::QueryReturnedNoRows).is_not_found());
        assert!(!StoreError::Migration("boom".to_string()).is_not_found());
    }
}
