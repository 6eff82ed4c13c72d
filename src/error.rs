//! Error types for the photo catalog and world backfill.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// SQLite failure while reading or writing the catalog
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Metadata could not be serialized back after a world was merged in
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Album or photo does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
