//! Error types for quotaguard.

use thiserror::Error;

use crate::store::StoreError;

/// Main error type for quotaguard operations.
#[derive(Error, Debug)]
pub enum QuotaGuardError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Bucket store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for quotaguard operations.
pub type Result<T> = std::result::Result<T, QuotaGuardError>;
