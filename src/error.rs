// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Error types for Taxis

use thiserror::Error;

/// Result type alias for Taxis operations
pub type Result<T> = std::result::Result<T, TaxisError>;

/// Taxis error types
#[derive(Error, Debug)]
pub enum TaxisError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File system error: {0}")]
    FileSystem(#[from] std::io::Error),

    #[error("API error: {0}")]
    Api(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Lookup failed: {0}")]
    Lookup(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TaxisError {
    /// Storage-layer errors stop the whole batch; everything else is
    /// isolated to the item that raised it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TaxisError::Database(_))
    }

    /// Transient errors get a bounded retry before the item is failed.
    pub fn is_transient(&self) -> bool {
        matches!(self, TaxisError::Api(_) | TaxisError::Lookup(_))
    }
}
