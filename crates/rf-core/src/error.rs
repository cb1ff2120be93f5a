//! # AppError
//!
//! Centralized error handling for the Rusty-Forum client.
//! Maps every failure onto the user-facing categories the UI knows how to show.

use thiserror::Error;

/// The primary error type for all rf-core operations.
#[derive(Error, Debug)]
pub enum AppError {
    /// Resource not found (e.g., Category, Post, Comment)
    #[error("{0} not found: {1}")]
    NotFound(String, String),

    /// Client-side validation failure (e.g., empty title, missing category)
    #[error("validation error: {0}")]
    ValidationError(String),

    /// The caller must sign in, or lacks the admin role
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// An operation is already in flight for the same resource
    #[error("conflict: {0}")]
    Conflict(String),

    /// The backend rejected or failed the call
    #[error("remote store error: {0}")]
    Remote(String),

    /// Local failure that should not happen (e.g., preference file unwritable)
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Remote(format!("{err:#}"))
    }
}

/// A specialized Result type for Rusty-Forum logic.
pub type Result<T> = std::result::Result<T, AppError>;
