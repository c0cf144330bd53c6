//! Shared error types used across arcfs crates.

use thiserror::Error;

/// Pathname-related errors shared across crates.
#[derive(Debug, Error, Clone)]
pub enum PathError {
    /// Entry pathname is empty or contains `.`, `..` or empty components.
    #[error("invalid pathname: {path}")]
    InvalidPathname {
        /// The offending pathname.
        path: String,
    },

    /// Another entry already occupies this absolute path.
    #[error("name collision: {path}")]
    Collision {
        /// The contested absolute path.
        path: String,
    },

    /// IO error occurred while resolving a path.
    #[error("IO error at {path}: {message}")]
    IoError {
        /// Path where the error occurred.
        path: String,
        /// Error message.
        message: String,
    },
}

impl PathError {
    /// Create an IoError from std::io::Error.
    ///
    /// # Arguments
    /// * `path` - Path where the error occurred
    /// * `err` - The underlying IO error
    pub fn from_io(path: impl Into<String>, err: std::io::Error) -> Self {
        Self::IoError {
            path: path.into(),
            message: err.to_string(),
        }
    }
}
