//! Shared types and utilities for arcfs.
//!
//! This crate provides common functionality used across all arcfs crates:
//! - Archive entry pathname validation and stem derivation
//! - Exit codes for the mount binary
//! - Log redaction for user-supplied pathnames
//! - Bootstrap progress reporting
//! - Shared constants and error types

pub mod constants;
pub mod error;
pub mod exit_code;
pub mod path;
pub mod progress;
pub mod redact;

// Re-export commonly used items at crate root
pub use constants::*;
pub use error::PathError;
pub use exit_code::ExitCode;
pub use path::{innername, normalize_pathname, valid_pathname};
pub use progress::{LoadingProgress, NoOpProgress, ProgressSink};
pub use redact::Redactor;
