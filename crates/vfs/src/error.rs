//! Error types for the engine crate.

use std::fmt;

use arcfs_common::ExitCode;

/// A fatal bootstrap failure, carrying the exit code the mount binary
/// reports. Serving-time problems never produce this type; they are
/// translated to per-request errno values instead.
#[derive(Debug)]
pub struct BootstrapError {
    /// Exit code for the process.
    pub exit_code: ExitCode,
    /// Human-readable cause, already redacted where required.
    pub message: String,
}

impl BootstrapError {
    pub fn new(exit_code: ExitCode, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }
}

impl fmt::Display for BootstrapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for BootstrapError {}
