//! Error types for archive decoding.

use arcfs_common::ExitCode;
use thiserror::Error;

/// Errors produced while opening or reading an archive.
///
/// The passphrase-related variants keep the message prefixes that
/// wrapper tooling greps for ("Incorrect passphrase", "Passphrase
/// required", "Encryption is not supported").
#[derive(Debug, Error)]
pub enum CodecError {
    /// Underlying file IO failed.
    #[error("could not read archive file: {0}")]
    Io(#[from] std::io::Error),

    /// The archive data does not parse as the detected format.
    #[error("invalid {format} archive: {detail}")]
    Malformed {
        /// Short format name ("tar", "zip", "gzip", ...).
        format: &'static str,
        /// What failed to parse.
        detail: String,
    },

    /// A recognised but unsupported container format (7z, rar).
    #[error("unsupported archive format: {0}")]
    UnsupportedFormat(&'static str),

    /// An encrypted entry was found and no passphrase is available.
    #[error("Passphrase required for this entry")]
    PassphraseRequired,

    /// The supplied passphrase failed the entry's verification check.
    #[error("Incorrect passphrase")]
    PassphraseIncorrect,

    /// The entry uses an encryption scheme this build cannot decrypt.
    #[error("Encryption is not supported: {0}")]
    EncryptionUnsupported(&'static str),
}

impl CodecError {
    /// Shorthand for a malformed-data error.
    pub(crate) fn malformed(format: &'static str, detail: impl Into<String>) -> Self {
        Self::Malformed {
            format,
            detail: detail.into(),
        }
    }
}

/// Map a decode error onto the process exit code the mount binary
/// reports when bootstrap fails.
///
/// The original string-prefix classification collapses into a match on
/// the typed variants; everything that is not an encryption problem is
/// invalid contents.
pub fn classify_exit_code(err: &CodecError) -> ExitCode {
    match err {
        CodecError::PassphraseIncorrect => ExitCode::PassphraseIncorrect,
        CodecError::PassphraseRequired => ExitCode::PassphraseRequired,
        CodecError::EncryptionUnsupported(_) => ExitCode::EncryptionUnsupported,
        _ => ExitCode::InvalidArchiveContents,
    }
}
