//! Process exit codes for the mount binary.

/// Exit codes returned by the arcfs binary.
///
/// These are application exit codes, not library error codes. Wrapper
/// tooling keys off the specific values in the 20s to decide whether to
/// re-prompt for a passphrase, so they are part of the CLI contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    GenericFailure = 1,
    CannotOpenArchive = 11,
    PassphraseRequired = 20,
    PassphraseIncorrect = 21,
    EncryptionUnsupported = 22,
    InvalidRawArchive = 30,
    InvalidArchiveHeader = 31,
    InvalidArchiveContents = 32,
}

impl ExitCode {
    /// Numeric value passed to `std::process::exit`.
    pub fn code(self) -> i32 {
        self as i32
    }
}
