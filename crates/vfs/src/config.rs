//! Mount-time configuration.

use arcfs_common::DEFAULT_BLOCK_SIZE;

/// Configuration for one mount.
///
/// # Example
///
/// ```ignore
/// let config = MountConfig::default()
///     .with_quiet(true)
///     .with_owner(1000, 1000);
/// ```
#[derive(Debug, Clone)]
pub struct MountConfig {
    /// Suppress progress output.
    pub quiet: bool,
    /// Replace pathnames with a placeholder in log messages.
    pub redact: bool,
    /// Owner reported for every served file.
    pub uid: u32,
    /// Group reported for every served file.
    pub gid: u32,
    /// Buffered-read capacity for the archive decoders.
    pub block_size: usize,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            quiet: false,
            redact: false,
            uid: unsafe { libc::getuid() },
            gid: unsafe { libc::getgid() },
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

impl MountConfig {
    /// Set quiet mode.
    pub fn with_quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    /// Set log redaction.
    pub fn with_redact(mut self, redact: bool) -> Self {
        self.redact = redact;
        self
    }

    /// Override the reported owner.
    ///
    /// # Arguments
    /// * `uid` - User id for every served file
    /// * `gid` - Group id for every served file
    pub fn with_owner(mut self, uid: u32, gid: u32) -> Self {
        self.uid = uid;
        self.gid = gid;
        self
    }

    /// Override the decoder block size.
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }
}
