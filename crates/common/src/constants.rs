//! Shared constants used across arcfs crates.

/// Read block size handed to the archive decoders (16 KiB).
pub const DEFAULT_BLOCK_SIZE: usize = 16384;

/// Number of side buffers in the pool.
pub const SIDE_BUFFER_COUNT: usize = 8;

/// Length of each side buffer (128 KiB).
/// This matches the largest read size observed from the kernel on a
/// default Linux FUSE mount, so one full side buffer can satisfy a whole
/// readahead request.
pub const SIDE_BUFFER_LEN: usize = 131072;

/// Number of warm readers kept in the reader cache.
pub const SAVED_READER_COUNT: usize = 8;

/// Block size reported through stat and statfs.
pub const STAT_BLOCK_SIZE: u64 = 512;

/// Maximum file name length reported through statfs.
pub const NAME_MAX: u32 = 255;
