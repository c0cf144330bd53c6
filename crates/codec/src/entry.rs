//! Archive entry metadata.

use std::borrow::Cow;

/// File-type of an archive entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Regular,
    Directory,
    Symlink,
    Hardlink,
    Fifo,
    Socket,
    CharDevice,
    BlockDevice,
}

impl EntryKind {
    pub fn is_directory(self) -> bool {
        self == EntryKind::Directory
    }

    pub fn is_symlink(self) -> bool {
        self == EntryKind::Symlink
    }

    /// Whether the virtual tree can represent this kind at all.
    /// Device nodes, fifos and sockets are rejected during bootstrap.
    pub fn is_mountable(self) -> bool {
        matches!(
            self,
            EntryKind::Regular | EntryKind::Directory | EntryKind::Symlink
        )
    }
}

/// Metadata for one archive entry, produced by `next_header`.
#[derive(Debug, Clone)]
pub struct EntryMetadata {
    /// Pathname when it is valid UTF-8.
    pub pathname: Option<String>,
    /// Raw pathname bytes, always present.
    pub pathname_raw: Vec<u8>,
    /// Entry file-type.
    pub kind: EntryKind,
    /// Permission bits (no file-type bits).
    pub mode: u32,
    /// Modification time, seconds since the epoch.
    pub mtime: i64,
    /// Decompressed size when the format records it ("size is set").
    /// Raw archives carry no table of contents, so their single entry
    /// reports `None` and must be drained to measure.
    pub size: Option<u64>,
    /// Symlink target, non-empty only for `EntryKind::Symlink`.
    pub symlink_target: Option<String>,
    /// Whether the entry payload is encrypted.
    pub encrypted: bool,
}

impl EntryMetadata {
    /// Pathname for tree building and log messages: the UTF-8 name when
    /// available, the raw bytes lossily decoded otherwise.
    pub fn display_pathname(&self) -> Cow<'_, str> {
        match &self.pathname {
            Some(name) => Cow::Borrowed(name.as_str()),
            None => String::from_utf8_lossy(&self.pathname_raw),
        }
    }
}
