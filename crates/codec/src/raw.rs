//! Raw single-stream archives.
//!
//! A compressed file without a container (a bare `.gz`, `.bz2` or `.xz`)
//! is presented as an implicit archive holding exactly one entry. The
//! compression formats record no decompressed size, so the entry reports
//! its size as unknown and bootstrap measures it by draining the stream.

use std::io::Read;

use crate::entry::{EntryKind, EntryMetadata};
use crate::error::CodecError;

/// Default entry name for a raw archive. Callers substitute the archive
/// filename's stem before building the tree.
pub const RAW_ENTRY_NAME: &str = "data";

/// The implicit single-entry archive over a decompressed stream.
pub struct RawStream {
    stream: Box<dyn Read + Send>,
    mtime: i64,
    header_emitted: bool,
}

impl RawStream {
    /// # Arguments
    /// * `stream` - The fully decompressed stream
    /// * `mtime` - Modification time of the archive file, used as the
    ///   entry's mtime since the stream has none of its own
    pub fn new(stream: Box<dyn Read + Send>, mtime: i64) -> Self {
        Self {
            stream,
            mtime,
            header_emitted: false,
        }
    }

    pub fn next_header(&mut self) -> Result<Option<EntryMetadata>, CodecError> {
        if self.header_emitted {
            return Ok(None);
        }
        self.header_emitted = true;
        Ok(Some(EntryMetadata {
            pathname: Some(RAW_ENTRY_NAME.to_string()),
            pathname_raw: RAW_ENTRY_NAME.as_bytes().to_vec(),
            kind: EntryKind::Regular,
            mode: 0o644,
            mtime: self.mtime,
            size: None,
            symlink_target: None,
            encrypted: false,
        }))
    }

    pub fn read_data(&mut self, dst: &mut [u8]) -> Result<usize, CodecError> {
        if !self.header_emitted {
            return Ok(0);
        }
        Ok(self.stream.read(dst)?)
    }
}
