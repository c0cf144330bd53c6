//! A positioned decompression stream.
//!
//! A `Reader` bundles one codec stream with its position: the entry it
//! is parked on and a byte offset into that entry's decompressed
//! contents. Positions only ever advance. Moving backwards is done by
//! swapping in a different reader, never by rewinding this one.

use std::sync::Arc;

use arcfs_common::{Redactor, SIDE_BUFFER_LEN};
use arcfs_codec::ArchiveReader;

use crate::side_buffer::SideBufferPool;

pub struct Reader {
    stream: ArchiveReader,
    index_within_archive: i64,
    offset_within_entry: i64,
    archive_name: Arc<str>,
    redactor: Redactor,
}

impl Reader {
    /// Wrap a freshly opened stream, positioned before the first entry.
    pub fn new(stream: ArchiveReader, archive_name: Arc<str>, redactor: Redactor) -> Self {
        Self {
            stream,
            index_within_archive: -1,
            offset_within_entry: 0,
            archive_name,
            redactor,
        }
    }

    /// Ordinal of the entry this reader is parked on; -1 before the
    /// first header advance.
    pub fn index(&self) -> i64 {
        self.index_within_archive
    }

    /// Byte offset into the current entry's decompressed contents.
    pub fn offset(&self) -> i64 {
        self.offset_within_entry
    }

    /// Walk forward until positioned at the `want`th entry. Advancing
    /// to a new entry resets the offset to zero.
    ///
    /// # Returns
    /// `false` on failure: a decode error, or the archive ending before
    /// the target (the tree promised an entry the archive no longer
    /// has).
    pub fn advance_index(&mut self, want: i64) -> bool {
        while self.index_within_archive < want {
            match self.stream.next_header() {
                Ok(Some(_)) => {
                    self.index_within_archive += 1;
                    self.offset_within_entry = 0;
                }
                Ok(None) => {
                    tracing::error!(
                        "inconsistent archive {}",
                        self.redactor.path(&self.archive_name)
                    );
                    return false;
                }
                Err(e) => {
                    tracing::error!(
                        "invalid archive {}: {}",
                        self.redactor.path(&self.archive_name),
                        e
                    );
                    return false;
                }
            }
        }
        true
    }

    /// Walk forward until positioned at the `want`th byte offset,
    /// decompressing the skipped bytes into an acquired side buffer.
    ///
    /// A backwards target fails deterministically; callers recover by
    /// swapping in a reader positioned earlier.
    ///
    /// # Arguments
    /// * `want` - Target offset in decompressed space
    /// * `pool` - Side buffer pool; the skipped bytes are recorded here
    ///   so later out-of-order reads can hit them
    /// * `pathname` - Entry path, for log messages
    pub fn advance_offset(&mut self, want: i64, pool: &mut SideBufferPool, pathname: &str) -> bool {
        if want < self.offset_within_entry {
            // This stream cannot walk backwards.
            return false;
        }
        if want == self.offset_within_entry {
            return true;
        }

        let buffer: usize = pool.acquire();
        while want > self.offset_within_entry {
            let original_offset: i64 = self.offset_within_entry;
            let mut dst_len: i64 = want - original_offset;
            // When the advance spans multiple buffer fills, read the
            // non-multiple remainder first so the final fill is a full
            // buffer aligned with the position just reached. Advancing
            // 260 KiB with 128 KiB buffers reads 4+128+128, not
            // 128+128+4, leaving the most useful bytes cached.
            if dst_len > SIDE_BUFFER_LEN as i64 {
                dst_len %= SIDE_BUFFER_LEN as i64;
                if dst_len == 0 {
                    dst_len = SIDE_BUFFER_LEN as i64;
                }
            }

            let n: usize = {
                let dst: &mut [u8] = &mut pool.buffer_mut(buffer)[..dst_len as usize];
                match self.read(dst, pathname) {
                    Ok(0) | Err(_) => {
                        pool.invalidate(buffer);
                        return false;
                    }
                    Ok(n) => n,
                }
            };
            pool.record(buffer, self.index_within_archive, original_offset, n as i64);
        }
        true
    }

    /// Copy decompressed bytes of the current entry into `dst`,
    /// advancing the offset by the amount read.
    ///
    /// # Returns
    /// The byte count (possibly short), or a negated-errno-style error
    /// value for the FUSE reply.
    pub fn read(&mut self, dst: &mut [u8], pathname: &str) -> Result<usize, i32> {
        match self.stream.read_data(dst) {
            Ok(n) => {
                if n > dst.len() {
                    tracing::error!(
                        "too much data serving {} from {}",
                        self.redactor.path(pathname),
                        self.redactor.path(&self.archive_name)
                    );
                    // A decoder overrunning the destination cannot be
                    // recovered from safely.
                    std::process::abort();
                }
                self.offset_within_entry += n as i64;
                Ok(n)
            }
            Err(e) => {
                tracing::error!(
                    "could not serve {} from {}: {}",
                    self.redactor.path(pathname),
                    self.redactor.path(&self.archive_name),
                    e
                );
                Err(libc::EIO)
            }
        }
    }

    /// Exchange two readers field-for-field.
    ///
    /// The read path uses this to recover from backward seeks without
    /// changing the identity of the reader owned by an open file
    /// handle.
    pub fn swap(a: &mut Reader, b: &mut Reader) {
        std::mem::swap(a, b);
    }
}
