//! Position-tracking archive file access.
//!
//! Every decoder reads the archive through a `TrackedFile`, which owns
//! its file handle, retries interrupted reads, and maintains the read
//! position plus its high-water mark. The high-water mark drives the
//! `Loading P%` progress display during bootstrap and proxies how much
//! of the archive has been processed.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arcfs_common::ProgressSink;

/// A read-only archive file handle with position accounting.
pub struct TrackedFile {
    file: File,
    file_len: u64,
    position: u64,
    position_hwm: u64,
    progress: Option<Box<dyn ProgressSink + Send>>,
    read_counter: Option<Arc<AtomicU64>>,
}

impl TrackedFile {
    /// Open the archive file.
    ///
    /// # Arguments
    /// * `path` - Canonical absolute path of the archive
    /// * `progress` - Optional sink for high-water-mark updates
    /// * `read_counter` - Optional shared counter of bytes read, bumped
    ///   on every read (used to observe decoder effort from tests)
    pub fn open(
        path: &Path,
        progress: Option<Box<dyn ProgressSink + Send>>,
        read_counter: Option<Arc<AtomicU64>>,
    ) -> io::Result<Self> {
        let file: File = File::open(path)?;
        let file_len: u64 = file.metadata()?.len();
        Ok(Self {
            file,
            file_len,
            position: 0,
            position_hwm: 0,
            progress,
            read_counter,
        })
    }

    /// Total size of the archive file in bytes.
    pub fn file_len(&self) -> u64 {
        self.file_len
    }

    /// Modification time of the archive file, seconds since the epoch.
    pub fn file_mtime(&self) -> io::Result<i64> {
        let modified = self.file.metadata()?.modified()?;
        let secs: i64 = match modified.duration_since(std::time::UNIX_EPOCH) {
            Ok(d) => d.as_secs() as i64,
            Err(e) => -(e.duration().as_secs() as i64),
        };
        Ok(secs)
    }

    /// Current read position.
    pub fn position(&self) -> u64 {
        self.position
    }

    fn note_position(&mut self, position: u64) {
        self.position = position;
        if self.position_hwm < position {
            self.position_hwm = position;
            if let Some(sink) = self.progress.as_mut() {
                sink.on_progress(position);
            }
        }
    }
}

impl Read for TrackedFile {
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        loop {
            match self.file.read(dst) {
                Ok(n) => {
                    if let Some(counter) = self.read_counter.as_ref() {
                        counter.fetch_add(n as u64, Ordering::Relaxed);
                    }
                    self.note_position(self.position + n as u64);
                    return Ok(n);
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

impl Seek for TrackedFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let offset: u64 = self.file.seek(pos)?;
        self.note_position(offset);
        Ok(offset)
    }
}

/// Read exactly `dst.len()` bytes, or report a clean end-of-input when
/// zero bytes were available at the boundary.
///
/// # Returns
/// `Ok(true)` when the buffer was filled, `Ok(false)` on a clean EOF
/// before the first byte. A partial fill is an `UnexpectedEof` error.
pub(crate) fn read_exact_or_eof<R: Read + ?Sized>(r: &mut R, dst: &mut [u8]) -> io::Result<bool> {
    let mut off: usize = 0;
    while off < dst.len() {
        let n: usize = r.read(&mut dst[off..])?;
        if n == 0 {
            if off == 0 {
                return Ok(false);
            }
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "truncated archive data",
            ));
        }
        off += n;
    }
    Ok(true)
}

/// Read exactly `dst.len()` bytes; any shortfall is an error.
pub(crate) fn read_exact_n<R: Read + ?Sized>(r: &mut R, dst: &mut [u8]) -> io::Result<()> {
    if !read_exact_or_eof(r, dst)? {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "truncated archive data",
        ));
    }
    Ok(())
}
