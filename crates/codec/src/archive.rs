//! The archive reader facade.
//!
//! `ArchiveReader::open` detects what the file is (container format plus
//! compression filter chain) and dispatches to the matching backend.
//! Every open produces an independent stream over its own file handle,
//! positioned before the first entry.

use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use arcfs_common::{ProgressSink, DEFAULT_BLOCK_SIZE};

use crate::detect::{is_zip_magic, looks_like_tar, sniff_unsupported, Filter, Format};
use crate::entry::EntryMetadata;
use crate::error::CodecError;
use crate::filter::detect_chain;
use crate::passphrase::{PassphraseProvider, SharedPassphrase};
use crate::raw::RawStream;
use crate::source::TrackedFile;
use crate::tar::TarStream;
use crate::zip::ZipStream;

/// How to open an archive. One value is built at startup and reused for
/// every reader opened over the same archive, so all readers share the
/// canonical path, the block size and the captured passphrase.
#[derive(Clone)]
pub struct OpenOptions {
    /// Canonical absolute path of the archive file. The working
    /// directory can change after mounting, so relative paths must be
    /// resolved before this is built.
    pub archive_path: PathBuf,
    /// Buffered-read capacity handed to the decoders.
    pub block_size: usize,
    /// Passphrase provider shared across all readers.
    pub passphrase: SharedPassphrase,
    /// Optional shared counter of raw bytes read from the archive file.
    pub read_counter: Option<Arc<AtomicU64>>,
}

impl OpenOptions {
    pub fn new(archive_path: impl Into<PathBuf>) -> Self {
        Self {
            archive_path: archive_path.into(),
            block_size: DEFAULT_BLOCK_SIZE,
            passphrase: PassphraseProvider::none().shared(),
            read_counter: None,
        }
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_passphrase(mut self, passphrase: SharedPassphrase) -> Self {
        self.passphrase = passphrase;
        self
    }

    pub fn with_read_counter(mut self, counter: Arc<AtomicU64>) -> Self {
        self.read_counter = Some(counter);
        self
    }
}

enum Backend {
    Tar(TarStream),
    Zip(ZipStream),
    Raw(RawStream),
}

/// One independent decoding stream over the archive.
pub struct ArchiveReader {
    backend: Backend,
    format: Format,
    filters: Vec<Filter>,
}

impl ArchiveReader {
    /// Open the archive without progress reporting (serve-time readers).
    pub fn open(options: &OpenOptions) -> Result<Self, CodecError> {
        Self::open_with_progress(options, None)
    }

    /// Open the archive, optionally wiring a progress sink into the
    /// file reads (the bootstrap pass).
    pub fn open_with_progress(
        options: &OpenOptions,
        progress: Option<Box<dyn ProgressSink + Send>>,
    ) -> Result<Self, CodecError> {
        let mut file: TrackedFile = TrackedFile::open(
            &options.archive_path,
            progress,
            options.read_counter.clone(),
        )?;
        let raw_mtime: i64 = file.file_mtime().unwrap_or(0);

        // Sniff the outermost bytes straight off the file.
        let mut head = [0u8; 512];
        let mut filled: usize = 0;
        while filled < head.len() {
            let n: usize = file.read(&mut head[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        file.seek(SeekFrom::Start(0))?;

        if let Some(name) = sniff_unsupported(&head[..filled]) {
            return Err(CodecError::UnsupportedFormat(name));
        }

        if is_zip_magic(&head[..filled]) {
            let stream: ZipStream =
                ZipStream::open(file, options.passphrase.clone(), options.block_size)?;
            return Ok(Self {
                backend: Backend::Zip(stream),
                format: Format::Zip,
                filters: Vec::new(),
            });
        }

        // Everything else is a (possibly empty) filter chain over tar,
        // or raw data.
        let source: Box<dyn Read + Send> =
            Box::new(BufReader::with_capacity(options.block_size, file));
        let (peek, filters) = detect_chain(source)?;
        let inner_head: Vec<u8> = peek.peeked().to_vec();
        let stream: Box<dyn Read + Send> = Box::new(peek);

        if let Some(name) = sniff_unsupported(&inner_head) {
            return Err(CodecError::UnsupportedFormat(name));
        }

        if looks_like_tar(&inner_head) {
            return Ok(Self {
                backend: Backend::Tar(TarStream::new(stream)),
                format: Format::Tar,
                filters,
            });
        }

        if is_zip_magic(&inner_head) && !filters.is_empty() {
            // A zip wrapped in a compression filter cannot be driven
            // from its central directory without seeking; serve the
            // inner zip file itself as the raw entry.
            tracing::debug!("zip container behind a compression filter, serving as raw");
        }

        Ok(Self {
            backend: Backend::Raw(RawStream::new(stream, raw_mtime)),
            format: Format::Raw,
            filters,
        })
    }

    /// Advance to the next entry header.
    ///
    /// # Returns
    /// `None` at end of archive. Whatever remained unread of the
    /// previous entry is skipped.
    pub fn next_header(&mut self) -> Result<Option<EntryMetadata>, CodecError> {
        match &mut self.backend {
            Backend::Tar(s) => s.next_header(),
            Backend::Zip(s) => s.next_header(),
            Backend::Raw(s) => s.next_header(),
        }
    }

    /// Read decompressed bytes of the current entry, strictly forward.
    pub fn read_data(&mut self, dst: &mut [u8]) -> Result<usize, CodecError> {
        match &mut self.backend {
            Backend::Tar(s) => s.read_data(dst),
            Backend::Zip(s) => s.read_data(dst),
            Backend::Raw(s) => s.read_data(dst),
        }
    }

    /// The detected container format.
    pub fn format(&self) -> Format {
        self.format
    }

    /// The compression filters in front of the container, outermost
    /// first. Empty for uncompressed containers and for arbitrary
    /// binary files, which is how callers reject non-archives.
    pub fn filter_chain(&self) -> &[Filter] {
        &self.filters
    }
}
