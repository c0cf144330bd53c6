//! The one-time pass that turns an archive into a directory tree.
//!
//! Bootstrap runs in two phases with a deliberate pause in between, so
//! the caller can create the mount point after the archive is known to
//! be sound but before the (possibly long) full scan:
//!
//! - **Probe** opens the archive, finds the first non-directory entry,
//!   rejects raw files with no real decompression filter, and touches
//!   one byte of data to surface passphrase problems early.
//! - **Build** inserts every remaining entry into the tree, then drops
//!   the scan stream and its file handle. Serving readers open their
//!   own handles afterwards.

use std::sync::{Arc, Mutex};

use arcfs_common::{
    normalize_pathname, ExitCode, LoadingProgress, PathError, ProgressSink, Redactor,
};
use arcfs_codec::raw::RAW_ENTRY_NAME;
use arcfs_codec::{classify_exit_code, ArchiveReader, CodecError, EntryMetadata, Format, OpenOptions};

use crate::config::MountConfig;
use crate::error::BootstrapError;
use crate::side_buffer::{SideBufferPool, DRAIN_SCRATCH};
use crate::tree::Tree;

/// Progress sink that forwards into a shared `LoadingProgress`, so the
/// bootstrap can still clear the progress line after the scan stream
/// (which owns the sink) is gone.
struct SharedSink(Arc<Mutex<LoadingProgress>>);

impl ProgressSink for SharedSink {
    fn on_progress(&mut self, position_hwm: u64) {
        if let Ok(mut progress) = self.0.lock() {
            progress.on_progress(position_hwm);
        }
    }
}

/// Result of the probe phase, ready to build the tree.
pub struct Probe {
    stream: ArchiveReader,
    pool: SideBufferPool,
    /// The first non-directory entry, already read past its header.
    pending: Option<(EntryMetadata, i64)>,
    /// Ordinal of the last header read.
    last_index: i64,
    progress: Arc<Mutex<LoadingProgress>>,
    innername: String,
    archive_name: Arc<str>,
    redactor: Redactor,
}

/// The outcome of a completed bootstrap.
pub struct BuiltTree {
    pub tree: Tree,
    pub pool: SideBufferPool,
}

impl Probe {
    /// Phase one: open and probe the archive.
    ///
    /// # Arguments
    /// * `options` - Shared open options (canonical path, passphrase)
    /// * `archive_name` - Archive name as given on the command line
    /// * `innername` - Archive filename stem, served as the name of a
    ///   raw archive's single entry
    /// * `config` - Mount configuration (quiet and redaction matter
    ///   here)
    pub fn run(
        options: &OpenOptions,
        archive_name: Arc<str>,
        innername: String,
        config: &MountConfig,
    ) -> Result<Probe, BootstrapError> {
        let quiet: bool = config.quiet;
        let redactor: Redactor = Redactor::new(config.redact);
        let file_size: u64 = std::fs::metadata(&options.archive_path)
            .map(|m| m.len())
            .map_err(|e| {
                BootstrapError::new(
                    ExitCode::CannotOpenArchive,
                    format!("could not open {}: {}", redactor.path(&archive_name), e),
                )
            })?;

        let progress: Arc<Mutex<LoadingProgress>> =
            Arc::new(Mutex::new(LoadingProgress::new(file_size, quiet)));
        let sink: SharedSink = SharedSink(progress.clone());

        let mut stream: ArchiveReader =
            ArchiveReader::open_with_progress(options, Some(Box::new(sink))).map_err(|e| {
                let exit_code: ExitCode = match &e {
                    CodecError::Io(_) => ExitCode::CannotOpenArchive,
                    _ => ExitCode::InvalidArchiveHeader,
                };
                BootstrapError::new(
                    exit_code,
                    format!("could not open {}: {}", redactor.path(&archive_name), e),
                )
            })?;

        // Find the first non-directory entry. An archive with none at
        // all is legal; the tree will hold only the root.
        let mut pool: SideBufferPool = SideBufferPool::new();
        let mut last_index: i64 = -1;
        let pending: Option<(EntryMetadata, i64)> = loop {
            match stream.next_header() {
                Ok(Some(meta)) => {
                    last_index += 1;
                    if meta.kind.is_directory() {
                        continue;
                    }
                    break Some((meta, last_index));
                }
                Ok(None) => break None,
                Err(e) => return Err(header_error(e, &archive_name, redactor)),
            }
        };

        if stream.format() == Format::Raw {
            // Without at least one real decompression filter this is
            // arbitrary binary data, not something to mount.
            if stream.filter_chain().is_empty() {
                return Err(BootstrapError::new(
                    ExitCode::InvalidRawArchive,
                    format!("invalid raw archive: {}", redactor.path(&archive_name)),
                ));
            }
        } else if pending.is_some() {
            // Reading one byte of the first entry reveals whether a
            // passphrase is needed, and whether the supplied one works.
            let scratch: &mut [u8] = pool.buffer_mut(DRAIN_SCRATCH);
            if let Err(e) = stream.read_data(&mut scratch[..1]) {
                let exit_code: ExitCode = classify_exit_code(&e);
                return Err(BootstrapError::new(
                    exit_code,
                    format!("{}: {}", redactor.path(&archive_name), e),
                ));
            }
        }

        Ok(Probe {
            stream,
            pool,
            pending,
            last_index,
            progress,
            innername,
            archive_name,
            redactor,
        })
    }

    /// Phase two: scan the remaining headers and build the tree.
    ///
    /// Consumes the probe; the scan stream and its file handle are
    /// dropped before returning, so serving mode starts with no handle
    /// on the archive.
    pub fn build_tree(self) -> Result<BuiltTree, BootstrapError> {
        let Probe {
            mut stream,
            mut pool,
            pending,
            mut last_index,
            progress,
            innername,
            archive_name,
            redactor,
        } = self;

        let raw: bool = stream.format() == Format::Raw;
        let mut tree: Tree = Tree::new();

        if let Some((meta, index)) = pending {
            insert_entry(
                &mut tree, &mut stream, &mut pool, meta, index, raw, &innername, &archive_name,
                redactor,
            )?;
        }

        loop {
            match stream.next_header() {
                Ok(Some(meta)) => {
                    last_index += 1;
                    if meta.kind.is_directory() {
                        continue;
                    }
                    insert_entry(
                        &mut tree, &mut stream, &mut pool, meta, last_index, raw, &innername,
                        &archive_name, redactor,
                    )?;
                }
                Ok(None) => break,
                Err(e) => {
                    return Err(BootstrapError::new(
                        ExitCode::GenericFailure,
                        format!("invalid archive {}: {}", redactor.path(&archive_name), e),
                    ))
                }
            }
        }

        // The scan stream closes here; its archive handle goes with it.
        drop(stream);

        if let Ok(mut progress) = progress.lock() {
            progress.finish();
        }

        Ok(BuiltTree { tree, pool })
    }
}

fn header_error(e: CodecError, archive_name: &str, redactor: Redactor) -> BootstrapError {
    let exit_code: ExitCode = match &e {
        CodecError::PassphraseRequired
        | CodecError::PassphraseIncorrect
        | CodecError::EncryptionUnsupported(_) => classify_exit_code(&e),
        _ => ExitCode::InvalidArchiveHeader,
    };
    BootstrapError::new(
        exit_code,
        format!("invalid archive {}: {}", redactor.path(archive_name), e),
    )
}

/// Insert one non-directory entry into the tree. Per-entry problems
/// (bad pathname, unsupported kind, collision, empty link target) are
/// logged and skipped; only stream-level failures abort the build.
#[allow(clippy::too_many_arguments)]
fn insert_entry(
    tree: &mut Tree,
    stream: &mut ArchiveReader,
    pool: &mut SideBufferPool,
    meta: EntryMetadata,
    index: i64,
    raw: bool,
    innername: &str,
    archive_name: &str,
    redactor: Redactor,
) -> Result<(), BootstrapError> {
    let mut name: String = meta.display_pathname().into_owned();

    // Raw compression formats rarely record the original filename; the
    // decoder reports a placeholder which we replace with the archive
    // filename's stem. "/foo/bar.txt.gz" serves "/bar.txt".
    if raw && name == RAW_ENTRY_NAME && !innername.is_empty() {
        name = innername.to_string();
    }

    let pathname: String = match normalize_pathname(&name) {
        Some(p) => p,
        None => {
            tracing::error!(
                "archive entry in {} has invalid pathname: {}",
                redactor.path(archive_name),
                redactor.path(&name)
            );
            return Ok(());
        }
    };

    if !meta.kind.is_mountable() {
        tracing::error!(
            "irregular file type in {}: {}",
            redactor.path(archive_name),
            redactor.path(&pathname)
        );
        return Ok(());
    }

    let symlink: Option<String> = if meta.kind.is_symlink() {
        match meta.symlink_target.filter(|target| !target.is_empty()) {
            Some(target) => Some(target),
            None => {
                tracing::error!(
                    "empty link in {}: {}",
                    redactor.path(archive_name),
                    redactor.path(&pathname)
                );
                return Ok(());
            }
        }
    } else {
        None
    };

    // Formats without a table of contents don't record the decompressed
    // size up front; measure it by draining the entry through scratch.
    let size: i64 = match meta.size {
        Some(size) => size as i64,
        None => {
            let mut total: i64 = 0;
            loop {
                let scratch: &mut [u8] = pool.buffer_mut(DRAIN_SCRATCH);
                match stream.read_data(scratch) {
                    Ok(0) => break,
                    Ok(n) => total += n as i64,
                    Err(e) => {
                        return Err(BootstrapError::new(
                            ExitCode::GenericFailure,
                            format!(
                                "could not decompress {}: {}",
                                redactor.path(archive_name),
                                e
                            ),
                        ))
                    }
                }
            }
            total
        }
    };

    match tree.insert_leaf(&pathname, symlink, index, size, meta.mtime, meta.mode) {
        Ok(_) => {}
        Err(PathError::Collision { path }) => {
            tracing::warn!("name collision: {}", redactor.path(&path));
        }
        Err(e) => {
            tracing::error!(
                "could not insert entry from {}: {}",
                redactor.path(archive_name),
                e
            );
        }
    }
    Ok(())
}
