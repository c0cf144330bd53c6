//! Streaming archive decoding for arcfs.
//!
//! This crate turns one archive file into a sequence of entries with
//! forward-only data reads, which is the only access pattern the engine
//! crate relies on:
//!
//! ```text
//! ArchiveReader::open   -> detect filter chain + container format
//! next_header           -> advance to the next entry's metadata
//! read_data             -> stream the current entry's decompressed bytes
//! ```
//!
//! Supported containers are tar (optionally behind a gzip/bzip2/xz filter
//! chain), zip (driven from the central directory, with traditional
//! ZipCrypto decryption), and "raw" single-stream compressions such as a
//! bare `.gz`, which are presented as an implicit archive holding one
//! entry. 7z and rar are recognised by their magic numbers but rejected
//! as unsupported.
//!
//! Opening an archive never seeks backwards inside an entry. Every
//! `ArchiveReader` owns its own file handle, so several readers can be
//! positioned independently over the same archive.

pub mod detect;
pub mod entry;
pub mod error;
pub mod passphrase;
pub mod raw;
pub mod source;
pub mod tar;
pub mod zip;

mod archive;
mod filter;

pub use archive::{ArchiveReader, OpenOptions};
pub use detect::{Filter, Format};
pub use entry::{EntryKind, EntryMetadata};
pub use error::{classify_exit_code, CodecError};
pub use passphrase::{PassphraseProvider, SharedPassphrase};
pub use source::TrackedFile;
