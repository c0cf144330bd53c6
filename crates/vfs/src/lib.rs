//! Read-only FUSE engine serving archive contents.
//!
//! This crate mounts the contents of one archive file as a read-only
//! filesystem. A single bootstrap pass over the archive builds an
//! immutable directory tree; after that, reads are served by walking
//! forward-only decompression streams, kept warm across file handles.
//!
//! # Architecture
//!
//! ```text
//! Layer 3: FUSE interface (fuser::Filesystem impl on ArchiveFs)
//! Layer 2: read path (reader cache, side-buffer cache, swap-in-place)
//! Layer 1: primitives (Tree, Reader, SideBufferPool, arcfs-codec)
//! ```
//!
//! The engine is single-threaded by design: the FUSE session is run
//! with one thread, every handler takes `&mut self`, and no state needs
//! a lock.

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod fs;
pub mod reader;
pub mod reader_cache;
pub mod side_buffer;
pub mod tree;

pub use bootstrap::{BuiltTree, Probe};
pub use config::MountConfig;
pub use error::BootstrapError;
pub use fs::ArchiveFs;
pub use reader::Reader;
pub use reader_cache::ReaderCache;
pub use side_buffer::SideBufferPool;
pub use tree::{Node, NodeId, Tree, ROOT_NODE};
