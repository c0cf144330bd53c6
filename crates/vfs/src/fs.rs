//! The read-path orchestrator and its FUSE binding.
//!
//! `ArchiveFs` owns everything serving needs: the immutable tree, the
//! side-buffer pool, the warm-reader cache, and the table of readers
//! belonging to open file handles. The `fuser::Filesystem` impl is a
//! thin translation layer over the engine methods, which take and
//! return plain values so the whole read path is testable without a
//! kernel mount.

use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fuser::{
    FileAttr, FileType, Filesystem, KernelConfig, ReplyAttr, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, Request,
};

use arcfs_common::{NAME_MAX, STAT_BLOCK_SIZE};

use crate::bootstrap::BuiltTree;
use crate::config::MountConfig;
use crate::reader::Reader;
use crate::reader_cache::ReaderCache;
use crate::side_buffer::SideBufferPool;
use crate::tree::{NodeId, Tree, ROOT_NODE};

/// Attribute TTL handed to the kernel. The tree never changes, but a
/// short TTL keeps behavior boring if the archive file is replaced
/// under a live mount.
const TTL: Duration = Duration::from_secs(1);

const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;
const S_IFDIR: u32 = 0o040000;

/// The mounted archive engine.
pub struct ArchiveFs {
    tree: Tree,
    side_buffers: SideBufferPool,
    readers: ReaderCache,
    /// Readers owned by open file handles, keyed by handle id.
    handles: HashMap<u64, Reader>,
    next_fh: u64,
    uid: u32,
    gid: u32,
}

impl ArchiveFs {
    /// Assemble the engine from a completed bootstrap.
    pub fn new(built: BuiltTree, readers: ReaderCache, config: &MountConfig) -> Self {
        Self {
            tree: built.tree,
            side_buffers: built.pool,
            readers,
            handles: HashMap::new(),
            next_fh: 1,
            uid: config.uid,
            gid: config.gid,
        }
    }

    /// The served tree (tests and statistics).
    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    fn node_by_ino(&self, ino: u64) -> Option<NodeId> {
        let id: usize = (ino.checked_sub(1)?) as usize;
        if id < self.tree.node_count() {
            Some(id)
        } else {
            None
        }
    }

    fn file_type(mode: u32) -> FileType {
        match mode & S_IFMT {
            S_IFDIR => FileType::Directory,
            S_IFLNK => FileType::Symlink,
            _ => FileType::RegularFile,
        }
    }

    fn attr(&self, id: NodeId) -> FileAttr {
        let node = self.tree.node(id);
        let mtime: SystemTime = system_time_from_secs(node.mtime);
        FileAttr {
            ino: id as u64 + 1,
            size: node.size.max(0) as u64,
            blocks: node.block_count().max(0) as u64,
            atime: mtime,
            mtime,
            ctime: mtime,
            crtime: UNIX_EPOCH,
            kind: Self::file_type(node.mode),
            perm: (node.mode & 0o7777) as u16,
            nlink: 1,
            uid: self.uid,
            gid: self.gid,
            rdev: 0,
            blksize: STAT_BLOCK_SIZE as u32,
            flags: 0,
        }
    }

    /// `lookup`: resolve a name within a directory.
    pub fn lookup_node(&self, parent_ino: u64, name: &str) -> Result<FileAttr, i32> {
        let parent: NodeId = self.node_by_ino(parent_ino).ok_or(libc::ENOENT)?;
        if !self.tree.node(parent).is_dir() {
            return Err(libc::ENOTDIR);
        }
        let target: NodeId = match name {
            "." => parent,
            ".." => self.tree.node(parent).parent.unwrap_or(ROOT_NODE),
            _ => self.tree.lookup_child(parent, name).ok_or(libc::ENOENT)?,
        };
        Ok(self.attr(target))
    }

    /// `getattr` by inode.
    pub fn getattr_ino(&self, ino: u64) -> Result<FileAttr, i32> {
        let id: NodeId = self.node_by_ino(ino).ok_or(libc::ENOENT)?;
        Ok(self.attr(id))
    }

    /// `readlink`: the symlink target bytes.
    pub fn readlink_ino(&self, ino: u64) -> Result<&[u8], i32> {
        let id: NodeId = self.node_by_ino(ino).ok_or(libc::ENOENT)?;
        match self.tree.node(id).symlink.as_deref() {
            Some(target) => Ok(target.as_bytes()),
            None => Err(libc::ENOLINK),
        }
    }

    /// `open`: position a reader at the node's archive entry and stash
    /// it under a fresh handle id.
    pub fn open_ino(&mut self, ino: u64, flags: i32) -> Result<u64, i32> {
        let id: NodeId = self.node_by_ino(ino).ok_or(libc::ENOENT)?;
        let node = self.tree.node(id);
        if node.is_dir() {
            return Err(libc::EISDIR);
        }
        if node.index_within_archive < 0 {
            return Err(libc::EIO);
        }
        if flags & libc::O_ACCMODE != libc::O_RDONLY {
            return Err(libc::EACCES);
        }

        let reader: Reader = self
            .readers
            .acquire(node.index_within_archive)
            .ok_or(libc::EIO)?;
        let fh: u64 = self.next_fh;
        self.next_fh += 1;
        self.handles.insert(fh, reader);
        Ok(fh)
    }

    /// `read`: serve decompressed bytes at an arbitrary offset.
    ///
    /// Order of preference: a side-buffer hit (no decompression at
    /// all); the handle's own reader, swapped for an earlier-positioned
    /// one first if the request is behind it; then a forward walk to
    /// the offset.
    pub fn read_fh(&mut self, fh: u64, offset: i64, size: u32) -> Result<Vec<u8>, i32> {
        if offset < 0 || size as u64 > i32::MAX as u64 {
            return Err(libc::EINVAL);
        }

        let reader: &mut Reader = self.handles.get_mut(&fh).ok_or(libc::EIO)?;
        let index: i64 = reader.index();
        let node_id: NodeId = self.tree.lookup_index(index).ok_or(libc::EIO)?;
        let node = self.tree.node(node_id);
        if node.size < 0 {
            return Err(libc::EIO);
        }
        if offset >= node.size {
            return Ok(Vec::new());
        }

        let len: usize = (size as i64).min(node.size - offset) as usize;
        if len == 0 {
            return Ok(Vec::new());
        }
        let mut dst: Vec<u8> = vec![0u8; len];

        if self.side_buffers.read_from(index, offset, &mut dst) {
            return Ok(dst);
        }

        let pathname: String = self.tree.path_of(node_id);

        if offset < reader.offset() {
            // This reader is already past the requested offset and can
            // only walk forward. Swap in a predecessor from the cache,
            // keeping the handle's reader identity intact, and give the
            // overshot state back to the cache.
            let mut replacement: Reader = self.readers.acquire(index).ok_or(libc::EIO)?;
            Reader::swap(reader, &mut replacement);
            self.readers.release(replacement);
        }

        if !reader.advance_offset(offset, &mut self.side_buffers, &pathname) {
            return Err(libc::EIO);
        }

        let n: usize = reader.read(&mut dst, &pathname)?;
        dst.truncate(n);
        Ok(dst)
    }

    /// `release`: park the handle's reader back in the cache.
    pub fn release_fh(&mut self, fh: u64) -> Result<(), i32> {
        let reader: Reader = self.handles.remove(&fh).ok_or(libc::EIO)?;
        self.readers.release(reader);
        Ok(())
    }

    /// `readdir`: `.`, `..`, then children in insertion order.
    pub fn readdir_ino(&self, ino: u64) -> Result<Vec<(u64, FileType, String)>, i32> {
        let id: NodeId = self.node_by_ino(ino).ok_or(libc::ENOENT)?;
        let node = self.tree.node(id);
        if !node.is_dir() {
            return Err(libc::ENOTDIR);
        }

        let parent_ino: u64 = node.parent.unwrap_or(ROOT_NODE) as u64 + 1;
        let mut entries: Vec<(u64, FileType, String)> = vec![
            (ino, FileType::Directory, ".".to_string()),
            (parent_ino, FileType::Directory, "..".to_string()),
        ];
        for child in self.tree.children(id) {
            let child_node = self.tree.node(child);
            entries.push((
                child as u64 + 1,
                Self::file_type(child_node.mode),
                child_node.rel_name.clone(),
            ));
        }
        Ok(entries)
    }

    /// `statfs` numbers: total stat blocks and named entries.
    pub fn statfs_parts(&self) -> (u64, u64) {
        (self.tree.block_count(), self.tree.name_count() as u64)
    }
}

impl Filesystem for ArchiveFs {
    fn init(&mut self, _req: &Request<'_>, _config: &mut KernelConfig) -> Result<(), libc::c_int> {
        Ok(())
    }

    fn destroy(&mut self) {}

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &std::ffi::OsStr, reply: ReplyEntry) {
        let name: &str = match name.to_str() {
            Some(name) => name,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };
        match self.lookup_node(parent, name) {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            Err(errno) => reply.error(errno),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyAttr) {
        match self.getattr_ino(ino) {
            Ok(attr) => reply.attr(&TTL, &attr),
            Err(errno) => reply.error(errno),
        }
    }

    fn readlink(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyData) {
        match self.readlink_ino(ino) {
            Ok(target) => reply.data(target),
            Err(errno) => reply.error(errno),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        match self.open_ino(ino, flags) {
            // The decoded content is deterministic, so the kernel may
            // keep its page cache across opens.
            Ok(fh) => reply.opened(fh, fuser::consts::FOPEN_KEEP_CACHE),
            Err(errno) => reply.error(errno),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn read(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        match self.read_fh(fh, offset, size) {
            Ok(data) => reply.data(&data),
            Err(errno) => reply.error(errno),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        match self.release_fh(fh) {
            Ok(()) => reply.ok(),
            Err(errno) => reply.error(errno),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let entries: Vec<(u64, FileType, String)> = match self.readdir_ino(ino) {
            Ok(entries) => entries,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        for (i, (entry_ino, kind, name)) in entries.iter().enumerate().skip(offset as usize) {
            if reply.add(*entry_ino, (i + 1) as i64, *kind, name) {
                break;
            }
        }
        reply.ok();
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        let (blocks, files): (u64, u64) = self.statfs_parts();
        reply.statfs(
            blocks,
            0,
            0,
            files,
            0,
            STAT_BLOCK_SIZE as u32,
            NAME_MAX,
            STAT_BLOCK_SIZE as u32,
        );
    }
}

fn system_time_from_secs(secs: i64) -> SystemTime {
    if secs >= 0 {
        UNIX_EPOCH + Duration::from_secs(secs as u64)
    } else {
        UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs())
    }
}

