//! Side buffers: fixed scratch buffers doubling as a decompressed-byte
//! cache.
//!
//! During bootstrap, buffer 0 is reserved as decompressed-drain scratch
//! (the codec stages compressed input in its own buffers). At serve
//! time all buffers form a small LRU cache of recently decompressed
//! ranges. A reader that must
//! discard bytes to fast-forward writes them into an acquired side
//! buffer; later out-of-order read requests that land inside a cached
//! range are served by a plain copy, without touching a decompressor.
//! Kernel readahead regularly swaps conceptually consecutive reads, so
//! these hits are common even for sequential file access.

use arcfs_common::{SIDE_BUFFER_COUNT, SIDE_BUFFER_LEN};

/// Index of the buffer reserved as drain scratch during bootstrap.
pub const DRAIN_SCRATCH: usize = 0;

/// Cache metadata for one buffer. `index_within_archive == -1` means
/// the buffer holds nothing.
#[derive(Clone, Copy)]
struct SideBufferMetadata {
    index_within_archive: i64,
    offset_within_entry: i64,
    length: i64,
    lru_priority: u64,
}

impl SideBufferMetadata {
    const EMPTY: SideBufferMetadata = SideBufferMetadata {
        index_within_archive: -1,
        offset_within_entry: -1,
        length: -1,
        lru_priority: 0,
    };

    /// Whether this buffer covers `len` bytes at `offset` of the entry
    /// at `index`.
    fn contains(&self, index: i64, offset: i64, len: u64) -> bool {
        if self.index_within_archive >= 0
            && self.index_within_archive == index
            && self.offset_within_entry <= offset
        {
            let delta: i64 = offset - self.offset_within_entry;
            return self.length >= delta && (self.length - delta) as u64 >= len;
        }
        false
    }
}

/// The pool of side buffers.
pub struct SideBufferPool {
    data: Vec<Vec<u8>>,
    meta: Vec<SideBufferMetadata>,
    next_lru_priority: u64,
}

impl SideBufferPool {
    pub fn new() -> Self {
        Self {
            data: (0..SIDE_BUFFER_COUNT)
                .map(|_| vec![0u8; SIDE_BUFFER_LEN])
                .collect(),
            meta: vec![SideBufferMetadata::EMPTY; SIDE_BUFFER_COUNT],
            next_lru_priority: 0,
        }
    }

    /// Evict and return the least recently used buffer.
    ///
    /// The buffer is marked empty and pinned at maximum priority so a
    /// concurrent-looking sequence of acquires cannot hand out the same
    /// buffer twice before it is recorded.
    pub fn acquire(&mut self) -> usize {
        let mut oldest: usize = 0;
        let mut oldest_priority: u64 = self.meta[0].lru_priority;
        for (i, meta) in self.meta.iter().enumerate().skip(1) {
            if meta.lru_priority < oldest_priority {
                oldest_priority = meta.lru_priority;
                oldest = i;
            }
        }
        self.meta[oldest] = SideBufferMetadata::EMPTY;
        self.meta[oldest].lru_priority = u64::MAX;
        oldest
    }

    /// Mutable access to a buffer's bytes, for filling.
    pub fn buffer_mut(&mut self, buffer: usize) -> &mut [u8] {
        &mut self.data[buffer]
    }

    /// Record that `buffer` now holds `length` decompressed bytes of
    /// entry `index` starting at `offset`, and mark it most recent.
    pub fn record(&mut self, buffer: usize, index: i64, offset: i64, length: i64) {
        self.next_lru_priority += 1;
        self.meta[buffer] = SideBufferMetadata {
            index_within_archive: index,
            offset_within_entry: offset,
            length,
            lru_priority: self.next_lru_priority,
        };
    }

    /// Mark `buffer` empty and immediately evictable.
    pub fn invalidate(&mut self, buffer: usize) {
        self.meta[buffer] = SideBufferMetadata::EMPTY;
    }

    /// Serve `dst` from cache if any buffer covers the requested range.
    ///
    /// Among covering buffers the longest one wins, maximizing the
    /// chance that the next, possibly larger, read also hits. A hit
    /// refreshes the buffer's LRU priority.
    pub fn read_from(&mut self, index: i64, offset: i64, dst: &mut [u8]) -> bool {
        let mut best: Option<usize> = None;
        let mut best_length: i64 = -1;
        for (i, meta) in self.meta.iter().enumerate() {
            if meta.length > best_length && meta.contains(index, offset, dst.len() as u64) {
                best = Some(i);
                best_length = meta.length;
            }
        }

        match best {
            Some(i) => {
                self.next_lru_priority += 1;
                self.meta[i].lru_priority = self.next_lru_priority;
                let delta: usize = (offset - self.meta[i].offset_within_entry) as usize;
                dst.copy_from_slice(&self.data[i][delta..delta + dst.len()]);
                true
            }
            None => false,
        }
    }
}

impl Default for SideBufferPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(pool: &mut SideBufferPool, index: i64, offset: i64, bytes: &[u8]) -> usize {
        let buffer: usize = pool.acquire();
        pool.buffer_mut(buffer)[..bytes.len()].copy_from_slice(bytes);
        pool.record(buffer, index, offset, bytes.len() as i64);
        buffer
    }

    #[test]
    fn test_miss_on_empty_pool() {
        let mut pool: SideBufferPool = SideBufferPool::new();
        let mut dst = [0u8; 4];
        assert!(!pool.read_from(0, 0, &mut dst));
    }

    #[test]
    fn test_hit_inside_recorded_range() {
        let mut pool: SideBufferPool = SideBufferPool::new();
        fill(&mut pool, 3, 100, b"abcdefgh");

        let mut dst = [0u8; 4];
        assert!(pool.read_from(3, 102, &mut dst));
        assert_eq!(&dst, b"cdef");
    }

    #[test]
    fn test_miss_when_range_not_covered() {
        let mut pool: SideBufferPool = SideBufferPool::new();
        fill(&mut pool, 3, 100, b"abcdefgh");

        let mut dst = [0u8; 4];
        // Before the cached range.
        assert!(!pool.read_from(3, 96, &mut dst));
        // Runs past the end of the cached range.
        assert!(!pool.read_from(3, 106, &mut dst));
        // Different entry.
        assert!(!pool.read_from(4, 102, &mut dst));
    }

    #[test]
    fn test_longest_covering_buffer_wins() {
        let mut pool: SideBufferPool = SideBufferPool::new();
        fill(&mut pool, 1, 0, b"short");
        fill(&mut pool, 1, 0, b"a much longer cached run");

        let mut dst = [0u8; 5];
        assert!(pool.read_from(1, 0, &mut dst));
        assert_eq!(&dst, b"a muc");
    }

    #[test]
    fn test_acquire_evicts_least_recently_used() {
        let mut pool: SideBufferPool = SideBufferPool::new();
        let mut buffers: Vec<usize> = Vec::new();
        for i in 0..SIDE_BUFFER_COUNT {
            buffers.push(fill(&mut pool, i as i64, 0, b"data"));
        }

        // Touch buffer for entry 0 so entry 1's buffer becomes oldest.
        let mut dst = [0u8; 4];
        assert!(pool.read_from(0, 0, &mut dst));

        let evicted: usize = pool.acquire();
        assert_eq!(evicted, buffers[1]);
        assert!(!pool.read_from(1, 0, &mut dst));
        assert!(pool.read_from(2, 0, &mut dst));
    }

    #[test]
    fn test_acquired_buffer_is_not_immediately_reacquired() {
        let mut pool: SideBufferPool = SideBufferPool::new();
        let first: usize = pool.acquire();
        let second: usize = pool.acquire();
        assert_ne!(first, second);
    }

    #[test]
    fn test_invalidate_clears_the_range() {
        let mut pool: SideBufferPool = SideBufferPool::new();
        let buffer: usize = fill(&mut pool, 7, 0, b"payload");
        pool.invalidate(buffer);

        let mut dst = [0u8; 4];
        assert!(!pool.read_from(7, 0, &mut dst));
    }
}
