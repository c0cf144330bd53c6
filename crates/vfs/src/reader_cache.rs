//! The warm-reader LRU cache.
//!
//! Decompression streams only walk forward, so re-opening an archive
//! for every FUSE file open would make a "read entries 60, 40, 50"
//! access pattern cost 150 entry iterations. Keeping released readers
//! warm lets a request reuse the reader whose position is the closest
//! predecessor of the target: the reader parked at entry 40 serves a
//! request for entry 50 with 10 iterations instead of 50. Eligibility
//! is by entry ordinal, never by pathname.

use std::sync::Arc;

use arcfs_common::{Redactor, SAVED_READER_COUNT};
use arcfs_codec::{ArchiveReader, OpenOptions};

use crate::reader::Reader;

pub struct ReaderCache {
    slots: Vec<Option<(Reader, u64)>>,
    next_lru_priority: u64,
    options: OpenOptions,
    archive_name: Arc<str>,
    redactor: Redactor,
}

impl ReaderCache {
    /// # Arguments
    /// * `options` - How to open fresh streams over the archive; holds
    ///   the canonical path and the captured passphrase
    /// * `archive_name` - Archive name as given on the command line,
    ///   for log messages
    /// * `redactor` - Pathname redaction for log messages
    pub fn new(options: OpenOptions, archive_name: Arc<str>, redactor: Redactor) -> Self {
        Self {
            slots: (0..SAVED_READER_COUNT).map(|_| None).collect(),
            next_lru_priority: 0,
            options,
            archive_name,
            redactor,
        }
    }

    /// Produce a reader positioned at the start of the `want`th entry.
    ///
    /// Prefers the cached reader with the greatest position at or
    /// before `(want, 0)`; falls back to opening a fresh stream when
    /// every cached reader is already past the target.
    pub fn acquire(&mut self, want: i64) -> Option<Reader> {
        if want < 0 {
            tracing::error!("negative entry index requested");
            return None;
        }

        let mut best: Option<usize> = None;
        let mut best_position: (i64, i64) = (-1, -1);
        for (i, slot) in self.slots.iter().enumerate() {
            if let Some((reader, _)) = slot {
                let position: (i64, i64) = (reader.index(), reader.offset());
                if position > best_position && position <= (want, 0) {
                    best = Some(i);
                    best_position = position;
                }
            }
        }

        let mut reader: Reader = match best {
            Some(i) => {
                let (reader, _) = self.slots[i].take()?;
                reader
            }
            None => self.open_fresh()?,
        };

        if !reader.advance_index(want) {
            return None;
        }
        Some(reader)
    }

    /// Return a reader to the cache, evicting the least recently used
    /// slot.
    pub fn release(&mut self, reader: Reader) {
        let mut oldest: usize = 0;
        let mut oldest_priority: u64 = u64::MAX;
        for (i, slot) in self.slots.iter().enumerate() {
            let priority: u64 = match slot {
                Some((_, priority)) => *priority,
                None => 0,
            };
            if priority < oldest_priority {
                oldest_priority = priority;
                oldest = i;
            }
        }
        self.next_lru_priority += 1;
        self.slots[oldest] = Some((reader, self.next_lru_priority));
    }

    fn open_fresh(&self) -> Option<Reader> {
        match ArchiveReader::open(&self.options) {
            Ok(stream) => Some(Reader::new(
                stream,
                self.archive_name.clone(),
                self.redactor,
            )),
            Err(e) => {
                tracing::error!(
                    "could not read {}: {}",
                    self.redactor.path(&self.archive_name),
                    e
                );
                None
            }
        }
    }
}
