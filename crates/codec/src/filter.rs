//! Compression filter stacking (gzip, bzip2, xz).
//!
//! A filter chain sits in front of the container format: `foo.tar.gz` is
//! a gzip filter over a tar container, `foo.txt.gz` is a gzip filter
//! over nothing (a raw archive). Filters are sniffed by magic bytes and
//! stacked until the stream head no longer looks compressed.

use std::io::{self, Read};

use bzip2::read::MultiBzDecoder;
use flate2::read::MultiGzDecoder;
use xz2::read::XzDecoder;

use crate::detect::{sniff_filter, Filter};

/// Bytes peeked from each decompressed layer: enough for every filter
/// magic and for a full tar header block.
pub(crate) const PEEK_LEN: usize = 512;

/// Filter chains deeper than this are not plausible archives.
const MAX_FILTER_DEPTH: usize = 4;

/// Reader that replays a bounded prefix before continuing with the
/// underlying stream. Used to sniff a layer's head without losing it.
pub(crate) struct PeekRead {
    inner: Box<dyn Read + Send>,
    buf: Vec<u8>,
    filled: usize,
    pos: usize,
}

impl PeekRead {
    pub(crate) fn new(inner: Box<dyn Read + Send>) -> Self {
        Self {
            inner,
            buf: vec![0u8; PEEK_LEN],
            filled: 0,
            pos: 0,
        }
    }

    /// Fill the peek buffer as far as the stream allows.
    pub(crate) fn prefill(&mut self) -> io::Result<usize> {
        while self.filled < self.buf.len() {
            let n: usize = self.inner.read(&mut self.buf[self.filled..])?;
            if n == 0 {
                break;
            }
            self.filled += n;
        }
        Ok(self.filled)
    }

    pub(crate) fn peeked(&self) -> &[u8] {
        &self.buf[..self.filled]
    }
}

impl Read for PeekRead {
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        if self.pos < self.filled {
            let n: usize = (self.filled - self.pos).min(dst.len());
            dst[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
            self.pos += n;
            return Ok(n);
        }
        self.inner.read(dst)
    }
}

/// Wrap a stream in the decoder for `filter`.
///
/// The multi-member decoder variants are used throughout so that
/// concatenated members decode as one stream.
pub(crate) fn wrap_filter(stream: Box<dyn Read + Send>, filter: Filter) -> Box<dyn Read + Send> {
    match filter {
        Filter::Gzip => Box::new(MultiGzDecoder::new(stream)),
        Filter::Bzip2 => Box::new(MultiBzDecoder::new(stream)),
        Filter::Xz => Box::new(XzDecoder::new_multi_decoder(stream)),
    }
}

/// Sniff and stack the filter chain over `source`.
///
/// # Returns
/// The fully decompressed stream positioned at byte 0 (with its head
/// already peeked for container sniffing) and the applied filters,
/// outermost first.
pub(crate) fn detect_chain(
    source: Box<dyn Read + Send>,
) -> io::Result<(PeekRead, Vec<Filter>)> {
    let mut filters: Vec<Filter> = Vec::new();
    let mut stream: Box<dyn Read + Send> = source;

    loop {
        let mut peek: PeekRead = PeekRead::new(stream);
        peek.prefill()?;

        let next: Option<Filter> = if filters.len() < MAX_FILTER_DEPTH {
            sniff_filter(peek.peeked())
        } else {
            None
        };

        match next {
            Some(filter) => {
                tracing::debug!(filter = filter.name(), "stacking compression filter");
                filters.push(filter);
                stream = wrap_filter(Box::new(peek), filter);
            }
            None => return Ok((peek, filters)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    #[test]
    fn test_peek_read_replays_prefix() {
        let data: Vec<u8> = (0u8..=255).collect();
        let mut peek: PeekRead = PeekRead::new(Box::new(io::Cursor::new(data.clone())));
        peek.prefill().unwrap();
        assert_eq!(peek.peeked(), &data[..]);

        let mut out: Vec<u8> = Vec::new();
        peek.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_detect_chain_plain_data() {
        let (mut peek, filters) = detect_chain(Box::new(io::Cursor::new(b"not compressed".to_vec()))).unwrap();
        assert!(filters.is_empty());
        let mut out: Vec<u8> = Vec::new();
        peek.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"not compressed");
    }

    #[test]
    fn test_detect_chain_single_gzip() {
        let compressed: Vec<u8> = gzip(b"hello filter chain");
        let (mut peek, filters) = detect_chain(Box::new(io::Cursor::new(compressed))).unwrap();
        assert_eq!(filters, vec![Filter::Gzip]);
        let mut out: Vec<u8> = Vec::new();
        peek.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"hello filter chain");
    }

    #[test]
    fn test_detect_chain_stacked_filters() {
        // gzip-of-gzip: both layers must unwrap.
        let inner: Vec<u8> = gzip(b"twice wrapped");
        let outer: Vec<u8> = gzip(&inner);
        let (mut peek, filters) = detect_chain(Box::new(io::Cursor::new(outer))).unwrap();
        assert_eq!(filters, vec![Filter::Gzip, Filter::Gzip]);
        let mut out: Vec<u8> = Vec::new();
        peek.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"twice wrapped");
    }
}
