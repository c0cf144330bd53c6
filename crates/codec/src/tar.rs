//! Streaming tar decoding.
//!
//! Sequential 512-byte block parser. Supported header families:
//! - pre-POSIX and ustar headers (name + prefix reassembly),
//! - GNU long name (`L`) and long link (`K`) records,
//! - pax extended headers (`x` per-file overrides for `path`,
//!   `linkpath`, `size`, `mtime`; `g` global records are consumed and
//!   ignored),
//! - GNU base-256 size fields.
//!
//! Parsing is strictly forward; callers that do not drain an entry's
//! payload have the remainder skipped on the next header advance.

use std::io::Read;

use crate::detect::{parse_octal, tar_checksum_valid, TAR_BLOCK_LEN};
use crate::entry::{EntryKind, EntryMetadata};
use crate::error::CodecError;
use crate::source::read_exact_or_eof;

const DISCARD_LEN: usize = 8192;

/// Upper bound on a GNU long-name payload.
const MAX_NAME_LEN: u64 = 64 * 1024;

/// Upper bound on a pax extended-header payload.
const MAX_PAX_LEN: u64 = 1024 * 1024;

/// Per-file overrides collected from pax (`x`) records. Each set applies
/// to exactly one following real entry.
#[derive(Default)]
struct PaxOverrides {
    path: Option<Vec<u8>>,
    linkpath: Option<Vec<u8>>,
    size: Option<u64>,
    mtime: Option<i64>,
}

/// Streaming tar reader over an already-decompressed byte stream.
pub struct TarStream {
    input: Box<dyn Read + Send>,
    finished: bool,
    zero_blocks: u8,
    /// Unread payload bytes of the current entry.
    remaining_data: u64,
    /// Block padding after the current entry's payload.
    pad: u64,
    gnu_longname: Option<Vec<u8>>,
    gnu_longlink: Option<Vec<u8>>,
    pax: PaxOverrides,
    hdr: [u8; TAR_BLOCK_LEN],
    discard: [u8; DISCARD_LEN],
}

impl TarStream {
    pub fn new(input: Box<dyn Read + Send>) -> Self {
        Self {
            input,
            finished: false,
            zero_blocks: 0,
            remaining_data: 0,
            pad: 0,
            gnu_longname: None,
            gnu_longlink: None,
            pax: PaxOverrides::default(),
            hdr: [0u8; TAR_BLOCK_LEN],
            discard: [0u8; DISCARD_LEN],
        }
    }

    /// Advance to the next entry's header.
    ///
    /// Skips whatever remains of the current entry's payload first, so
    /// the stream stays block-aligned no matter how much the caller
    /// read.
    pub fn next_header(&mut self) -> Result<Option<EntryMetadata>, CodecError> {
        if self.finished {
            return Ok(None);
        }

        self.skip_remaining_payload()?;

        loop {
            if !read_exact_or_eof(&mut self.input, &mut self.hdr)? {
                // Clean EOF at a block boundary; archives truncated after
                // the final entry (no trailing zero blocks) end here.
                self.finished = true;
                return Ok(None);
            }

            if self.hdr.iter().all(|&b| b == 0) {
                self.zero_blocks += 1;
                if self.zero_blocks >= 2 {
                    self.finished = true;
                    return Ok(None);
                }
                continue;
            }
            self.zero_blocks = 0;

            if !tar_checksum_valid(&self.hdr) {
                return Err(CodecError::malformed("tar", "bad header checksum"));
            }

            let typeflag: u8 = self.hdr[156];
            let size: u64 = parse_tar_size(&self.hdr[124..136])
                .ok_or_else(|| CodecError::malformed("tar", "bad size field"))?;
            let pad: u64 = tar_pad(size);

            match typeflag {
                b'L' => {
                    let name: Vec<u8> = self.read_meta_payload(size, pad, MAX_NAME_LEN)?;
                    self.gnu_longname = Some(trim_name(name));
                    continue;
                }
                b'K' => {
                    let link: Vec<u8> = self.read_meta_payload(size, pad, MAX_NAME_LEN)?;
                    self.gnu_longlink = Some(trim_name(link));
                    continue;
                }
                b'x' => {
                    let payload: Vec<u8> = self.read_meta_payload(size, pad, MAX_PAX_LEN)?;
                    parse_pax(&payload, &mut self.pax);
                    continue;
                }
                b'g' => {
                    // Applying global records would misattribute entries;
                    // consume and drop.
                    let _ = self.read_meta_payload(size, pad, MAX_PAX_LEN)?;
                    tracing::debug!("ignoring pax global header record");
                    continue;
                }
                _ => {}
            }

            return Ok(Some(self.finish_entry(typeflag, size)));
        }
    }

    fn finish_entry(&mut self, typeflag: u8, header_size: u64) -> EntryMetadata {
        let mut name: Vec<u8> = build_header_name(&self.hdr);
        if let Some(path) = self.pax.path.take() {
            name = path;
        } else if let Some(long) = self.gnu_longname.take() {
            name = long;
        }

        let mut link: Vec<u8> = cstr_bytes(&self.hdr[157..257]).to_vec();
        if let Some(linkpath) = self.pax.linkpath.take() {
            link = linkpath;
        } else if let Some(long) = self.gnu_longlink.take() {
            link = long;
        }

        let size: u64 = self.pax.size.take().unwrap_or(header_size);
        let mode: u32 = parse_octal(&self.hdr[100..108]).unwrap_or(0) as u32 & 0o7777;
        let mtime: i64 = match self.pax.mtime.take() {
            Some(t) => t,
            None => parse_octal(&self.hdr[136..148]).unwrap_or(0) as i64,
        };
        self.pax = PaxOverrides::default();

        let mut kind: EntryKind = kind_from_typeflag(typeflag);
        if kind == EntryKind::Regular && name.last() == Some(&b'/') {
            // Pre-POSIX archives mark directories with a trailing slash
            // and typeflag 0.
            kind = EntryKind::Directory;
        }

        // Only regular entries (and unknown typeflags mapped to regular)
        // store payload bytes; link, directory and device records do not.
        // Padding follows the stored length, which a pax size override
        // redefines.
        let data_len: u64 = if entry_has_payload(typeflag, kind) {
            size
        } else {
            0
        };
        self.remaining_data = data_len;
        self.pad = tar_pad(data_len);

        let symlink_target: Option<String> = if kind == EntryKind::Symlink && !link.is_empty() {
            Some(String::from_utf8_lossy(&link).into_owned())
        } else {
            None
        };

        let pathname: Option<String> = String::from_utf8(name.clone()).ok();
        EntryMetadata {
            pathname,
            pathname_raw: name,
            kind,
            mode,
            mtime,
            size: Some(size),
            symlink_target,
            encrypted: false,
        }
    }

    /// Read decompressed payload bytes of the current entry.
    pub fn read_data(&mut self, dst: &mut [u8]) -> Result<usize, CodecError> {
        if self.remaining_data == 0 || dst.is_empty() {
            return Ok(0);
        }
        let want: usize = (dst.len() as u64).min(self.remaining_data) as usize;
        let n: usize = self.input.read(&mut dst[..want])?;
        if n == 0 {
            return Err(CodecError::malformed("tar", "truncated entry data"));
        }
        self.remaining_data -= n as u64;
        Ok(n)
    }

    fn skip_remaining_payload(&mut self) -> Result<(), CodecError> {
        let mut to_skip: u64 = self.remaining_data + self.pad;
        self.remaining_data = 0;
        self.pad = 0;
        while to_skip > 0 {
            let step: usize = (self.discard.len() as u64).min(to_skip) as usize;
            let n: usize = self.input.read(&mut self.discard[..step])?;
            if n == 0 {
                return Err(CodecError::malformed("tar", "truncated entry data"));
            }
            to_skip -= n as u64;
        }
        Ok(())
    }

    fn read_meta_payload(
        &mut self,
        size: u64,
        pad: u64,
        cap: u64,
    ) -> Result<Vec<u8>, CodecError> {
        if size > cap {
            return Err(CodecError::malformed("tar", "oversized metadata record"));
        }
        let mut payload: Vec<u8> = vec![0u8; size as usize];
        if !read_exact_or_eof(&mut self.input, &mut payload)? && size > 0 {
            return Err(CodecError::malformed("tar", "truncated metadata record"));
        }
        let mut to_skip: u64 = pad;
        while to_skip > 0 {
            let step: usize = (self.discard.len() as u64).min(to_skip) as usize;
            let n: usize = self.input.read(&mut self.discard[..step])?;
            if n == 0 {
                return Err(CodecError::malformed("tar", "truncated metadata record"));
            }
            to_skip -= n as u64;
        }
        Ok(payload)
    }
}

fn entry_has_payload(typeflag: u8, kind: EntryKind) -> bool {
    match typeflag {
        b'1' | b'2' | b'3' | b'4' | b'5' | b'6' => false,
        _ => kind == EntryKind::Regular,
    }
}

fn kind_from_typeflag(typeflag: u8) -> EntryKind {
    match typeflag {
        0 | b'0' | b'7' => EntryKind::Regular,
        b'1' => EntryKind::Hardlink,
        b'2' => EntryKind::Symlink,
        b'3' => EntryKind::CharDevice,
        b'4' => EntryKind::BlockDevice,
        b'5' => EntryKind::Directory,
        b'6' => EntryKind::Fifo,
        // Unknown typeflags are treated as regular files so their
        // payload is consumed and alignment holds.
        _ => EntryKind::Regular,
    }
}

#[inline]
fn tar_pad(size: u64) -> u64 {
    let rem: u64 = size % TAR_BLOCK_LEN as u64;
    if rem == 0 {
        0
    } else {
        TAR_BLOCK_LEN as u64 - rem
    }
}

/// Parse the size field: NUL/space padded octal, or GNU base-256 when
/// the top bit of the first byte is set.
fn parse_tar_size(field: &[u8]) -> Option<u64> {
    if field.is_empty() {
        return None;
    }
    if field[0] & 0x80 != 0 {
        let mut value: u64 = (field[0] & 0x7f) as u64;
        for &b in &field[1..] {
            value = value.checked_mul(256)?;
            value = value.checked_add(b as u64)?;
        }
        return Some(value);
    }
    parse_octal(field)
}

fn cstr_bytes(field: &[u8]) -> &[u8] {
    match field.iter().position(|&b| b == 0) {
        Some(i) => &field[..i],
        None => field,
    }
}

/// Reassemble the entry name from the ustar prefix and name fields.
fn build_header_name(hdr: &[u8; TAR_BLOCK_LEN]) -> Vec<u8> {
    let name: &[u8] = cstr_bytes(&hdr[0..100]);
    let is_ustar: bool = &hdr[257..262] == b"ustar";
    if is_ustar {
        let prefix: &[u8] = cstr_bytes(&hdr[345..500]);
        if !prefix.is_empty() {
            let mut full: Vec<u8> = Vec::with_capacity(prefix.len() + 1 + name.len());
            full.extend_from_slice(prefix);
            if !full.ends_with(b"/") {
                full.push(b'/');
            }
            full.extend_from_slice(name);
            return full;
        }
    }
    name.to_vec()
}

fn trim_name(mut name: Vec<u8>) -> Vec<u8> {
    while let Some(&last) = name.last() {
        if last == 0 || last == b'\n' {
            name.pop();
        } else {
            break;
        }
    }
    name
}

/// Parse pax records (`len key=value\n`), keeping the keys we serve.
fn parse_pax(payload: &[u8], out: &mut PaxOverrides) {
    let mut pos: usize = 0;
    while pos < payload.len() {
        let space: usize = match payload[pos..].iter().position(|&b| b == b' ') {
            Some(i) => pos + i,
            None => return,
        };
        let len: usize = match std::str::from_utf8(&payload[pos..space])
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
        {
            Some(len) if len > space - pos => len,
            _ => return,
        };
        let rec_end: usize = match pos.checked_add(len) {
            Some(end) if end > space + 1 && end <= payload.len() => end,
            _ => return,
        };

        let mut record: &[u8] = &payload[space + 1..rec_end];
        if record.last() == Some(&b'\n') {
            record = &record[..record.len() - 1];
        }
        if let Some(eq) = record.iter().position(|&b| b == b'=') {
            let key: &[u8] = &record[..eq];
            let value: &[u8] = &record[eq + 1..];
            match key {
                b"path" => out.path = Some(value.to_vec()),
                b"linkpath" => out.linkpath = Some(value.to_vec()),
                b"size" => {
                    out.size = std::str::from_utf8(value)
                        .ok()
                        .and_then(|s| s.parse::<u64>().ok());
                }
                b"mtime" => {
                    // Fractional seconds are truncated.
                    out.mtime = std::str::from_utf8(value)
                        .ok()
                        .and_then(|s| s.split('.').next()?.parse::<i64>().ok());
                }
                _ => {}
            }
        }
        pos = rec_end;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    pub(crate) fn write_header(
        buf: &mut [u8; TAR_BLOCK_LEN],
        name: &str,
        size: u64,
        typeflag: u8,
        mode: u32,
        mtime: u64,
    ) {
        buf.fill(0);
        let name_bytes: &[u8] = name.as_bytes();
        buf[..name_bytes.len().min(100)].copy_from_slice(&name_bytes[..name_bytes.len().min(100)]);
        write_octal(&mut buf[100..108], mode as u64);
        write_octal(&mut buf[108..116], 0);
        write_octal(&mut buf[116..124], 0);
        write_octal12(&mut buf[124..136], size);
        write_octal12(&mut buf[136..148], mtime);
        buf[148..156].fill(b' ');
        buf[156] = typeflag;
        buf[257..263].copy_from_slice(b"ustar\0");
        buf[263..265].copy_from_slice(b"00");
        let sum: u64 = buf.iter().map(|&b| b as u64).sum();
        let chk: String = format!("{:06o}\0 ", sum);
        buf[148..156].copy_from_slice(chk.as_bytes());
    }

    fn write_octal(field: &mut [u8], mut value: u64) {
        let digits: usize = field.len() - 1;
        field[digits] = 0;
        for i in (0..digits).rev() {
            field[i] = b'0' + (value & 7) as u8;
            value >>= 3;
        }
    }

    fn write_octal12(field: &mut [u8], mut value: u64) {
        field[11] = 0;
        for i in (0..11).rev() {
            field[i] = b'0' + (value & 7) as u8;
            value >>= 3;
        }
    }

    pub(crate) fn append_entry(tar: &mut Vec<u8>, name: &str, data: &[u8], mtime: u64) {
        let mut hdr = [0u8; TAR_BLOCK_LEN];
        write_header(&mut hdr, name, data.len() as u64, b'0', 0o644, mtime);
        tar.extend_from_slice(&hdr);
        tar.extend_from_slice(data);
        tar.extend_from_slice(&vec![0u8; tar_pad(data.len() as u64) as usize]);
    }

    pub(crate) fn finish(tar: &mut Vec<u8>) {
        tar.extend_from_slice(&[0u8; TAR_BLOCK_LEN]);
        tar.extend_from_slice(&[0u8; TAR_BLOCK_LEN]);
    }

    fn stream(tar: Vec<u8>) -> TarStream {
        TarStream::new(Box::new(Cursor::new(tar)))
    }

    #[test]
    fn test_iterates_entries_in_order() {
        let mut tar: Vec<u8> = Vec::new();
        append_entry(&mut tar, "a.txt", b"first", 100);
        append_entry(&mut tar, "b/c.txt", b"second entry", 200);
        finish(&mut tar);

        let mut ts: TarStream = stream(tar);

        let a: EntryMetadata = ts.next_header().unwrap().unwrap();
        assert_eq!(a.pathname.as_deref(), Some("a.txt"));
        assert_eq!(a.size, Some(5));
        assert_eq!(a.mtime, 100);
        assert_eq!(a.mode, 0o644);

        let mut buf = [0u8; 32];
        let n: usize = ts.read_data(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"first");

        let b: EntryMetadata = ts.next_header().unwrap().unwrap();
        assert_eq!(b.pathname.as_deref(), Some("b/c.txt"));
        assert_eq!(b.size, Some(12));

        assert!(ts.next_header().unwrap().is_none());
    }

    #[test]
    fn test_skips_unread_payload_on_advance() {
        let mut tar: Vec<u8> = Vec::new();
        append_entry(&mut tar, "big.bin", &vec![7u8; 2000], 0);
        append_entry(&mut tar, "after.txt", b"ok", 0);
        finish(&mut tar);

        let mut ts: TarStream = stream(tar);
        ts.next_header().unwrap().unwrap();
        // Read only a little of the first payload.
        let mut buf = [0u8; 10];
        ts.read_data(&mut buf).unwrap();

        let second: EntryMetadata = ts.next_header().unwrap().unwrap();
        assert_eq!(second.pathname.as_deref(), Some("after.txt"));
    }

    #[test]
    fn test_empty_archive() {
        let mut tar: Vec<u8> = Vec::new();
        finish(&mut tar);
        let mut ts: TarStream = stream(tar);
        assert!(ts.next_header().unwrap().is_none());
        assert!(ts.next_header().unwrap().is_none());
    }

    #[test]
    fn test_zero_length_input_is_empty() {
        let mut ts: TarStream = stream(Vec::new());
        assert!(ts.next_header().unwrap().is_none());
    }

    #[test]
    fn test_symlink_entry() {
        let mut tar: Vec<u8> = Vec::new();
        let mut hdr = [0u8; TAR_BLOCK_LEN];
        write_header(&mut hdr, "link", 0, b'2', 0o777, 0);
        hdr[157..163].copy_from_slice(b"target");
        // Re-checksum after writing the linkname field.
        hdr[148..156].fill(b' ');
        let sum: u64 = hdr.iter().map(|&b| b as u64).sum();
        hdr[148..156].copy_from_slice(format!("{:06o}\0 ", sum).as_bytes());
        tar.extend_from_slice(&hdr);
        finish(&mut tar);

        let mut ts: TarStream = stream(tar);
        let link: EntryMetadata = ts.next_header().unwrap().unwrap();
        assert_eq!(link.kind, EntryKind::Symlink);
        assert_eq!(link.symlink_target.as_deref(), Some("target"));
    }

    #[test]
    fn test_gnu_longname_applies_to_next_entry() {
        let long_name: String = format!("{}/file.txt", "d".repeat(150));
        let mut tar: Vec<u8> = Vec::new();

        let mut hdr = [0u8; TAR_BLOCK_LEN];
        let payload: Vec<u8> = {
            let mut p: Vec<u8> = long_name.as_bytes().to_vec();
            p.push(0);
            p
        };
        write_header(&mut hdr, "././@LongLink", payload.len() as u64, b'L', 0o644, 0);
        tar.extend_from_slice(&hdr);
        tar.extend_from_slice(&payload);
        tar.extend_from_slice(&vec![0u8; tar_pad(payload.len() as u64) as usize]);

        append_entry(&mut tar, "truncated-name", b"x", 0);
        finish(&mut tar);

        let mut ts: TarStream = stream(tar);
        let meta: EntryMetadata = ts.next_header().unwrap().unwrap();
        assert_eq!(meta.pathname.as_deref(), Some(long_name.as_str()));
    }

    #[test]
    fn test_pax_path_override() {
        let record: String = {
            let body: String = "path=override/name.txt\n".to_string();
            let mut len: usize = body.len() + 3;
            loop {
                let formatted: String = format!("{len} {body}");
                if formatted.len() == len {
                    break formatted;
                }
                len = format!("{len} {body}").len();
            }
        };

        let mut tar: Vec<u8> = Vec::new();
        let mut hdr = [0u8; TAR_BLOCK_LEN];
        write_header(&mut hdr, "PaxHeader", record.len() as u64, b'x', 0o644, 0);
        tar.extend_from_slice(&hdr);
        tar.extend_from_slice(record.as_bytes());
        tar.extend_from_slice(&vec![0u8; tar_pad(record.len() as u64) as usize]);

        append_entry(&mut tar, "ignored", b"y", 0);
        append_entry(&mut tar, "plain.txt", b"z", 0);
        finish(&mut tar);

        let mut ts: TarStream = stream(tar);
        let first: EntryMetadata = ts.next_header().unwrap().unwrap();
        assert_eq!(first.pathname.as_deref(), Some("override/name.txt"));
        // The override applies to exactly one entry.
        let second: EntryMetadata = ts.next_header().unwrap().unwrap();
        assert_eq!(second.pathname.as_deref(), Some("plain.txt"));
    }

    #[test]
    fn test_base256_size() {
        assert_eq!(parse_tar_size(b"00000000010\0"), Some(8));
        let mut field = [0u8; 12];
        field[0] = 0x80;
        field[10] = 0x01;
        field[11] = 0x00;
        assert_eq!(parse_tar_size(&field), Some(256));
    }

    #[test]
    fn test_bad_checksum_is_an_error() {
        let mut tar: Vec<u8> = Vec::new();
        append_entry(&mut tar, "a.txt", b"data", 0);
        tar[148] = b'9'; // corrupt the checksum field
        finish(&mut tar);

        let mut ts: TarStream = stream(tar);
        assert!(ts.next_header().is_err());
    }

    #[test]
    fn test_directory_entry_kind() {
        let mut tar: Vec<u8> = Vec::new();
        let mut hdr = [0u8; TAR_BLOCK_LEN];
        write_header(&mut hdr, "subdir/", 0, b'5', 0o755, 0);
        tar.extend_from_slice(&hdr);
        finish(&mut tar);

        let mut ts: TarStream = stream(tar);
        let meta: EntryMetadata = ts.next_header().unwrap().unwrap();
        assert_eq!(meta.kind, EntryKind::Directory);
    }
}
