//! Zip decoding driven from the central directory.
//!
//! Header iteration walks the central directory records in order, so an
//! entry's metadata (sizes included) is always known up front; payload
//! reads seek to the entry's local header and stream forward from
//! there. Stored and deflated payloads are supported, optionally under
//! the traditional PKWARE stream cipher (ZipCrypto). AES-encrypted
//! entries and zip64 archives are rejected.
//!
//! All file access goes through one owned handle with explicit seeks
//! before every read, so header iteration and payload streaming never
//! fight over the cursor.

use std::io::{Read, Seek, SeekFrom};

use flate2::{Decompress, FlushDecompress, Status};

use crate::entry::{EntryKind, EntryMetadata};
use crate::error::CodecError;
use crate::passphrase::SharedPassphrase;
use crate::source::{read_exact_n, TrackedFile};

const SIG_EOCD: u32 = 0x0605_4b50;
const SIG_CDFH: u32 = 0x0201_4b50;
const SIG_LFH: u32 = 0x0403_4b50;

const EOCD_MIN_LEN: usize = 22;
// 64 KiB comment plus header margin.
const EOCD_SEARCH_MAX: usize = 66 * 1024;

const CDFH_LEN: usize = 46;
const LFH_LEN: usize = 30;

const FLAG_ENCRYPTED: u16 = 0x0001;
const FLAG_DATA_DESCRIPTOR: u16 = 0x0008;

const METHOD_STORED: u16 = 0;
const METHOD_DEFLATE: u16 = 8;
const METHOD_AES: u16 = 99;

/// Extra-field id of the AE-x AES encryption header.
const EXTRA_ID_AES: u16 = 0x9901;

const CRYPTO_HEADER_LEN: u64 = 12;

const S_IFMT: u32 = 0o170000;
const S_IFDIR: u32 = 0o040000;
const S_IFLNK: u32 = 0o120000;

/// Cap on symlink targets read at header time.
const MAX_SYMLINK_LEN: usize = 4096;

/// Central-directory state for the entry most recently yielded by
/// `next_header`.
struct CurrentEntry {
    method: u16,
    flags: u16,
    crc32: u32,
    dos_time: u16,
    comp_size: u64,
    lfh_offset: u64,
    aes: bool,
    payload: Option<ZipPayload>,
}

/// Streaming facade over a zip archive.
pub struct ZipStream {
    file: TrackedFile,
    file_len: u64,
    cd_pos: u64,
    cd_end: u64,
    entries_total: u64,
    entries_seen: u64,
    block_size: usize,
    passphrase: SharedPassphrase,
    current: Option<CurrentEntry>,
}

impl ZipStream {
    /// Parse the end-of-central-directory record and position the
    /// cursor at the first central-directory entry.
    pub fn open(
        mut file: TrackedFile,
        passphrase: SharedPassphrase,
        block_size: usize,
    ) -> Result<Self, CodecError> {
        let file_len: u64 = file.file_len();
        if file_len < EOCD_MIN_LEN as u64 {
            return Err(CodecError::malformed("zip", "file too short"));
        }

        let win_len: usize = (file_len as usize).min(EOCD_SEARCH_MAX);
        let win_off: u64 = file_len - win_len as u64;
        let mut window: Vec<u8> = vec![0u8; win_len];
        file.seek(SeekFrom::Start(win_off))?;
        read_exact_n(&mut file, &mut window)?;

        // Scan backward for an EOCD whose comment length is consistent
        // with its position, skipping false-positive signatures.
        let mut found: Option<usize> = None;
        let mut i: usize = win_len.saturating_sub(EOCD_MIN_LEN);
        loop {
            if le_u32(&window[i..i + 4]) == SIG_EOCD {
                let comment_len: usize = le_u16(&window[i + 20..i + 22]) as usize;
                if i + EOCD_MIN_LEN + comment_len <= win_len {
                    found = Some(i);
                    break;
                }
            }
            if i == 0 {
                break;
            }
            i -= 1;
        }
        let eocd_rel: usize = found
            .ok_or_else(|| CodecError::malformed("zip", "missing end-of-central-directory"))?;
        let eocd: &[u8] = &window[eocd_rel..];

        let disk_no: u16 = le_u16(&eocd[4..6]);
        let cd_disk: u16 = le_u16(&eocd[6..8]);
        let entries_disk: u16 = le_u16(&eocd[8..10]);
        let entries_total: u16 = le_u16(&eocd[10..12]);
        let cd_size: u32 = le_u32(&eocd[12..16]);
        let cd_off: u32 = le_u32(&eocd[16..20]);

        if disk_no != 0 || cd_disk != 0 || entries_disk != entries_total {
            return Err(CodecError::malformed("zip", "multi-disk archives are not supported"));
        }
        if entries_total == 0xFFFF || cd_size == 0xFFFF_FFFF || cd_off == 0xFFFF_FFFF {
            return Err(CodecError::malformed("zip", "zip64 archives are not supported"));
        }

        let cd_pos: u64 = cd_off as u64;
        let cd_end: u64 = cd_pos
            .checked_add(cd_size as u64)
            .filter(|&end| end <= file_len)
            .ok_or_else(|| CodecError::malformed("zip", "central directory out of bounds"))?;

        Ok(Self {
            file,
            file_len,
            cd_pos,
            cd_end,
            entries_total: entries_total as u64,
            entries_seen: 0,
            block_size: block_size.max(1024),
            passphrase,
            current: None,
        })
    }

    /// Advance to the next central-directory entry.
    pub fn next_header(&mut self) -> Result<Option<EntryMetadata>, CodecError> {
        self.current = None;

        if self.entries_seen >= self.entries_total || self.cd_pos >= self.cd_end {
            return Ok(None);
        }

        self.file.seek(SeekFrom::Start(self.cd_pos))?;
        let mut hdr = [0u8; CDFH_LEN];
        read_exact_n(&mut self.file, &mut hdr)?;
        if le_u32(&hdr[0..4]) != SIG_CDFH {
            return Err(CodecError::malformed("zip", "bad central-directory signature"));
        }

        let version_made_by: u16 = le_u16(&hdr[4..6]);
        let flags: u16 = le_u16(&hdr[8..10]);
        let method: u16 = le_u16(&hdr[10..12]);
        let dos_time: u16 = le_u16(&hdr[12..14]);
        let dos_date: u16 = le_u16(&hdr[14..16]);
        let crc32: u32 = le_u32(&hdr[16..20]);
        let comp_size: u32 = le_u32(&hdr[20..24]);
        let uncomp_size: u32 = le_u32(&hdr[24..28]);
        let name_len: usize = le_u16(&hdr[28..30]) as usize;
        let extra_len: usize = le_u16(&hdr[30..32]) as usize;
        let comment_len: usize = le_u16(&hdr[32..34]) as usize;
        let external_attrs: u32 = le_u32(&hdr[38..42]);
        let lfh_offset: u32 = le_u32(&hdr[42..46]);

        if comp_size == 0xFFFF_FFFF || uncomp_size == 0xFFFF_FFFF || lfh_offset == 0xFFFF_FFFF {
            return Err(CodecError::malformed("zip", "zip64 archives are not supported"));
        }

        let mut name: Vec<u8> = vec![0u8; name_len];
        read_exact_n(&mut self.file, &mut name)?;
        let mut extra: Vec<u8> = vec![0u8; extra_len];
        read_exact_n(&mut self.file, &mut extra)?;

        self.cd_pos += (CDFH_LEN + name_len + extra_len + comment_len) as u64;
        self.entries_seen += 1;

        let aes: bool = method == METHOD_AES || extra_has_id(&extra, EXTRA_ID_AES);
        let encrypted: bool = flags & FLAG_ENCRYPTED != 0;

        // Unix mode lives in the high half of the external attributes
        // when the entry was made on unix.
        let unix_mode: u32 = if version_made_by >> 8 == 3 {
            (external_attrs >> 16) & 0xFFFF
        } else {
            0
        };

        let mut kind: EntryKind = if name.last() == Some(&b'/') || unix_mode & S_IFMT == S_IFDIR {
            EntryKind::Directory
        } else if unix_mode & S_IFMT == S_IFLNK {
            EntryKind::Symlink
        } else {
            EntryKind::Regular
        };

        let mode: u32 = match unix_mode & 0o7777 {
            0 if kind == EntryKind::Directory => 0o755,
            0 => 0o644,
            bits => bits,
        };

        let mtime: i64 = dos_to_unix(dos_date, dos_time);

        self.current = Some(CurrentEntry {
            method,
            flags,
            crc32,
            dos_time,
            comp_size: comp_size as u64,
            lfh_offset: lfh_offset as u64,
            aes,
            payload: None,
        });

        // Symlink targets are payload content; fetch them now so the
        // tree builder sees the target at header time.
        let mut symlink_target: Option<String> = None;
        if kind == EntryKind::Symlink {
            match self.read_symlink_target(uncomp_size as usize) {
                Ok(target) => symlink_target = target,
                Err(e) => return Err(e),
            }
            if symlink_target.is_none() {
                // An unreadable target makes the entry useless as a
                // link; present it as a regular file of its content.
                kind = EntryKind::Regular;
            }
        }

        // Names without the UTF-8 flag (bit 11) are nominally cp437,
        // but real archives overwhelmingly store plain ASCII or UTF-8
        // there too, so both cases go through the same strict parse.
        let pathname: Option<String> = String::from_utf8(name.clone()).ok();

        Ok(Some(EntryMetadata {
            pathname,
            pathname_raw: name,
            kind,
            mode,
            mtime,
            size: Some(uncomp_size as u64),
            symlink_target,
            encrypted,
        }))
    }

    /// Read decompressed payload bytes of the current entry.
    pub fn read_data(&mut self, dst: &mut [u8]) -> Result<usize, CodecError> {
        if dst.is_empty() || self.current.is_none() {
            return Ok(0);
        }
        if self.current.as_ref().is_some_and(|c| c.payload.is_none()) {
            let payload: ZipPayload = self.open_payload()?;
            if let Some(current) = self.current.as_mut() {
                current.payload = Some(payload);
            }
        }
        let Some(current) = self.current.as_mut() else {
            return Ok(0);
        };
        let Some(payload) = current.payload.as_mut() else {
            return Ok(0);
        };
        payload.read(&mut self.file, dst)
    }

    fn read_symlink_target(&mut self, size: usize) -> Result<Option<String>, CodecError> {
        if size == 0 || size > MAX_SYMLINK_LEN {
            return Ok(None);
        }
        let mut payload: ZipPayload = self.open_payload()?;
        let mut target: Vec<u8> = vec![0u8; size];
        let mut off: usize = 0;
        while off < size {
            let n: usize = payload.read(&mut self.file, &mut target[off..])?;
            if n == 0 {
                return Err(CodecError::malformed("zip", "truncated symlink target"));
            }
            off += n;
        }
        Ok(Some(String::from_utf8_lossy(&target).into_owned()))
    }

    /// Parse the local header and construct the payload reader,
    /// initialising decryption when the entry is encrypted.
    fn open_payload(&mut self) -> Result<ZipPayload, CodecError> {
        let current = self
            .current
            .as_ref()
            .ok_or_else(|| CodecError::malformed("zip", "no current entry"))?;

        if current.aes {
            return Err(CodecError::EncryptionUnsupported("AES"));
        }

        self.file.seek(SeekFrom::Start(current.lfh_offset))?;
        let mut lfh = [0u8; LFH_LEN];
        read_exact_n(&mut self.file, &mut lfh)?;
        if le_u32(&lfh[0..4]) != SIG_LFH {
            return Err(CodecError::malformed("zip", "bad local-header signature"));
        }
        let name_len: u64 = le_u16(&lfh[26..28]) as u64;
        let extra_len: u64 = le_u16(&lfh[28..30]) as u64;

        let mut data_start: u64 = current
            .lfh_offset
            .checked_add(LFH_LEN as u64 + name_len + extra_len)
            .ok_or_else(|| CodecError::malformed("zip", "local header out of bounds"))?;
        let mut comp_len: u64 = current.comp_size;
        if data_start.saturating_add(comp_len) > self.file_len {
            return Err(CodecError::malformed("zip", "entry data out of bounds"));
        }

        let mut crypto: Option<ZipCrypto> = None;
        if current.flags & FLAG_ENCRYPTED != 0 {
            let passphrase: Option<String> = {
                let mut provider = self
                    .passphrase
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                provider.request()
            };
            let passphrase: String = passphrase.ok_or(CodecError::PassphraseRequired)?;

            if comp_len < CRYPTO_HEADER_LEN {
                return Err(CodecError::malformed("zip", "encrypted entry too short"));
            }

            let mut cipher: ZipCrypto = ZipCrypto::new(passphrase.as_bytes());
            self.file.seek(SeekFrom::Start(data_start))?;
            let mut header = [0u8; CRYPTO_HEADER_LEN as usize];
            read_exact_n(&mut self.file, &mut header)?;
            cipher.decrypt(&mut header);

            // The final header byte verifies the passphrase: the high
            // byte of the CRC, or of the DOS time when the writer used
            // a data descriptor.
            let expected: u8 = if current.flags & FLAG_DATA_DESCRIPTOR != 0 {
                (current.dos_time >> 8) as u8
            } else {
                (current.crc32 >> 24) as u8
            };
            if header[11] != expected {
                return Err(CodecError::PassphraseIncorrect);
            }

            data_start += CRYPTO_HEADER_LEN;
            comp_len -= CRYPTO_HEADER_LEN;
            crypto = Some(cipher);
        }

        let inflater: Option<Decompress> = match current.method {
            METHOD_STORED => None,
            METHOD_DEFLATE => Some(Decompress::new(false)),
            other => {
                return Err(CodecError::malformed(
                    "zip",
                    format!("unsupported compression method {other}"),
                ))
            }
        };

        Ok(ZipPayload {
            data_start,
            comp_len,
            comp_pos: 0,
            crypto,
            inflater,
            in_buf: vec![0u8; self.block_size],
            in_len: 0,
            in_pos: 0,
            done: false,
        })
    }
}

/// Forward-only payload reader for one zip entry.
///
/// Owns no file handle; the stream's `TrackedFile` is lent in for every
/// read, with an explicit seek to the compressed cursor position.
struct ZipPayload {
    data_start: u64,
    comp_len: u64,
    comp_pos: u64,
    crypto: Option<ZipCrypto>,
    /// `None` for stored entries.
    inflater: Option<Decompress>,
    in_buf: Vec<u8>,
    in_len: usize,
    in_pos: usize,
    done: bool,
}

impl ZipPayload {
    fn read(&mut self, file: &mut TrackedFile, dst: &mut [u8]) -> Result<usize, CodecError> {
        if self.done || dst.is_empty() {
            return Ok(0);
        }
        if self.inflater.is_some() {
            self.read_deflate(file, dst)
        } else {
            self.read_stored(file, dst)
        }
    }

    fn read_stored(&mut self, file: &mut TrackedFile, dst: &mut [u8]) -> Result<usize, CodecError> {
        let remaining: u64 = self.comp_len - self.comp_pos;
        if remaining == 0 {
            self.done = true;
            return Ok(0);
        }
        let want: usize = (dst.len() as u64).min(remaining) as usize;
        file.seek(SeekFrom::Start(self.data_start + self.comp_pos))?;
        read_exact_n(file, &mut dst[..want])?;
        if let Some(crypto) = self.crypto.as_mut() {
            crypto.decrypt(&mut dst[..want]);
        }
        self.comp_pos += want as u64;
        Ok(want)
    }

    fn read_deflate(&mut self, file: &mut TrackedFile, dst: &mut [u8]) -> Result<usize, CodecError> {
        loop {
            if self.in_pos == self.in_len && self.comp_pos < self.comp_len {
                let step: usize =
                    (self.in_buf.len() as u64).min(self.comp_len - self.comp_pos) as usize;
                file.seek(SeekFrom::Start(self.data_start + self.comp_pos))?;
                read_exact_n(file, &mut self.in_buf[..step])?;
                if let Some(crypto) = self.crypto.as_mut() {
                    crypto.decrypt(&mut self.in_buf[..step]);
                }
                self.comp_pos += step as u64;
                self.in_pos = 0;
                self.in_len = step;
            }

            let inflater: &mut Decompress = self
                .inflater
                .as_mut()
                .ok_or_else(|| CodecError::malformed("zip", "missing inflater"))?;
            let before_in: u64 = inflater.total_in();
            let before_out: u64 = inflater.total_out();
            let status: Status = inflater
                .decompress(
                    &self.in_buf[self.in_pos..self.in_len],
                    dst,
                    FlushDecompress::None,
                )
                .map_err(|e| CodecError::malformed("zip", format!("deflate error: {e}")))?;
            self.in_pos += (inflater.total_in() - before_in) as usize;
            let produced: usize = (inflater.total_out() - before_out) as usize;

            if matches!(status, Status::StreamEnd) {
                self.done = true;
                return Ok(produced);
            }
            if produced > 0 {
                return Ok(produced);
            }
            if self.in_pos == self.in_len && self.comp_pos >= self.comp_len {
                return Err(CodecError::malformed("zip", "truncated deflate stream"));
            }
        }
    }
}

/// Traditional PKWARE stream cipher.
struct ZipCrypto {
    keys: [u32; 3],
}

impl ZipCrypto {
    fn new(passphrase: &[u8]) -> Self {
        let mut cipher: ZipCrypto = ZipCrypto {
            keys: [0x1234_5678, 0x2345_6789, 0x3456_7890],
        };
        for &b in passphrase {
            cipher.update(b);
        }
        cipher
    }

    fn update(&mut self, plain: u8) {
        self.keys[0] = crc32_step(self.keys[0], plain);
        self.keys[1] = self.keys[1]
            .wrapping_add(self.keys[0] & 0xff)
            .wrapping_mul(134_775_813)
            .wrapping_add(1);
        self.keys[2] = crc32_step(self.keys[2], (self.keys[1] >> 24) as u8);
    }

    fn stream_byte(&self) -> u8 {
        let temp: u16 = (self.keys[2] | 2) as u16;
        (temp.wrapping_mul(temp ^ 1) >> 8) as u8
    }

    fn decrypt(&mut self, buf: &mut [u8]) {
        for b in buf.iter_mut() {
            let plain: u8 = *b ^ self.stream_byte();
            self.update(plain);
            *b = plain;
        }
    }

    #[cfg(test)]
    fn encrypt(&mut self, buf: &mut [u8]) {
        for b in buf.iter_mut() {
            let plain: u8 = *b;
            *b = plain ^ self.stream_byte();
            self.update(plain);
        }
    }
}

/// One step of the CRC-32 recurrence used by the ZipCrypto key schedule.
fn crc32_step(crc: u32, b: u8) -> u32 {
    let mut c: u32 = (crc ^ b as u32) & 0xff;
    for _ in 0..8 {
        c = if c & 1 != 0 {
            0xEDB8_8320 ^ (c >> 1)
        } else {
            c >> 1
        };
    }
    (crc >> 8) ^ c
}

fn extra_has_id(extra: &[u8], id: u16) -> bool {
    let mut pos: usize = 0;
    while pos + 4 <= extra.len() {
        let field_id: u16 = le_u16(&extra[pos..pos + 2]);
        let field_len: usize = le_u16(&extra[pos + 2..pos + 4]) as usize;
        if field_id == id {
            return true;
        }
        pos += 4 + field_len;
    }
    false
}

/// Convert MS-DOS date/time fields to seconds since the epoch.
fn dos_to_unix(date: u16, time: u16) -> i64 {
    let year: i64 = ((date >> 9) & 0x7f) as i64 + 1980;
    let month: i64 = (((date >> 5) & 0x0f) as i64).max(1);
    let day: i64 = ((date & 0x1f) as i64).max(1);
    let hour: i64 = ((time >> 11) & 0x1f) as i64;
    let minute: i64 = ((time >> 5) & 0x3f) as i64;
    let second: i64 = ((time & 0x1f) as i64) * 2;
    days_from_civil(year, month, day) * 86_400 + hour * 3_600 + minute * 60 + second
}

/// Days since 1970-01-01 for a proleptic Gregorian date.
fn days_from_civil(year: i64, month: i64, day: i64) -> i64 {
    let y: i64 = if month <= 2 { year - 1 } else { year };
    let era: i64 = if y >= 0 { y } else { y - 399 } / 400;
    let yoe: i64 = y - era * 400;
    let mp: i64 = if month > 2 { month - 3 } else { month + 9 };
    let doy: i64 = (153 * mp + 2) / 5 + day - 1;
    let doe: i64 = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

#[inline]
fn le_u16(b: &[u8]) -> u16 {
    u16::from_le_bytes([b[0], b[1]])
}

#[inline]
fn le_u32(b: &[u8]) -> u32 {
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::passphrase::PassphraseProvider;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn open_stream(bytes: &[u8], passphrase: PassphraseProvider) -> ZipStream {
        let mut tmp: NamedTempFile = NamedTempFile::new().unwrap();
        tmp.write_all(bytes).unwrap();
        tmp.flush().unwrap();
        // The open fd keeps the unlinked file readable after tmp drops.
        let file: TrackedFile = TrackedFile::open(tmp.path(), None, None).unwrap();
        ZipStream::open(file, passphrase.shared(), 16384).unwrap()
    }

    fn write_fixture_zip() -> Vec<u8> {
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut cursor);
            let stored = zip::write::FileOptions::default()
                .compression_method(zip::CompressionMethod::Stored);
            let deflated = zip::write::FileOptions::default()
                .compression_method(zip::CompressionMethod::Deflated);

            writer.start_file("a/b/c.txt", deflated).unwrap();
            writer.write_all(b"the quick brown fox".repeat(50).as_slice()).unwrap();
            writer.start_file("a/b/d.txt", stored).unwrap();
            writer.write_all(b"stored bytes").unwrap();
            writer.finish().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_iterates_central_directory_in_order() {
        let mut zs: ZipStream = open_stream(&write_fixture_zip(), PassphraseProvider::none());

        let first: EntryMetadata = zs.next_header().unwrap().unwrap();
        assert_eq!(first.pathname.as_deref(), Some("a/b/c.txt"));
        assert_eq!(first.kind, EntryKind::Regular);
        assert_eq!(first.size, Some(19 * 50));

        let second: EntryMetadata = zs.next_header().unwrap().unwrap();
        assert_eq!(second.pathname.as_deref(), Some("a/b/d.txt"));
        assert_eq!(second.size, Some(12));

        assert!(zs.next_header().unwrap().is_none());
    }

    #[test]
    fn test_reads_deflated_and_stored_payloads() {
        let mut zs: ZipStream = open_stream(&write_fixture_zip(), PassphraseProvider::none());
        let expected: Vec<u8> = b"the quick brown fox".repeat(50);

        zs.next_header().unwrap().unwrap();
        let mut out: Vec<u8> = Vec::new();
        let mut buf = [0u8; 100];
        loop {
            let n: usize = zs.read_data(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        assert_eq!(out, expected);

        zs.next_header().unwrap().unwrap();
        let mut out2 = [0u8; 64];
        let n: usize = zs.read_data(&mut out2).unwrap();
        assert_eq!(&out2[..n], b"stored bytes");
    }

    #[test]
    fn test_partial_read_then_advance() {
        let mut zs: ZipStream = open_stream(&write_fixture_zip(), PassphraseProvider::none());
        zs.next_header().unwrap().unwrap();
        let mut buf = [0u8; 8];
        zs.read_data(&mut buf).unwrap();

        let second: EntryMetadata = zs.next_header().unwrap().unwrap();
        assert_eq!(second.pathname.as_deref(), Some("a/b/d.txt"));
    }

    #[test]
    fn test_empty_zip() {
        let mut cursor = std::io::Cursor::new(Vec::new());
        zip::ZipWriter::new(&mut cursor).finish().unwrap();
        let bytes: Vec<u8> = cursor.into_inner();

        let mut zs: ZipStream = open_stream(&bytes, PassphraseProvider::none());
        assert!(zs.next_header().unwrap().is_none());
    }

    #[test]
    fn test_not_a_zip_is_rejected() {
        let mut tmp: NamedTempFile = NamedTempFile::new().unwrap();
        tmp.write_all(&[0u8; 200]).unwrap();
        tmp.flush().unwrap();
        let file: TrackedFile = TrackedFile::open(tmp.path(), None, None).unwrap();
        assert!(ZipStream::open(file, PassphraseProvider::none().shared(), 16384).is_err());
    }

    // Hand-built single-entry zip with ZipCrypto encryption, since the
    // zip writer crate cannot produce encrypted archives.
    fn write_encrypted_zip(passphrase: &[u8], plain: &[u8]) -> Vec<u8> {
        let crc: u32 = {
            let mut c: u32 = 0xFFFF_FFFF;
            for &b in plain {
                c = crc32_step(c, b);
            }
            c ^ 0xFFFF_FFFF
        };

        let mut cipher: ZipCrypto = ZipCrypto::new(passphrase);
        let mut body: Vec<u8> = Vec::new();
        let mut header: Vec<u8> = vec![0x55u8; 11];
        header.push((crc >> 24) as u8);
        cipher.encrypt(&mut header);
        body.extend_from_slice(&header);
        let mut data: Vec<u8> = plain.to_vec();
        cipher.encrypt(&mut data);
        body.extend_from_slice(&data);

        let name: &[u8] = b"secret.txt";
        let comp_size: u32 = body.len() as u32;
        let uncomp_size: u32 = plain.len() as u32;

        let mut out: Vec<u8> = Vec::new();
        // local file header
        out.extend_from_slice(&SIG_LFH.to_le_bytes());
        out.extend_from_slice(&20u16.to_le_bytes()); // version needed
        out.extend_from_slice(&FLAG_ENCRYPTED.to_le_bytes());
        out.extend_from_slice(&METHOD_STORED.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // dos time
        out.extend_from_slice(&0x2921u16.to_le_bytes()); // dos date
        out.extend_from_slice(&crc.to_le_bytes());
        out.extend_from_slice(&comp_size.to_le_bytes());
        out.extend_from_slice(&uncomp_size.to_le_bytes());
        out.extend_from_slice(&(name.len() as u16).to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(name);
        out.extend_from_slice(&body);

        let cd_off: u32 = out.len() as u32;
        // central directory entry
        out.extend_from_slice(&SIG_CDFH.to_le_bytes());
        out.extend_from_slice(&0x0314u16.to_le_bytes()); // made by unix
        out.extend_from_slice(&20u16.to_le_bytes());
        out.extend_from_slice(&FLAG_ENCRYPTED.to_le_bytes());
        out.extend_from_slice(&METHOD_STORED.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0x2921u16.to_le_bytes());
        out.extend_from_slice(&crc.to_le_bytes());
        out.extend_from_slice(&comp_size.to_le_bytes());
        out.extend_from_slice(&uncomp_size.to_le_bytes());
        out.extend_from_slice(&(name.len() as u16).to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // extra len
        out.extend_from_slice(&0u16.to_le_bytes()); // comment len
        out.extend_from_slice(&0u16.to_le_bytes()); // disk start
        out.extend_from_slice(&0u16.to_le_bytes()); // internal attrs
        out.extend_from_slice(&(0o100644u32 << 16).to_le_bytes()); // external attrs
        out.extend_from_slice(&0u32.to_le_bytes()); // lfh offset
        out.extend_from_slice(name);
        let cd_size: u32 = out.len() as u32 - cd_off;

        // end of central directory
        out.extend_from_slice(&SIG_EOCD.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&cd_size.to_le_bytes());
        out.extend_from_slice(&cd_off.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out
    }

    #[test]
    fn test_encrypted_entry_with_correct_passphrase() {
        let bytes: Vec<u8> = write_encrypted_zip(b"opensesame", b"top secret contents");
        let mut zs: ZipStream = open_stream(&bytes, PassphraseProvider::fixed("opensesame"));

        let meta: EntryMetadata = zs.next_header().unwrap().unwrap();
        assert!(meta.encrypted);

        let mut buf = [0u8; 64];
        let n: usize = zs.read_data(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"top secret contents");
    }

    #[test]
    fn test_encrypted_entry_with_wrong_passphrase() {
        let bytes: Vec<u8> = write_encrypted_zip(b"opensesame", b"top secret contents");
        let mut zs: ZipStream = open_stream(&bytes, PassphraseProvider::fixed("letmein"));

        zs.next_header().unwrap().unwrap();
        let mut buf = [0u8; 64];
        let err: CodecError = zs.read_data(&mut buf).unwrap_err();
        assert!(matches!(err, CodecError::PassphraseIncorrect));
    }

    #[test]
    fn test_encrypted_entry_without_passphrase() {
        let bytes: Vec<u8> = write_encrypted_zip(b"opensesame", b"top secret contents");
        let mut zs: ZipStream = open_stream(&bytes, PassphraseProvider::none());

        zs.next_header().unwrap().unwrap();
        let mut buf = [0u8; 64];
        let err: CodecError = zs.read_data(&mut buf).unwrap_err();
        assert!(matches!(err, CodecError::PassphraseRequired));
    }

    #[test]
    fn test_dos_time_conversion() {
        // 2021-01-01 00:00:00 -> DOS date (41 << 9) | (1 << 5) | 1
        let date: u16 = (41 << 9) | (1 << 5) | 1;
        assert_eq!(dos_to_unix(date, 0), 1_609_459_200);
    }
}
