//! # Archive Format and Pipeline
//!
//! This module owns the outer archive layout and the three operations on
//! it: `pack`, `unpack` and `verify`.
//!
//! ## Format Specification
//!
//! ```text
//! offset 0    : ArchiveHeader (272 bytes, little-endian)
//!   0   (8)   : timestamp  i64, seconds since epoch, set at pack time
//!   8   (4)   : checksum   u32, CRC32 over bytes 272..EOF as stored
//!   12  (256) : comment    UTF-8, NUL-padded, never interpreted
//!   268 (1)   : mod        bit0 compressed, bit1 encrypted, others 0
//!   269 (3)   : reserved   zero
//! offset 272  : body — the entry stream, as a whole optionally
//!               LZW-framed and then optionally AES-CBC enciphered,
//!               per the mod bits
//! ```
//!
//! Packing is two-phase: the entry stream is first written to a scratch
//! temp file next to the target, then transformed in memory and emitted as
//! `header || body`. The header carries the CRC of the *stored* body, so
//! `verify` needs neither the password nor decompression. The header is
//! always serialized field by field; its in-memory layout never reaches
//! the file.

use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use tempfile::NamedTempFile;

use crate::checksum::{crc32, Crc32};
use crate::compress;
use crate::crypto;
use crate::entry::{self, InodeTable};
use crate::error::{io_err, PackError};
use crate::walk::{self, Predicate};

/// Fixed size of the archive header on wire.
pub const HEADER_SIZE: usize = 272;

/// Width of the NUL-padded comment field.
pub const COMMENT_SIZE: usize = 256;

/// `mod` bit: the body is an LZW frame.
pub const MOD_COMPRESSED: u8 = 0b0000_0001;

/// `mod` bit: the body is AES-256-CBC ciphertext.
pub const MOD_ENCRYPTED: u8 = 0b0000_0010;

const MOD_KNOWN: u8 = MOD_COMPRESSED | MOD_ENCRYPTED;

/// The fixed-size header at the start of every archive.
#[derive(Debug, Clone)]
pub struct ArchiveHeader {
    /// Pack time, seconds since the epoch.
    pub timestamp: i64,
    /// CRC32 of every byte after the header, as stored.
    pub checksum: u32,
    /// Free-text comment bytes; never interpreted by the core.
    comment: [u8; COMMENT_SIZE],
    /// Transform flags describing the body as stored.
    pub mod_flags: u8,
}

impl ArchiveHeader {
    fn new(comment: &str, mod_flags: u8) -> Self {
        let mut field = [0u8; COMMENT_SIZE];
        let bytes = comment.as_bytes();
        let len = bytes.len().min(COMMENT_SIZE);
        field[..len].copy_from_slice(&bytes[..len]);
        ArchiveHeader {
            timestamp: Utc::now().timestamp(),
            checksum: 0,
            comment: field,
            mod_flags,
        }
    }

    pub fn is_compressed(&self) -> bool {
        self.mod_flags & MOD_COMPRESSED != 0
    }

    pub fn is_encrypted(&self) -> bool {
        self.mod_flags & MOD_ENCRYPTED != 0
    }

    /// The comment with its NUL padding stripped.
    pub fn comment(&self) -> String {
        let end = self
            .comment
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(COMMENT_SIZE);
        String::from_utf8_lossy(&self.comment[..end]).into_owned()
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..8].copy_from_slice(&self.timestamp.to_le_bytes());
        buf[8..12].copy_from_slice(&self.checksum.to_le_bytes());
        buf[12..268].copy_from_slice(&self.comment);
        buf[268] = self.mod_flags;
        // bytes 269..272 stay reserved-zero
        buf
    }

    pub fn from_bytes(buf: &[u8; HEADER_SIZE]) -> Result<Self, PackError> {
        let mod_flags = buf[268];
        if mod_flags & !MOD_KNOWN != 0 {
            return Err(PackError::BadArchive(format!(
                "unknown mod flags {:#04x}",
                mod_flags
            )));
        }
        let mut comment = [0u8; COMMENT_SIZE];
        comment.copy_from_slice(&buf[12..268]);
        Ok(ArchiveHeader {
            timestamp: i64::from_le_bytes(buf[0..8].try_into().unwrap()),
            checksum: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
            comment,
            mod_flags,
        })
    }
}

/// Options for [`pack`].
#[derive(Debug, Clone, Default)]
pub struct PackOptions {
    /// LZW-compress the body.
    pub compress: bool,
    /// AES-encrypt the body; requires a non-empty `password`.
    pub encrypt: bool,
    /// Password for encryption.
    pub password: Option<String>,
    /// Free-text comment stored in the header.
    pub comment: String,
}

/// Options for [`unpack`].
#[derive(Debug, Clone, Default)]
pub struct UnpackOptions {
    /// Password for encrypted archives.
    pub password: Option<String>,
    /// Re-apply permissions, ownership and timestamps to restored entries.
    pub restore_metadata: bool,
}

/// Packs the subtree under `source` into the archive file `target`.
///
/// Entries are those descendants of `source` accepted by `predicate`, in
/// deterministic pre-order, stored with paths relative to `source`.
pub fn pack(
    source: &Path,
    target: &Path,
    options: &PackOptions,
    predicate: &Predicate,
) -> Result<(), PackError> {
    if options.encrypt && options.password.as_deref().map_or(true, str::is_empty) {
        return Err(PackError::MissingPassword);
    }

    let source = fs::canonicalize(source).map_err(|e| io_err(e, source))?;
    log::info!("packing {} -> {}", source.display(), target.display());

    let entries = walk::collect_entries(&source, predicate)?;

    // Phase one: the raw entry stream, staged in a scratch file next to the
    // target so a failed pack never leaves a half-written archive behind.
    let scratch_dir = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut scratch = NamedTempFile::new_in(scratch_dir).map_err(|e| io_err(e, scratch_dir))?;
    {
        let mut writer = BufWriter::new(scratch.as_file_mut());
        let mut inodes = InodeTable::new();
        for rel in &entries {
            entry::pack_entry(&mut writer, &source, rel, &mut inodes)?;
        }
        writer.flush()?;
    }

    let mut body = Vec::new();
    scratch.as_file_mut().seek(SeekFrom::Start(0))?;
    scratch.as_file_mut().read_to_end(&mut body)?;
    drop(scratch);

    // Phase two: whole-body transforms, then the header over the result.
    let mut mod_flags = 0u8;
    if options.compress {
        let raw_len = body.len();
        body = compress::compress(&body);
        mod_flags |= MOD_COMPRESSED;
        log::info!("compressed body: {} -> {} bytes", raw_len, body.len());
    }
    if options.encrypt {
        let password = options.password.as_deref().unwrap_or_default();
        body = crypto::encrypt(password, &body);
        mod_flags |= MOD_ENCRYPTED;
    }

    let mut header = ArchiveHeader::new(&options.comment, mod_flags);
    header.checksum = crc32(&body);

    let out = File::create(target).map_err(|e| io_err(e, target))?;
    let mut out = BufWriter::new(out);
    out.write_all(&header.to_bytes()).map_err(|e| io_err(e, target))?;
    out.write_all(&body).map_err(|e| io_err(e, target))?;
    out.flush().map_err(|e| io_err(e, target))?;

    log::info!("packed {} entries into {}", entries.len(), target.display());
    Ok(())
}

/// Opens an archive and decodes its body back to the raw entry stream,
/// undoing the stored transforms in reverse order.
fn read_body(archive: &Path, options: &UnpackOptions) -> Result<Vec<u8>, PackError> {
    let mut file = File::open(archive).map_err(|e| io_err(e, archive))?;
    let header = read_header_from(&mut file)?;

    let mut body = Vec::new();
    file.read_to_end(&mut body).map_err(|e| io_err(e, archive))?;

    if header.is_encrypted() {
        let password = options
            .password
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or(PackError::MissingPassword)?;
        body = crypto::decrypt(password, &body)?;
    }
    if header.is_compressed() {
        body = compress::decompress(&body)?;
    }
    Ok(body)
}

/// Unpacks `archive` under `restore_root`, recreating the tree inside a
/// directory named after the archive's stem. Returns that directory.
pub fn unpack(
    archive: &Path,
    restore_root: &Path,
    options: &UnpackOptions,
) -> Result<PathBuf, PackError> {
    log::info!("unpacking {} -> {}", archive.display(), restore_root.display());

    let body = read_body(archive, options)?;

    let stem = archive
        .file_stem()
        .ok_or_else(|| PackError::BadArchive("archive path has no stem".into()))?;
    let project_dir = restore_root.join(stem);
    fs::create_dir_all(&project_dir).map_err(|e| io_err(e, &project_dir))?;

    let mut body = io::Cursor::new(body);
    let mut restored = 0usize;
    while let Some(entry_header) = entry::read_entry_header(&mut body)? {
        entry::unpack_entry(&mut body, &entry_header, &project_dir, options.restore_metadata)?;
        restored += 1;
    }

    log::info!("restored {} entries into {}", restored, project_dir.display());
    Ok(project_dir)
}

/// Lists an archive's entries without restoring anything. The body still
/// has to be decoded, so listing an encrypted archive needs the password.
pub fn list(archive: &Path, options: &UnpackOptions) -> Result<Vec<entry::EntryHeader>, PackError> {
    let body = read_body(archive, options)?;
    let mut body = io::Cursor::new(body);

    let mut entries = Vec::new();
    while let Some(entry_header) = entry::read_entry_header(&mut body)? {
        entry::skip_entry_payload(&mut body, &entry_header)?;
        entries.push(entry_header);
    }
    Ok(entries)
}

/// Checks archive integrity: recomputes the body CRC and compares it with
/// the stored one. Works on encrypted archives without the password, since
/// the checksum covers the body as stored. Returns the parsed header.
pub fn verify(archive: &Path) -> Result<ArchiveHeader, PackError> {
    let mut file = File::open(archive).map_err(|e| io_err(e, archive))?;
    let header = read_header_from(&mut file)?;

    let mut state = Crc32::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = file.read(&mut buf).map_err(|e| io_err(e, archive))?;
        if n == 0 {
            break;
        }
        state.update(&buf[..n]);
    }
    let computed = state.finalize();

    if computed != header.checksum {
        return Err(PackError::ChecksumMismatch { stored: header.checksum, computed });
    }
    log::info!(
        "verified {}: packed at {}, compressed={}, encrypted={}",
        archive.display(),
        header.timestamp,
        header.is_compressed(),
        header.is_encrypted()
    );
    Ok(header)
}

/// Reads just the archive header, without touching the body. Useful for
/// listing an archive's timestamp, comment and transform flags.
pub fn read_header(archive: &Path) -> Result<ArchiveHeader, PackError> {
    let mut file = File::open(archive).map_err(|e| io_err(e, archive))?;
    read_header_from(&mut file)
}

fn read_header_from<R: Read>(r: &mut R) -> Result<ArchiveHeader, PackError> {
    let mut buf = [0u8; HEADER_SIZE];
    r.read_exact(&mut buf).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            PackError::BadArchive("archive shorter than its 272-byte header".into())
        } else {
            e.into()
        }
    })?;
    ArchiveHeader::from_bytes(&buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout_is_exactly_272_bytes() {
        let header = ArchiveHeader::new("hello", MOD_COMPRESSED);
        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), HEADER_SIZE);
        assert_eq!(&bytes[12..17], b"hello");
        assert_eq!(bytes[268], MOD_COMPRESSED);
        assert_eq!(&bytes[269..272], &[0, 0, 0]);
    }

    #[test]
    fn header_roundtrip() {
        let mut header = ArchiveHeader::new("a comment", MOD_COMPRESSED | MOD_ENCRYPTED);
        header.checksum = 0xDEAD_BEEF;
        let parsed = ArchiveHeader::from_bytes(&header.to_bytes()).unwrap();
        assert_eq!(parsed.timestamp, header.timestamp);
        assert_eq!(parsed.checksum, 0xDEAD_BEEF);
        assert_eq!(parsed.comment(), "a comment");
        assert!(parsed.is_compressed());
        assert!(parsed.is_encrypted());
    }

    #[test]
    fn unknown_mod_bits_rejected() {
        let mut bytes = ArchiveHeader::new("", 0).to_bytes();
        bytes[268] = 0b0000_0100;
        assert!(matches!(
            ArchiveHeader::from_bytes(&bytes),
            Err(PackError::BadArchive(_))
        ));
    }

    #[test]
    fn overlong_comment_is_clipped_to_the_field() {
        let long = "x".repeat(COMMENT_SIZE + 50);
        let header = ArchiveHeader::new(&long, 0);
        assert_eq!(header.comment().len(), COMMENT_SIZE);
    }

    #[test]
    fn short_file_is_a_bad_archive() {
        let mut short = io::Cursor::new(vec![0u8; HEADER_SIZE - 1]);
        assert!(matches!(
            read_header_from(&mut short),
            Err(PackError::BadArchive(_))
        ));
    }
}
