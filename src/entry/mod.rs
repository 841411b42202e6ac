//! Per-entry wire codec.
//!
//! Each filesystem object becomes one entry in the archive body: a fixed
//! 172-byte header (100-byte NUL-padded path field plus the stat record,
//! all little-endian, serialized field by field) followed by a
//! kind-dependent payload:
//!
//! - directory, fifo: nothing
//! - symlink: a long-path block holding the target bytes verbatim
//! - regular file, wire nlink = 1: `size` content bytes
//! - regular file, wire nlink > 1: a long-path block pointing at the
//!   canonical entry that carries the content
//!
//! The first entry seen for a multi-link inode is the canonical carrier;
//! its wire nlink is forced to 1 so readers can tell the two shapes apart.
//! A path that does not fit the 100-byte field leaves the field all-NUL
//! (a stored relative path is never empty, so a leading NUL is
//! unambiguous) and travels in a long-path block right after the header.

use std::collections::hash_map::Entry as MapEntry;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::MetadataExt;
use std::path::{Component, Path, PathBuf};

use crate::error::{io_err, PackError};

/// Width of the fixed path field; paths up to one byte shorter fit inline.
pub const PATH_FIELD_LEN: usize = 100;

/// Fixed size of a serialized entry header.
pub const ENTRY_HEADER_SIZE: usize = PATH_FIELD_LEN + 3 * 4 + 3 * 8 + 3 * (8 + 4);

/// Upper bound for a long-path block; anything larger is corruption.
const LONG_PATH_MAX: u32 = 1 << 20;

const S_IFMT: u32 = 0o170000;
const S_IFREG: u32 = 0o100000;
const S_IFDIR: u32 = 0o040000;
const S_IFLNK: u32 = 0o120000;
const S_IFIFO: u32 = 0o010000;

/// The file kinds the archive can represent, derived from the mode's type
/// bits. Hard links are not a kind of their own: they are regular-file
/// entries whose wire shape depends on the link count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Regular,
    Directory,
    Symlink,
    Fifo,
}

impl EntryKind {
    pub fn from_mode(mode: u32) -> Option<Self> {
        match mode & S_IFMT {
            S_IFREG => Some(EntryKind::Regular),
            S_IFDIR => Some(EntryKind::Directory),
            S_IFLNK => Some(EntryKind::Symlink),
            S_IFIFO => Some(EntryKind::Fifo),
            _ => None,
        }
    }
}

/// One timestamp on the wire: whole seconds plus nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimeField {
    pub secs: i64,
    pub nanos: u32,
}

/// The platform-neutral per-entry metadata record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryHeader {
    /// Path relative to the archive root.
    pub path: PathBuf,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub nlink: u64,
    pub ino: u64,
    pub atime: TimeField,
    pub mtime: TimeField,
    pub ctime: TimeField,
}

impl EntryHeader {
    /// Builds a header from an `lstat` result.
    pub fn from_fs(rel_path: &Path, meta: &fs::Metadata) -> Self {
        EntryHeader {
            path: rel_path.to_path_buf(),
            mode: meta.mode(),
            uid: meta.uid(),
            gid: meta.gid(),
            size: meta.size(),
            nlink: meta.nlink(),
            ino: meta.ino(),
            atime: TimeField { secs: meta.atime(), nanos: meta.atime_nsec() as u32 },
            mtime: TimeField { secs: meta.mtime(), nanos: meta.mtime_nsec() as u32 },
            ctime: TimeField { secs: meta.ctime(), nanos: meta.ctime_nsec() as u32 },
        }
    }

    pub fn kind(&self) -> Option<EntryKind> {
        EntryKind::from_mode(self.mode)
    }

    /// Serializes the fixed header block, plus the long-path block when the
    /// entry path overflows the fixed field.
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<(), PackError> {
        let path_bytes = self.path.as_os_str().as_bytes();
        let inline = path_bytes.len() < PATH_FIELD_LEN;

        let mut name = [0u8; PATH_FIELD_LEN];
        if inline {
            name[..path_bytes.len()].copy_from_slice(path_bytes);
        }
        w.write_all(&name)?;

        w.write_all(&self.mode.to_le_bytes())?;
        w.write_all(&self.uid.to_le_bytes())?;
        w.write_all(&self.gid.to_le_bytes())?;
        w.write_all(&self.size.to_le_bytes())?;
        w.write_all(&self.nlink.to_le_bytes())?;
        w.write_all(&self.ino.to_le_bytes())?;
        for t in [&self.atime, &self.mtime, &self.ctime] {
            w.write_all(&t.secs.to_le_bytes())?;
            w.write_all(&t.nanos.to_le_bytes())?;
        }

        if !inline {
            write_long_path(w, path_bytes)?;
        }
        Ok(())
    }
}

/// Reads the next entry header, or `None` at a clean end of the body.
/// A partial header is truncation, not end-of-archive.
pub fn read_entry_header<R: Read>(r: &mut R) -> Result<Option<EntryHeader>, PackError> {
    let mut buf = [0u8; ENTRY_HEADER_SIZE];
    let mut filled = 0;
    while filled < buf.len() {
        let n = r.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    if filled == 0 {
        return Ok(None);
    }
    if filled < buf.len() {
        return Err(PackError::BadArchive(format!(
            "truncated entry header ({} of {} bytes)",
            filled, ENTRY_HEADER_SIZE
        )));
    }

    fn u32_at(buf: &[u8], at: usize) -> u32 {
        u32::from_le_bytes(buf[at..at + 4].try_into().unwrap())
    }
    fn u64_at(buf: &[u8], at: usize) -> u64 {
        u64::from_le_bytes(buf[at..at + 8].try_into().unwrap())
    }
    fn time_at(buf: &[u8], at: usize) -> TimeField {
        TimeField { secs: u64_at(buf, at) as i64, nanos: u32_at(buf, at + 8) }
    }

    let name = &buf[..PATH_FIELD_LEN];
    let mode = u32_at(&buf, PATH_FIELD_LEN);
    let uid = u32_at(&buf, PATH_FIELD_LEN + 4);
    let gid = u32_at(&buf, PATH_FIELD_LEN + 8);
    let size = u64_at(&buf, PATH_FIELD_LEN + 12);
    let nlink = u64_at(&buf, PATH_FIELD_LEN + 20);
    let ino = u64_at(&buf, PATH_FIELD_LEN + 28);
    let atime = time_at(&buf, PATH_FIELD_LEN + 36);
    let mtime = time_at(&buf, PATH_FIELD_LEN + 48);
    let ctime = time_at(&buf, PATH_FIELD_LEN + 60);

    let path_bytes = if name[0] == 0 {
        read_long_path(r)?
    } else {
        let end = name.iter().position(|&b| b == 0).unwrap_or(PATH_FIELD_LEN);
        name[..end].to_vec()
    };
    let path = decode_rel_path(&path_bytes)?;

    Ok(Some(EntryHeader {
        path,
        mode,
        uid,
        gid,
        size,
        nlink,
        ino,
        atime,
        mtime,
        ctime,
    }))
}

/// Writes a `u32 length || bytes` block.
pub fn write_long_path<W: Write>(w: &mut W, bytes: &[u8]) -> Result<(), PackError> {
    w.write_all(&(bytes.len() as u32).to_le_bytes())?;
    w.write_all(bytes)?;
    Ok(())
}

/// Reads a `u32 length || bytes` block.
pub fn read_long_path<R: Read>(r: &mut R) -> Result<Vec<u8>, PackError> {
    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf).map_err(truncation)?;
    let len = u32::from_le_bytes(len_buf);
    if len > LONG_PATH_MAX {
        return Err(PackError::BadArchive(format!(
            "implausible long-path length {}",
            len
        )));
    }
    let mut bytes = vec![0u8; len as usize];
    r.read_exact(&mut bytes).map_err(truncation)?;
    Ok(bytes)
}

fn truncation(err: io::Error) -> PackError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        PackError::BadArchive("archive body truncated".into())
    } else {
        err.into()
    }
}

/// Validates and decodes a stored path: it must be relative and made of
/// plain components only. Symlink *targets* are exempt; they are restored
/// verbatim and never joined under the restore root.
fn decode_rel_path(bytes: &[u8]) -> Result<PathBuf, PackError> {
    if bytes.is_empty() {
        return Err(PackError::BadArchive("empty entry path".into()));
    }
    let path = PathBuf::from(std::ffi::OsStr::from_bytes(bytes));
    for component in path.components() {
        match component {
            Component::Normal(_) => {}
            _ => {
                return Err(PackError::BadArchive(format!(
                    "unsafe entry path '{}'",
                    path.display()
                )))
            }
        }
    }
    Ok(path)
}

/// Pack-scoped map from inode id to the relative path of the entry that
/// carries that inode's content.
#[derive(Debug, Default)]
pub struct InodeTable {
    map: HashMap<u64, PathBuf>,
}

impl InodeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `path` as the carrier for `ino` if the inode is unseen and
    /// returns `None` ("you are the carrier"); otherwise returns the
    /// canonical path recorded earlier ("point at this").
    pub fn record(&mut self, ino: u64, path: &Path) -> Option<&Path> {
        match self.map.entry(ino) {
            MapEntry::Occupied(occupied) => Some(occupied.into_mut().as_path()),
            MapEntry::Vacant(vacant) => {
                vacant.insert(path.to_path_buf());
                None
            }
        }
    }
}

/// Encodes the filesystem object at `base/rel` into `w`.
///
/// Unsupported kinds (sockets, devices) are skipped with a warning, the
/// way the packer has always treated them.
pub fn pack_entry<W: Write>(
    w: &mut W,
    base: &Path,
    rel: &Path,
    inodes: &mut InodeTable,
) -> Result<(), PackError> {
    let abs = base.join(rel);
    let meta = fs::symlink_metadata(&abs).map_err(|e| io_err(e, &abs))?;
    let mut header = EntryHeader::from_fs(rel, &meta);

    let kind = match header.kind() {
        Some(kind) => kind,
        None => {
            log::warn!("skipping unsupported file type: {}", rel.display());
            return Ok(());
        }
    };
    log::debug!("packing {}", rel.display());

    match kind {
        EntryKind::Directory | EntryKind::Fifo => header.write_to(w),
        EntryKind::Symlink => {
            let target = fs::read_link(&abs).map_err(|e| io_err(e, &abs))?;
            header.write_to(w)?;
            write_long_path(w, target.as_os_str().as_bytes())
        }
        EntryKind::Regular => {
            if header.nlink > 1 {
                if let Some(canonical) = inodes.record(header.ino, rel) {
                    // Content already carried by an earlier entry; keep the
                    // original nlink so readers recognize the pointer shape.
                    let canonical_bytes = canonical.as_os_str().as_bytes().to_vec();
                    header.write_to(w)?;
                    return write_long_path(w, &canonical_bytes);
                }
                // First sighting of this inode: this entry carries the bytes.
                header.nlink = 1;
            }
            header.write_to(w)?;
            write_regular_content(w, &abs, header.size)
        }
    }
}

fn write_regular_content<W: Write>(w: &mut W, abs: &Path, size: u64) -> Result<(), PackError> {
    let file = File::open(abs).map_err(|e| io_err(e, abs))?;
    let copied = io::copy(&mut file.take(size), w).map_err(|e| io_err(e, abs))?;
    if copied != size {
        // The header already promised `size` bytes; a file that shrank
        // underneath us would corrupt every entry after it.
        return Err(io_err(
            io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("file shrank while packing ({} of {} bytes)", copied, size),
            ),
            abs,
        ));
    }
    Ok(())
}

/// Decodes one entry whose header has already been read, materializing it
/// under `base`.
pub fn unpack_entry<R: Read>(
    r: &mut R,
    header: &EntryHeader,
    base: &Path,
    restore_metadata: bool,
) -> Result<(), PackError> {
    let kind = header.kind().ok_or_else(|| {
        PackError::BadArchive(format!(
            "unknown entry kind for '{}' (mode {:#o})",
            header.path.display(),
            header.mode
        ))
    })?;
    let dest = base.join(&header.path);
    log::debug!("restoring {}", header.path.display());

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| io_err(e, parent))?;
    }
    clear_destination(&dest, kind)?;

    let mut is_pointer = false;
    match kind {
        EntryKind::Directory => {
            fs::create_dir_all(&dest).map_err(|e| io_err(e, &dest))?;
        }
        EntryKind::Fifo => {
            let perms = nix::sys::stat::Mode::from_bits_truncate(header.mode & 0o777);
            nix::unistd::mkfifo(&dest, perms)
                .map_err(|e| io_err(io::Error::from(e), &dest))?;
        }
        EntryKind::Symlink => {
            let target = read_long_path(r)?;
            let target = std::ffi::OsStr::from_bytes(&target);
            std::os::unix::fs::symlink(target, &dest).map_err(|e| io_err(e, &dest))?;
        }
        EntryKind::Regular => {
            if header.nlink > 1 {
                let canonical = decode_rel_path(&read_long_path(r)?)?;
                let original = base.join(&canonical);
                fs::hard_link(&original, &dest).map_err(|e| io_err(e, &dest))?;
                is_pointer = true;
            } else {
                let mut out = File::create(&dest).map_err(|e| io_err(e, &dest))?;
                let copied =
                    io::copy(&mut r.take(header.size), &mut out).map_err(|e| io_err(e, &dest))?;
                if copied != header.size {
                    return Err(PackError::BadArchive(format!(
                        "truncated content for '{}' ({} of {} bytes)",
                        header.path.display(),
                        copied,
                        header.size
                    )));
                }
            }
        }
    }

    // A pointer shares the carrier's inode, so its metadata was already
    // applied through the carrier.
    if restore_metadata && !is_pointer {
        crate::metadata::apply(&dest, header, kind);
    }
    Ok(())
}

/// Consumes an entry's payload without materializing anything, leaving the
/// reader at the next entry header. Used for listing.
pub fn skip_entry_payload<R: Read>(r: &mut R, header: &EntryHeader) -> Result<(), PackError> {
    let kind = header.kind().ok_or_else(|| {
        PackError::BadArchive(format!(
            "unknown entry kind for '{}' (mode {:#o})",
            header.path.display(),
            header.mode
        ))
    })?;
    match kind {
        EntryKind::Directory | EntryKind::Fifo => Ok(()),
        EntryKind::Symlink => read_long_path(r).map(drop),
        EntryKind::Regular => {
            if header.nlink > 1 {
                return read_long_path(r).map(drop);
            }
            let skipped = io::copy(&mut r.take(header.size), &mut io::sink())?;
            if skipped != header.size {
                return Err(PackError::BadArchive(format!(
                    "truncated content for '{}' ({} of {} bytes)",
                    header.path.display(),
                    skipped,
                    header.size
                )));
            }
            Ok(())
        }
    }
}

/// Removes whatever occupies the destination path, keeping a directory in
/// place when a directory is about to be restored over it.
fn clear_destination(dest: &Path, kind: EntryKind) -> Result<(), PackError> {
    match fs::symlink_metadata(dest) {
        Ok(existing) => {
            if existing.is_dir() {
                if kind != EntryKind::Directory {
                    fs::remove_dir_all(dest).map_err(|e| io_err(e, dest))?;
                }
            } else {
                fs::remove_file(dest).map_err(|e| io_err(e, dest))?;
            }
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_err(e, dest)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample_header(path: &str) -> EntryHeader {
        EntryHeader {
            path: PathBuf::from(path),
            mode: S_IFREG | 0o644,
            uid: 1000,
            gid: 1000,
            size: 42,
            nlink: 1,
            ino: 987_654,
            atime: TimeField { secs: 1_700_000_000, nanos: 123_456_789 },
            mtime: TimeField { secs: 1_700_000_100, nanos: 999_999_999 },
            ctime: TimeField { secs: 1_700_000_200, nanos: 1 },
        }
    }

    #[test]
    fn header_roundtrip() {
        let header = sample_header("dir/file.txt");
        let mut buf = Vec::new();
        header.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), ENTRY_HEADER_SIZE);

        let parsed = read_entry_header(&mut Cursor::new(&buf)).unwrap().unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn header_roundtrip_long_path() {
        let long = "d/".repeat(80) + "file.txt";
        assert!(long.len() > PATH_FIELD_LEN);
        let header = sample_header(&long);

        let mut buf = Vec::new();
        header.write_to(&mut buf).unwrap();
        // Fixed block + u32 length + the path itself.
        assert_eq!(buf.len(), ENTRY_HEADER_SIZE + 4 + long.len());
        assert!(buf[..PATH_FIELD_LEN].iter().all(|&b| b == 0));

        let parsed = read_entry_header(&mut Cursor::new(&buf)).unwrap().unwrap();
        assert_eq!(parsed.path, PathBuf::from(long));
    }

    #[test]
    fn clean_eof_yields_none() {
        assert!(read_entry_header(&mut Cursor::new(&[][..])).unwrap().is_none());
    }

    #[test]
    fn partial_header_is_truncation() {
        let header = sample_header("a");
        let mut buf = Vec::new();
        header.write_to(&mut buf).unwrap();
        buf.truncate(ENTRY_HEADER_SIZE - 1);
        assert!(matches!(
            read_entry_header(&mut Cursor::new(&buf)),
            Err(PackError::BadArchive(_))
        ));
    }

    #[test]
    fn long_path_framer_roundtrip() {
        let mut buf = Vec::new();
        write_long_path(&mut buf, b"some/target").unwrap();
        assert_eq!(&buf[..4], &11u32.to_le_bytes());
        assert_eq!(read_long_path(&mut Cursor::new(&buf)).unwrap(), b"some/target");
    }

    #[test]
    fn long_path_framer_carries_4096_byte_targets() {
        let target = vec![b't'; 4096];
        let mut buf = Vec::new();
        write_long_path(&mut buf, &target).unwrap();
        assert_eq!(read_long_path(&mut Cursor::new(&buf)).unwrap(), target);
    }

    #[test]
    fn long_path_implausible_length_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(LONG_PATH_MAX + 1).to_le_bytes());
        assert!(matches!(
            read_long_path(&mut Cursor::new(&buf)),
            Err(PackError::BadArchive(_))
        ));
    }

    #[test]
    fn unsafe_paths_rejected() {
        for bad in ["/etc/passwd", "../escape", "a/../../b", ""] {
            assert!(
                decode_rel_path(bad.as_bytes()).is_err(),
                "accepted '{}'",
                bad
            );
        }
        assert!(decode_rel_path(b"plain/nested/file").is_ok());
    }

    #[test]
    fn inode_table_first_sighting_is_carrier() {
        let mut table = InodeTable::new();
        assert!(table.record(7, Path::new("a/x")).is_none());
        assert_eq!(table.record(7, Path::new("a/y")).unwrap(), Path::new("a/x"));
        // A different inode starts its own chain.
        assert!(table.record(8, Path::new("a/z")).is_none());
    }

    #[test]
    fn kind_from_mode() {
        assert_eq!(EntryKind::from_mode(S_IFREG | 0o644), Some(EntryKind::Regular));
        assert_eq!(EntryKind::from_mode(S_IFDIR | 0o755), Some(EntryKind::Directory));
        assert_eq!(EntryKind::from_mode(S_IFLNK | 0o777), Some(EntryKind::Symlink));
        assert_eq!(EntryKind::from_mode(S_IFIFO | 0o600), Some(EntryKind::Fifo));
        // Socket: representable on disk, not in the archive.
        assert_eq!(EntryKind::from_mode(0o140000 | 0o644), None);
    }
}
