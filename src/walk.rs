//! Deterministic enumeration of the entries under an archive root.
//!
//! The walk is depth-first pre-order, sorted by file name at every level,
//! so two packs of the same tree produce byte-identical archive bodies and
//! a multi-link inode's first occurrence always precedes its pointers.
//! Symbolic links are never followed; they show up as entries themselves.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{io_err, PackError};

/// The caller-supplied inclusion predicate. It sees each candidate's path
/// relative to the root, exactly once.
pub type Predicate<'a> = dyn Fn(&Path) -> bool + 'a;

/// Collects the relative paths of the root's descendants that pass the
/// predicate.
///
/// Directories are predicated like any other entry, but a rejected
/// directory does not prune its children: each descendant is judged on its
/// own path.
pub fn collect_entries(root: &Path, predicate: &Predicate) -> Result<Vec<PathBuf>, PackError> {
    let mut entries = Vec::new();

    for item in WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
    {
        let item = item.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            match e.into_io_error() {
                Some(io) => io_err(io, path),
                None => io_err(
                    std::io::Error::new(std::io::ErrorKind::Other, "filesystem loop"),
                    path,
                ),
            }
        })?;

        let rel = item
            .path()
            .strip_prefix(root)
            .expect("walkdir yields paths under its root")
            .to_path_buf();

        if predicate(&rel) {
            entries.push(rel);
        } else {
            log::debug!("predicate excluded {}", rel.display());
        }
    }

    Ok(entries)
}
