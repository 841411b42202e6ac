//! Best-effort restoration of entry metadata.
//!
//! Ownership first (it is the step most likely to fail without privilege,
//! and losing access mid-way must not leave times unset on the steps that
//! did run), then permission bits, then timestamps last so the restores
//! themselves do not disturb atime/mtime. Every sub-step that fails is
//! logged and skipped; metadata is never a reason to fail an entry.

use std::fs;
use std::os::unix::fs::{lchown, PermissionsExt};
use std::path::Path;

use filetime::FileTime;

use crate::entry::{EntryHeader, EntryKind};

/// Applies ownership, permissions and timestamps from `header` to `path`.
/// Symlinks get the not-follow variants throughout and keep their own
/// permission bits (the link's mode is meaningless on Linux).
pub fn apply(path: &Path, header: &EntryHeader, kind: EntryKind) {
    if let Err(err) = lchown(path, Some(header.uid), Some(header.gid)) {
        log::warn!(
            "could not restore ownership {}:{} on '{}': {}",
            header.uid,
            header.gid,
            path.display(),
            err
        );
    }

    if kind != EntryKind::Symlink {
        let perms = fs::Permissions::from_mode(header.mode & 0o7777);
        if let Err(err) = fs::set_permissions(path, perms) {
            log::warn!(
                "could not restore mode {:#o} on '{}': {}",
                header.mode & 0o7777,
                path.display(),
                err
            );
        }
    }

    let atime = FileTime::from_unix_time(header.atime.secs, header.atime.nanos);
    let mtime = FileTime::from_unix_time(header.mtime.secs, header.mtime.nanos);
    let timed = if kind == EntryKind::Symlink {
        filetime::set_symlink_file_times(path, atime, mtime)
    } else {
        filetime::set_file_times(path, atime, mtime)
    };
    if let Err(err) = timed {
        log::warn!("could not restore timestamps on '{}': {}", path.display(), err);
    }
}
