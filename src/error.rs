use std::path::PathBuf;

/// The primary error type for all operations in the `packvault` crate.
#[derive(Debug)]
pub enum PackError {
    /// An I/O error occurred, typically while reading or writing a file.
    /// Includes the path where the error happened.
    Io { source: std::io::Error, path: PathBuf },

    /// The archive is structurally invalid: short header, unknown mod bits,
    /// unknown entry kind, implausible length field, or truncation.
    BadArchive(String),

    /// AES padding did not validate on decrypt. This is the observable
    /// signal of a wrong password (or a corrupted ciphertext).
    BadKeyOrCorrupt,

    /// The stored header checksum disagrees with the recomputed one.
    ChecksumMismatch { stored: u32, computed: u32 },

    /// Encryption was requested without a usable password, or the archive
    /// is encrypted and no password was configured for unpacking.
    MissingPassword,
}

impl std::fmt::Display for PackError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PackError::Io { source, path } => {
                if path.as_os_str().is_empty() {
                    write!(f, "I/O error: {}", source)
                } else {
                    write!(f, "I/O error on path '{}': {}", path.display(), source)
                }
            }
            PackError::BadArchive(msg) => write!(f, "Bad archive: {}", msg),
            PackError::BadKeyOrCorrupt => {
                write!(f, "Decryption failed: wrong password or corrupted archive")
            }
            PackError::ChecksumMismatch { stored, computed } => write!(
                f,
                "Checksum mismatch: stored {:#010x}, computed {:#010x}",
                stored, computed
            ),
            PackError::MissingPassword => write!(f, "Operation requires a password"),
        }
    }
}

impl std::error::Error for PackError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PackError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PackError {
    fn from(err: std::io::Error) -> Self {
        PackError::Io { source: err, path: PathBuf::new() }
    }
}

/// Shorthand used by file-touching call sites throughout the crate.
pub(crate) fn io_err(source: std::io::Error, path: impl Into<PathBuf>) -> PackError {
    PackError::Io { source, path: path.into() }
}
