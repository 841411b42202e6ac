//! # Packvault Core Library
//!
//! This crate captures a filesystem subtree into a single self-describing
//! archive and reconstitutes it later. It preserves regular files,
//! directories, symbolic links, named pipes and hardlink identity, and can
//! compress (LZW) and encrypt (AES-256-CBC) the archive as a whole.
//!
//! ## Key Modules
//!
//! - [`archive`]: the outer file format and the `pack`/`unpack`/`verify`
//!   operations.
//! - [`entry`]: the per-entry wire codec, including the hardlink inode
//!   table and long-path framing.
//! - [`compress`]: the LZW codec used for whole-body compression.
//! - [`crypto`]: password-derived AES-256-CBC encryption.
//! - [`checksum`]: the CRC32 integrity check over the stored body.
//! - [`walk`]: deterministic entry enumeration with a caller predicate.
//! - [`metadata`]: best-effort restoration of permissions, ownership and
//!   timestamps.
//!
//! ## Example
//!
//! ```no_run
//! use packvault::archive::{pack, unpack, verify, PackOptions, UnpackOptions};
//! use std::path::Path;
//!
//! let options = PackOptions { compress: true, ..Default::default() };
//! pack(Path::new("/srv/data"), Path::new("data.pvk"), &options, &|_| true)?;
//! verify(Path::new("data.pvk"))?;
//! unpack(Path::new("data.pvk"), Path::new("/srv/restore"), &UnpackOptions::default())?;
//! # Ok::<(), packvault::PackError>(())
//! ```

pub mod archive;
pub mod checksum;
pub mod compress;
pub mod crypto;
pub mod entry;
pub mod error;
pub mod metadata;
pub mod walk;

pub use error::PackError;
