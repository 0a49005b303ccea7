//! Virtual filesystem primitives for serving heterogeneous data over 9P and HTTP.
//!
//! Every backing source implements the three-call [`Fs`] contract (`open`,
//! `read_dir`, `stat`). Most sources build their answers from the in-memory
//! primitives in this crate:
//!
//! - [`MemFile`]: a growable byte buffer. Handles are views with a private
//!   cursor over shared content.
//! - [`MemDir`]: an ordered, append-only list of [`Metadata`] records with a
//!   resumable paged listing.
//! - [`ChanFile`]: a [`MemFile`] behind a [`Coordinator`] that answers every
//!   read, write, truncate and close with [`Verdict::Commit`] or
//!   [`Verdict::Discard`].
//!
//! Ready-made sources: [`ramfs::RamFs`] (creates paths on demand),
//! [`diskfs::DiskFs`] (directory passthrough) and [`pastefs::PasteFs`]
//! (paste board). [`router::Router`] routes host names to sources.
//!
//! # Example
//!
//! ```
//! use ffs_core::{Fs, OpenFlags, read_all_at, ramfs::RamFs};
//!
//! let fs = RamFs::new();
//! let mut f = fs.open("/notes/today", OpenFlags::read_write())?;
//! f.writer().expect("ramfs files are writable").write(b"hello")?;
//!
//! let f = fs.open("/notes/today", OpenFlags::read_only())?;
//! assert_eq!(read_all_at(f.as_ref(), 0)?, b"hello");
//! assert!(fs.stat("/notes").unwrap().is_dir());
//! # Ok::<(), ffs_core::FsError>(())
//! ```

mod chanfile;
mod dir;
mod error;
mod file;
mod fs;
mod metadata;

pub mod diskfs;
pub mod pastefs;
pub mod ramfs;
pub mod router;

pub use chanfile::{ChanFile, Coordinator, Reply, Reported, Request, RequestKind, Verdict};
pub use dir::{MAX_SEARCH_DEPTH, MemDir};
pub use error::{EntryKind, FsError, FsResult};
pub use file::MemFile;
pub use fs::{Dir, File, Fs, OpenFlags, Writer, base_name, clean_path, read_all_at, split_path};
pub use metadata::{Backing, FileMode, Metadata};
