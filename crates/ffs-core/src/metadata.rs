//! Metadata records shared by files and directories.
//!
//! A [`Metadata`] record always points back at the object that produced it
//! through [`Backing`]. Dispatching on that enum replaces runtime type
//! assertions: asking a record for its directory when it describes a file is
//! an exhaustive match, not a failed cast.

use std::fmt;
use std::time::SystemTime;

use crate::chanfile::ChanFile;
use crate::dir::MemDir;
use crate::error::{EntryKind, FsError, FsResult};
use crate::file::MemFile;
use crate::fs::{Dir, File};

/// Permission bits plus a directory flag.
///
/// The directory bit matches the 9P `DMDIR` bit so modes can be handed to the
/// wire unchanged.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileMode(u32);

impl FileMode {
    /// Directory flag.
    pub const DIR: u32 = 0x8000_0000;
    /// Mask for the rwx permission triplets.
    pub const PERM_MASK: u32 = 0o777;

    pub const fn new(bits: u32) -> Self {
        Self(bits)
    }

    /// A directory with the given permission bits.
    pub const fn dir(perm: u32) -> Self {
        Self(Self::DIR | (perm & Self::PERM_MASK))
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn perm(self) -> u32 {
        self.0 & Self::PERM_MASK
    }

    pub const fn is_dir(self) -> bool {
        self.0 & Self::DIR != 0
    }
}

impl fmt::Debug for FileMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:04o}", if self.is_dir() { "d" } else { "-" }, self.perm())
    }
}

impl From<u32> for FileMode {
    fn from(bits: u32) -> Self {
        Self(bits)
    }
}

/// The object a metadata record describes.
#[derive(Clone)]
pub enum Backing {
    /// An in-memory file. Holds a view at offset 0.
    File(MemFile),
    /// An in-memory directory. Holds a view with a fresh listing cursor.
    Dir(MemDir),
    /// A commit/discard file.
    Coordinated(ChanFile),
    /// Anything without an in-memory object (disk entries, synthesized records).
    Opaque,
}

impl Backing {
    /// Opens a new view of the backing file, if this describes one.
    pub fn open_file(&self) -> Option<Box<dyn File>> {
        match self {
            Backing::File(f) => Some(Box::new(f.duplicate())),
            Backing::Coordinated(f) => Some(Box::new(f.duplicate())),
            Backing::Dir(_) | Backing::Opaque => None,
        }
    }

    /// Opens a new view of the backing directory, if this describes one.
    pub fn open_dir(&self) -> Option<Box<dyn Dir>> {
        match self {
            Backing::Dir(d) => Some(Box::new(d.duplicate())),
            _ => None,
        }
    }

    /// Whether the backing object accepts writes and truncation.
    pub fn is_writable(&self) -> bool {
        matches!(self, Backing::File(_) | Backing::Coordinated(_))
    }
}

impl fmt::Debug for Backing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backing::File(_) => f.write_str("File"),
            Backing::Dir(_) => f.write_str("Dir"),
            Backing::Coordinated(_) => f.write_str("Coordinated"),
            Backing::Opaque => f.write_str("Opaque"),
        }
    }
}

/// File or directory descriptor.
///
/// Size and modification time are read through to in-memory backing objects,
/// so every record describing a buffer reflects writes made through any view.
#[derive(Clone)]
pub struct Metadata {
    name: String,
    mode: FileMode,
    modified: SystemTime,
    size: u64,
    backing: Backing,
}

impl Metadata {
    pub fn new(
        name: impl Into<String>,
        mode: FileMode,
        modified: SystemTime,
        size: u64,
        backing: Backing,
    ) -> Self {
        Self {
            name: name.into(),
            mode,
            modified,
            size,
            backing,
        }
    }

    /// A record with no in-memory backing object.
    pub fn opaque(name: impl Into<String>, mode: FileMode, modified: SystemTime, size: u64) -> Self {
        Self::new(name, mode, modified, size, Backing::Opaque)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> FileMode {
        self.mode
    }

    pub fn is_dir(&self) -> bool {
        self.mode.is_dir()
    }

    pub fn kind(&self) -> EntryKind {
        if self.is_dir() { EntryKind::Dir } else { EntryKind::File }
    }

    pub fn modified(&self) -> SystemTime {
        match &self.backing {
            Backing::File(f) => f.modified(),
            Backing::Coordinated(f) => f.content().modified(),
            Backing::Dir(_) | Backing::Opaque => self.modified,
        }
    }

    pub fn size(&self) -> u64 {
        match &self.backing {
            Backing::File(f) => f.len(),
            Backing::Coordinated(f) => f.content().len(),
            Backing::Dir(_) | Backing::Opaque => self.size,
        }
    }

    pub fn backing(&self) -> &Backing {
        &self.backing
    }

    /// Recovers the in-memory directory this record describes.
    pub fn as_mem_dir(&self) -> FsResult<&MemDir> {
        match &self.backing {
            Backing::Dir(d) => Ok(d),
            _ => Err(FsError::wrong_kind(self.name.clone(), EntryKind::Dir)),
        }
    }

    /// Recovers the in-memory file this record describes.
    pub fn as_mem_file(&self) -> FsResult<&MemFile> {
        match &self.backing {
            Backing::File(f) => Ok(f),
            _ => Err(FsError::wrong_kind(self.name.clone(), EntryKind::File)),
        }
    }
}

impl fmt::Debug for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metadata")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("size", &self.size())
            .field("backing", &self.backing)
            .finish_non_exhaustive()
    }
}
