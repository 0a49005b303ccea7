//! RAM filesystem that creates whatever path it is asked to open.
//!
//! Opening a missing file creates it (mode 0644), listing a missing directory
//! creates it, and intermediate directories are created along the way.
//! Nothing survives a restart.

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{EntryKind, FsError, FsResult};
use crate::dir::MemDir;
use crate::file::MemFile;
use crate::fs::{Dir, File, Fs, OpenFlags, split_path};
use crate::metadata::{Backing, FileMode, Metadata};

/// What [`RamFs::find_or_create`] resolved to.
pub enum Node {
    File(Box<dyn File>),
    Dir(MemDir),
}

/// An in-memory tree rooted at a [`MemDir`] named `/`.
pub struct RamFs {
    root: MemDir,
    // Serializes structural changes so two creators of one path agree.
    create_lock: Mutex<()>,
}

impl Default for RamFs {
    fn default() -> Self {
        Self::new()
    }
}

impl RamFs {
    pub fn new() -> Self {
        Self::with_root(MemDir::new("/"))
    }

    /// Serves an existing directory tree.
    pub fn with_root(root: MemDir) -> Self {
        Self {
            root,
            create_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &MemDir {
        &self.root
    }

    /// Resolves `path` to an entry of `kind`, creating it and any missing parents.
    ///
    /// Fails with [`FsError::Exists`] when a segment already exists as the
    /// other kind.
    pub fn find_or_create(&self, path: &str, kind: EntryKind) -> FsResult<Node> {
        let _guard = self.create_lock.lock();
        let parts: Vec<&str> = split_path(path).collect();
        let Some((last, parents)) = parts.split_last() else {
            return match kind {
                EntryKind::Dir => Ok(Node::Dir(self.root.duplicate())),
                EntryKind::File => Err(FsError::Exists {
                    path: "/".into(),
                    kind: EntryKind::Dir,
                }),
            };
        };

        let mut dir = self.root.duplicate();
        for part in parents {
            dir = match dir.find(part) {
                Ok(meta) => match meta.backing() {
                    Backing::Dir(d) => d.duplicate(),
                    _ => {
                        return Err(FsError::Exists {
                            path: (*part).to_string(),
                            kind: EntryKind::File,
                        });
                    }
                },
                Err(_) => {
                    debug!(dir = %part, "creating intermediate directory");
                    let created = MemDir::new(*part);
                    dir.append([created.stat()]);
                    created
                }
            };
        }

        if let Ok(meta) = dir.find(last) {
            return match (kind, meta.backing()) {
                (EntryKind::Dir, Backing::Dir(d)) => Ok(Node::Dir(d.duplicate())),
                (EntryKind::File, backing) if !meta.is_dir() => backing
                    .open_file()
                    .map(Node::File)
                    .ok_or_else(|| FsError::wrong_kind(path, EntryKind::File)),
                (EntryKind::Dir, _) => Err(FsError::Exists {
                    path: path.to_string(),
                    kind: EntryKind::File,
                }),
                (EntryKind::File, _) => Err(FsError::Exists {
                    path: path.to_string(),
                    kind: EntryKind::Dir,
                }),
            };
        }

        match kind {
            EntryKind::Dir => {
                let created = MemDir::new(*last);
                dir.append([created.stat()]);
                Ok(Node::Dir(created))
            }
            EntryKind::File => {
                let created = MemFile::new(Vec::new(), FileMode::new(0o644), *last);
                dir.append([created.stat()]);
                Ok(Node::File(Box::new(created)))
            }
        }
    }
}

impl Fs for RamFs {
    fn open(&self, path: &str, flags: OpenFlags) -> FsResult<Box<dyn File>> {
        match self.find_or_create(path, EntryKind::File)? {
            Node::File(mut f) => {
                if flags.truncate
                    && let Some(w) = f.writer()
                {
                    w.truncate(0)?;
                }
                Ok(f)
            }
            Node::Dir(_) => Err(FsError::wrong_kind(path, EntryKind::File)),
        }
    }

    fn read_dir(&self, path: &str) -> FsResult<Box<dyn Dir>> {
        match self.find_or_create(path, EntryKind::Dir)? {
            Node::Dir(d) => Ok(Box::new(d)),
            Node::File(_) => Err(FsError::wrong_kind(path, EntryKind::Dir)),
        }
    }

    fn stat(&self, path: &str) -> FsResult<Metadata> {
        if split_path(path).next().is_none() {
            return Ok(self.root.stat());
        }
        self.root.walk(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const M1: &[u8] = b"Hello World";

    #[test]
    fn test_open_creates_file_in_root() {
        let fs = RamFs::new();
        fs.open("/afile", OpenFlags::read_write()).unwrap();
        let entries = fs.root().copy();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name(), "afile");
        assert!(!entries[0].is_dir());
    }

    #[test]
    fn test_read_dir_creates_dir() {
        let fs = RamFs::new();
        fs.read_dir("adir").unwrap();
        let entries = fs.root().copy();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name(), "adir");
        assert!(entries[0].is_dir());
    }

    #[test]
    fn test_open_existing_sees_previous_writes() {
        let fs = RamFs::new();
        let mut f = fs.open("afile", OpenFlags::read_write()).unwrap();
        f.writer().unwrap().write(M1).unwrap();
        f.close().unwrap();

        let mut f = fs.open("afile", OpenFlags::read_only()).unwrap();
        let mut b = vec![0u8; M1.len()];
        f.read(&mut b).unwrap();
        assert_eq!(b, M1);
    }

    #[test]
    fn test_open_with_truncate_empties_file() {
        let fs = RamFs::new();
        let mut f = fs.open("afile", OpenFlags::read_write()).unwrap();
        f.writer().unwrap().write(M1).unwrap();

        fs.open("afile", OpenFlags::read_write_truncate()).unwrap();
        assert_eq!(fs.stat("afile").unwrap().size(), 0);
    }

    #[test]
    fn test_stat() {
        let fs = RamFs::new();
        fs.open("afile", OpenFlags::read_write()).unwrap();
        let meta = fs.stat("afile").unwrap();
        assert_eq!(meta.name(), "afile");
        assert_eq!(meta.mode().perm(), 0o644);

        assert!(fs.stat("/").unwrap().is_dir());
        assert!(fs.stat("doesnotexist").unwrap_err().is_not_found());
    }

    #[test]
    fn test_find_or_create_nested() {
        let fs = RamFs::new();
        fs.find_or_create("adir/adir2/adir3", EntryKind::Dir).unwrap();
        fs.find_or_create("adir", EntryKind::Dir).unwrap();
        let Node::Dir(d) = fs.find_or_create("//adir", EntryKind::Dir).unwrap() else {
            panic!("expected a directory");
        };
        assert_eq!(d.name(), "adir");
        assert_eq!(fs.root().len(), 1);
        assert!(fs.stat("/adir/adir2/adir3").unwrap().is_dir());
    }

    #[test]
    fn test_find_or_create_conflicts() {
        let fs = RamFs::new();
        fs.find_or_create("adir", EntryKind::Dir).unwrap();
        assert!(matches!(
            fs.find_or_create("adir", EntryKind::File),
            Err(FsError::Exists { kind: EntryKind::Dir, .. })
        ));

        fs.find_or_create("/adir/adir2", EntryKind::Dir).unwrap();
        fs.find_or_create("/adir/adir2/adir3/adir4", EntryKind::Dir).unwrap();
        assert!(matches!(
            fs.find_or_create("/adir/adir2", EntryKind::File),
            Err(FsError::Exists { kind: EntryKind::Dir, .. })
        ));

        fs.find_or_create("afile", EntryKind::File).unwrap();
        assert!(matches!(
            fs.find_or_create("afile", EntryKind::Dir),
            Err(FsError::Exists { kind: EntryKind::File, .. })
        ));
        assert!(matches!(
            fs.find_or_create("/afile/adir2", EntryKind::File),
            Err(FsError::Exists { kind: EntryKind::File, .. })
        ));
    }
}
