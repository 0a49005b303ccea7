//! Disk passthrough: serves a directory of the host filesystem.
//!
//! Paths are cleaned before they are joined onto the root, so `..` cannot
//! escape it. Records produced here are [`Backing::Opaque`](crate::Backing::Opaque).

use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use parking_lot::Mutex;
use tracing::debug;

use crate::dir::MemDir;
use crate::error::{FsError, FsResult};
use crate::fs::{Dir, File, Fs, OpenFlags, Writer, base_name, clean_path};
use crate::metadata::{FileMode, Metadata};

#[cfg(unix)]
fn perm_bits(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & FileMode::PERM_MASK
}

#[cfg(not(unix))]
fn perm_bits(meta: &fs::Metadata) -> u32 {
    if meta.permissions().readonly() { 0o444 } else { 0o644 }
}

fn to_metadata(name: &str, meta: &fs::Metadata) -> Metadata {
    let mode = if meta.is_dir() {
        FileMode::dir(perm_bits(meta))
    } else {
        FileMode::new(perm_bits(meta))
    };
    let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
    Metadata::opaque(name, mode, modified, meta.len())
}

/// A directory on disk exposed through [`Fs`].
#[derive(Debug, Clone)]
pub struct DiskFs {
    root: PathBuf,
}

impl DiskFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let clean = clean_path(path);
        self.root.join(clean.trim_start_matches('/'))
    }
}

impl Fs for DiskFs {
    fn open(&self, path: &str, flags: OpenFlags) -> FsResult<Box<dyn File>> {
        let full = self.resolve(path);
        let writable = flags.wants_write();
        let file = fs::OpenOptions::new()
            .read(true)
            .write(writable)
            .truncate(flags.truncate)
            .open(&full)?;
        debug!(path = %full.display(), writable, "opened disk file");
        Ok(Box::new(DiskFile {
            name: base_name(path).to_string(),
            file: Mutex::new(file),
            pos: 0,
            writable,
        }))
    }

    fn read_dir(&self, path: &str) -> FsResult<Box<dyn Dir>> {
        let full = self.resolve(path);
        let mut entries = Vec::new();
        for entry in fs::read_dir(&full)? {
            let entry = entry?;
            let meta = entry.metadata()?;
            entries.push(to_metadata(&entry.file_name().to_string_lossy(), &meta));
        }
        entries.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(Box::new(MemDir::with_entries(base_name(path), entries)))
    }

    fn stat(&self, path: &str) -> FsResult<Metadata> {
        let meta = fs::metadata(self.resolve(path))?;
        Ok(to_metadata(base_name(path), &meta))
    }
}

/// Handle onto a file on disk.
///
/// The OS file position is shared by all calls, so every access seeks under
/// the lock and the view's own cursor lives in `pos`.
#[derive(Debug)]
pub struct DiskFile {
    name: String,
    file: Mutex<fs::File>,
    pos: i64,
    writable: bool,
}

fn disk_offset(offset: i64) -> FsResult<u64> {
    u64::try_from(offset).map_err(|_| FsError::invalid(format!("negative offset {offset}")))
}

impl File for DiskFile {
    fn read(&mut self, buf: &mut [u8]) -> FsResult<usize> {
        let n = self.read_at(buf, self.pos)?;
        self.pos += n as i64;
        Ok(n)
    }

    fn read_at(&self, buf: &mut [u8], offset: i64) -> FsResult<usize> {
        let offset = disk_offset(offset)?;
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        let mut total = 0;
        while total < buf.len() {
            match file.read(&mut buf[total..])? {
                0 => break,
                n => total += n,
            }
        }
        Ok(total)
    }

    fn seek(&mut self, pos: SeekFrom) -> FsResult<u64> {
        let abs = match pos {
            SeekFrom::Start(off) => i64::try_from(off).ok(),
            SeekFrom::Current(off) => self.pos.checked_add(off),
            SeekFrom::End(off) => {
                let len = self.file.lock().metadata()?.len() as i64;
                len.checked_add(off)
            }
        };
        match abs {
            Some(abs) if abs >= 0 => {
                self.pos = abs;
                Ok(abs as u64)
            }
            _ => Err(FsError::invalid(format!("seek: negative position {pos:?}"))),
        }
    }

    fn close(&mut self) -> FsResult<()> {
        self.pos = 0;
        Ok(())
    }

    fn stat(&self) -> FsResult<Metadata> {
        let meta = self.file.lock().metadata()?;
        Ok(to_metadata(&self.name, &meta))
    }

    fn writer(&mut self) -> Option<&mut dyn Writer> {
        if self.writable { Some(self) } else { None }
    }
}

impl Writer for DiskFile {
    fn write(&mut self, buf: &[u8]) -> FsResult<usize> {
        let n = self.write_at(buf, self.pos)?;
        self.pos += n as i64;
        Ok(n)
    }

    fn write_at(&self, buf: &[u8], offset: i64) -> FsResult<usize> {
        let offset = disk_offset(offset)?;
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(buf)?;
        Ok(buf.len())
    }

    fn truncate(&self, size: u64) -> FsResult<()> {
        self.file.lock().set_len(size)?;
        Ok(())
    }
}
