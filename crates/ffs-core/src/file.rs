//! In-memory file with shared content and per-view cursors.
//!
//! A [`MemFile`] is a *view*: the byte buffer, name, mode and modification
//! time live behind an `Arc` shared by every duplicate, while the cursor
//! belongs to the view alone. Mutation through any view is immediately
//! visible to all others; positions never are.
//!
//! Content is guarded by a `parking_lot::RwLock`, so any number of readers
//! may proceed together and a writer excludes everyone else.

use std::io::{self, SeekFrom};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::RwLock;

use crate::error::{FsError, FsResult};
use crate::fs::{File, Writer};
use crate::metadata::{Backing, FileMode, Metadata};

#[derive(Debug)]
struct Content {
    data: Vec<u8>,
    modified: SystemTime,
}

#[derive(Debug)]
struct Shared {
    name: String,
    mode: FileMode,
    content: RwLock<Content>,
}

/// A view onto an in-memory file.
///
/// `Clone` is [`MemFile::duplicate`].
#[derive(Debug, Clone)]
pub struct MemFile {
    shared: Arc<Shared>,
    pos: i64,
}

fn to_index(offset: i64, op: &str) -> FsResult<usize> {
    usize::try_from(offset).map_err(|_| FsError::invalid(format!("{op}: negative offset {offset}")))
}

/// Makes room for `len` bytes without aborting when the allocation fails.
fn reserve(data: &mut Vec<u8>, len: usize, op: &str) -> FsResult<()> {
    data.try_reserve_exact(len.saturating_sub(data.len()))
        .map_err(|e| FsError::invalid(format!("{op}: cannot grow to {len} bytes: {e}")))
}

/// Copies `src` into `data` at `offset`, growing `data` to fit.
///
/// Growth fills any gap with zeros. Capacity grows by at least 1.5x so a
/// stream of small sequential writes does not reallocate on every call.
fn copy_in(data: &mut Vec<u8>, offset: usize, src: &[u8], op: &str) -> FsResult<usize> {
    let end = offset
        .checked_add(src.len())
        .ok_or_else(|| FsError::invalid(format!("{op}: offset overflow")))?;
    if end > data.len() {
        let want = std::cmp::max(end, (data.capacity() * 3) / 2);
        if want > data.capacity() && data.try_reserve_exact(want - data.len()).is_err() {
            reserve(data, end, op)?;
        }
        data.resize(end, 0);
    }
    let dst = data
        .get_mut(offset..end)
        .ok_or_else(|| FsError::Internal(format!("{op}: bad copy")))?;
    dst.copy_from_slice(src);
    Ok(src.len())
}

impl MemFile {
    /// Creates a file holding `content`, with the cursor at 0.
    pub fn new(content: impl Into<Vec<u8>>, mode: FileMode, name: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                mode,
                content: RwLock::new(Content {
                    data: content.into(),
                    modified: SystemTime::now(),
                }),
            }),
            pos: 0,
        }
    }

    /// Returns a new view sharing content and metadata, starting at this view's cursor.
    pub fn duplicate(&self) -> Self {
        self.clone()
    }

    /// A new view positioned at the start.
    fn rewound(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            pos: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn mode(&self) -> FileMode {
        self.shared.mode
    }

    pub fn len(&self) -> u64 {
        self.shared.content.read().data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn modified(&self) -> SystemTime {
        self.shared.content.read().modified
    }

    /// Current cursor of this view.
    pub fn position(&self) -> i64 {
        self.pos
    }

    /// Snapshot of the whole buffer.
    pub fn contents(&self) -> Vec<u8> {
        self.shared.content.read().data.clone()
    }

    /// Whether two views share the same buffer.
    pub fn same_file(&self, other: &MemFile) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    pub fn read(&mut self, buf: &mut [u8]) -> FsResult<usize> {
        let content = self.shared.content.read();
        let start = to_index(self.pos, "read")?;
        if start >= content.data.len() {
            return Ok(0);
        }
        let n = buf.len().min(content.data.len() - start);
        buf[..n].copy_from_slice(&content.data[start..start + n]);
        self.pos += n as i64;
        Ok(n)
    }

    pub fn read_at(&self, buf: &mut [u8], offset: i64) -> FsResult<usize> {
        let start = to_index(offset, "read_at")?;
        let content = self.shared.content.read();
        if start >= content.data.len() {
            return Ok(0);
        }
        let n = buf.len().min(content.data.len() - start);
        buf[..n].copy_from_slice(&content.data[start..start + n]);
        Ok(n)
    }

    pub fn write(&mut self, buf: &[u8]) -> FsResult<usize> {
        let start = to_index(self.pos, "write")?;
        let mut content = self.shared.content.write();
        content.modified = SystemTime::now();
        let n = copy_in(&mut content.data, start, buf, "write")?;
        self.pos += n as i64;
        Ok(n)
    }

    pub fn write_at(&self, buf: &[u8], offset: i64) -> FsResult<usize> {
        let start = to_index(offset, "write_at")?;
        let mut content = self.shared.content.write();
        content.modified = SystemTime::now();
        copy_in(&mut content.data, start, buf, "write_at")
    }

    /// Moves this view's cursor. Positions past the end are allowed.
    pub fn seek(&mut self, pos: SeekFrom) -> FsResult<u64> {
        let abs = match pos {
            SeekFrom::Start(off) => i64::try_from(off).ok(),
            SeekFrom::Current(off) => self.pos.checked_add(off),
            SeekFrom::End(off) => (self.len() as i64).checked_add(off),
        };
        match abs {
            Some(abs) if abs >= 0 => {
                self.pos = abs;
                Ok(abs as u64)
            }
            _ => Err(FsError::invalid(format!("seek: negative position {pos:?}"))),
        }
    }

    /// Resizes the shared buffer to exactly `size` bytes.
    ///
    /// Growing zero-fills. Shrinking discards the tail and releases its memory.
    pub fn truncate(&self, size: u64) -> FsResult<()> {
        let size = usize::try_from(size).map_err(|_| FsError::invalid("truncate: size too large"))?;
        let mut content = self.shared.content.write();
        if size > content.data.len() {
            reserve(&mut content.data, size, "truncate")?;
            content.data.resize(size, 0);
        } else {
            content.data.truncate(size);
            content.data.shrink_to_fit();
        }
        content.modified = SystemTime::now();
        Ok(())
    }

    /// Resets this view's cursor. There is no resource to release.
    pub fn close(&mut self) {
        self.pos = 0;
    }

    /// Metadata record whose backing is this file.
    pub fn stat(&self) -> Metadata {
        let content = self.shared.content.read();
        Metadata::new(
            self.shared.name.clone(),
            self.shared.mode,
            content.modified,
            content.data.len() as u64,
            Backing::File(self.rewound()),
        )
    }
}

impl File for MemFile {
    fn read(&mut self, buf: &mut [u8]) -> FsResult<usize> {
        MemFile::read(self, buf)
    }

    fn read_at(&self, buf: &mut [u8], offset: i64) -> FsResult<usize> {
        MemFile::read_at(self, buf, offset)
    }

    fn seek(&mut self, pos: SeekFrom) -> FsResult<u64> {
        MemFile::seek(self, pos)
    }

    fn close(&mut self) -> FsResult<()> {
        MemFile::close(self);
        Ok(())
    }

    fn stat(&self) -> FsResult<Metadata> {
        Ok(MemFile::stat(self))
    }

    fn writer(&mut self) -> Option<&mut dyn Writer> {
        Some(self)
    }
}

impl Writer for MemFile {
    fn write(&mut self, buf: &[u8]) -> FsResult<usize> {
        MemFile::write(self, buf)
    }

    fn write_at(&self, buf: &[u8], offset: i64) -> FsResult<usize> {
        MemFile::write_at(self, buf, offset)
    }

    fn truncate(&self, size: u64) -> FsResult<()> {
        MemFile::truncate(self, size)
    }
}

impl io::Read for MemFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        MemFile::read(self, buf).map_err(Into::into)
    }
}

impl io::Write for MemFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        MemFile::write(self, buf).map_err(Into::into)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl io::Seek for MemFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        MemFile::seek(self, pos).map_err(Into::into)
    }
}
