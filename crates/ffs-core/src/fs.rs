//! The capability contract every backing source implements.
//!
//! An [`Fs`] resolves `/`-delimited absolute paths to [`File`] and [`Dir`]
//! handles and to [`Metadata`] records. Implementations are free to
//! synthesize content per call (render a page on open, snapshot a disk
//! directory on listing). The only error callers may interpret is
//! [`FsError::NotFound`](crate::FsError::NotFound).

use std::io::SeekFrom;

use crate::error::FsResult;
use crate::metadata::Metadata;

/// Intent carried by an open call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpenFlags {
    pub read: bool,
    pub write: bool,
    pub truncate: bool,
    pub append: bool,
    pub create: bool,
}

impl OpenFlags {
    pub const fn read_only() -> Self {
        Self {
            read: true,
            write: false,
            truncate: false,
            append: false,
            create: false,
        }
    }

    pub const fn read_write() -> Self {
        Self {
            read: true,
            write: true,
            truncate: false,
            append: false,
            create: false,
        }
    }

    /// Read/write with truncation, as used by HTTP POST and PUT.
    pub const fn read_write_truncate() -> Self {
        Self {
            truncate: true,
            ..Self::read_write()
        }
    }

    /// Decodes a 9P open mode byte (`OREAD`, `OWRITE`, `ORDWR`, `OEXEC`,
    /// plus the `OTRUNC` and `OAPPEND` bits).
    pub const fn from_ninep_mode(mode: u8) -> Self {
        let access = mode & 0x03;
        Self {
            read: access != 0x01,
            write: access == 0x01 || access == 0x02,
            truncate: mode & 0x10 != 0,
            append: mode & 0x80 != 0,
            create: false,
        }
    }

    pub const fn wants_write(self) -> bool {
        self.write || self.truncate || self.append
    }
}

/// A readable, seekable file handle.
///
/// Handles are views: each carries its own cursor, while the content behind
/// it may be shared with other handles.
pub trait File: Send + Sync {
    /// Reads from the cursor, advancing it. `Ok(0)` means end of data.
    fn read(&mut self, buf: &mut [u8]) -> FsResult<usize>;

    /// Reads at `offset` without touching the cursor.
    fn read_at(&self, buf: &mut [u8], offset: i64) -> FsResult<usize>;

    fn seek(&mut self, pos: SeekFrom) -> FsResult<u64>;

    fn close(&mut self) -> FsResult<()>;

    fn stat(&self) -> FsResult<Metadata>;

    /// The write capability of this handle, if it has one.
    fn writer(&mut self) -> Option<&mut dyn Writer> {
        None
    }
}

/// A file handle that also accepts writes and truncation.
pub trait Writer: File {
    fn write(&mut self, buf: &[u8]) -> FsResult<usize>;

    fn write_at(&self, buf: &[u8], offset: i64) -> FsResult<usize>;

    fn truncate(&self, size: u64) -> FsResult<()>;
}

/// A directory handle with a resumable listing.
pub trait Dir: Send + Sync {
    /// Returns up to `n` records and advances the listing cursor.
    ///
    /// `n == 0` returns the whole listing without moving the cursor. An empty
    /// page for `n > 0` means the listing is exhausted.
    fn readdir(&mut self, n: usize) -> FsResult<Vec<Metadata>>;

    fn stat(&self) -> FsResult<Metadata>;
}

/// A filesystem over a `/`-delimited absolute path namespace.
///
/// `read_dir` is only called on paths previously confirmed to be directories
/// via `stat`. `stat("/")` must always succeed.
pub trait Fs: Send + Sync {
    fn open(&self, path: &str, flags: OpenFlags) -> FsResult<Box<dyn File>>;

    fn read_dir(&self, path: &str) -> FsResult<Box<dyn Dir>>;

    fn stat(&self, path: &str) -> FsResult<Metadata>;
}

/// Reads everything from `offset` to the end of `file` without moving its cursor.
pub fn read_all_at(file: &dyn File, mut offset: i64) -> FsResult<Vec<u8>> {
    let mut out = Vec::new();
    let mut chunk = vec![0u8; 8192];
    loop {
        let n = file.read_at(&mut chunk, offset)?;
        if n == 0 {
            return Ok(out);
        }
        out.extend_from_slice(&chunk[..n]);
        offset += n as i64;
    }
}

/// Splits a path into its non-empty segments, so `//a` and `/a` agree.
pub fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Normalizes a path to absolute form with `.`, `..` and empty segments resolved.
///
/// `..` never climbs above the root.
pub fn clean_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for seg in split_path(path) {
        match seg {
            "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    let mut out = String::with_capacity(path.len() + 1);
    for p in &parts {
        out.push('/');
        out.push_str(p);
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

/// Returns the last segment of a path, or `/` for the root.
pub fn base_name(path: &str) -> &str {
    split_path(path).last().unwrap_or("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_path() {
        assert_eq!(clean_path(""), "/");
        assert_eq!(clean_path("/"), "/");
        assert_eq!(clean_path("a/b"), "/a/b");
        assert_eq!(clean_path("//a///b/"), "/a/b");
        assert_eq!(clean_path("/a/./b/../c"), "/a/c");
        assert_eq!(clean_path("/../../etc/passwd"), "/etc/passwd");
    }

    #[test]
    fn test_split_path_drops_empty_segments() {
        let parts: Vec<_> = split_path("//a/b//c/").collect();
        assert_eq!(parts, vec!["a", "b", "c"]);
        assert_eq!(split_path("/").count(), 0);
    }

    #[test]
    fn test_base_name() {
        assert_eq!(base_name("/pastes/123"), "123");
        assert_eq!(base_name("/"), "/");
        assert_eq!(base_name("file"), "file");
    }

    #[test]
    fn test_open_flags() {
        assert!(!OpenFlags::read_only().wants_write());
        assert!(OpenFlags::read_write().wants_write());
        let f = OpenFlags::read_write_truncate();
        assert!(f.truncate && f.write && f.read);
    }

    #[test]
    fn test_open_flags_from_ninep_mode() {
        assert_eq!(OpenFlags::from_ninep_mode(0), OpenFlags::read_only());
        assert_eq!(OpenFlags::from_ninep_mode(2), OpenFlags::read_write());
        let w = OpenFlags::from_ninep_mode(1);
        assert!(w.write && !w.read);
        let t = OpenFlags::from_ninep_mode(0x12);
        assert!(t.truncate && t.write);
        assert!(OpenFlags::from_ninep_mode(0x80).append);
    }
}
