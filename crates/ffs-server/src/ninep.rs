//! 9P front end.
//!
//! [`NinepFs`] adapts an [`Fs`] to the `ninep` server. Each distinct path is
//! interned to one qid for the life of the server, so walking the same file
//! twice yields the same qid. Opens stash the file handle (or, for
//! directories, the full listing) under that qid until clunk.
//!
//! Backing sources create entries on open, so `create` and `remove` are
//! rejected. Failures surface as the generic not-found message, except for
//! unsupported operations which carry their own.

use std::collections::HashMap;
use std::io::SeekFrom;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::SystemTime;

use ::ninep::fs::{FileMeta, IoUnit, Mode, Perm, QID_ROOT, Stat};
use ::ninep::server::{ClientId, ReadOutcome, Serve9p, Server};
use ffs_core::{Fs, FsError, FsResult, Metadata, OpenFlags};
use tracing::{debug, info};

/// Largest payload a single read or write carries.
pub const IO_UNIT: IoUnit = 8192;

/// Size value in a wstat that means "leave unchanged".
const DONT_TOUCH: u64 = u64::MAX;

const NOT_FOUND: &str = "file does not exist";

fn rerror(e: &FsError) -> String {
    match e {
        FsError::Unsupported(msg) => msg.clone(),
        _ => {
            debug!(error = %e, "9P request failed");
            NOT_FOUND.to_string()
        }
    }
}

enum Handle {
    File {
        file: Box<dyn ffs_core::File>,
        flags: OpenFlags,
    },
    Dir(Vec<Metadata>),
}

/// A `Serve9p` implementation over an [`Fs`].
pub struct NinepFs {
    fs: Arc<dyn Fs>,
    paths: HashMap<u64, String>,
    qids: HashMap<String, u64>,
    handles: HashMap<u64, Handle>,
    next_qid: u64,
}

fn join(base: &str, child: &str) -> String {
    if base == "/" {
        format!("/{child}")
    } else {
        format!("{base}/{child}")
    }
}

impl NinepFs {
    pub fn new(fs: Arc<dyn Fs>) -> Self {
        Self {
            fs,
            paths: HashMap::from([(QID_ROOT, "/".to_string())]),
            qids: HashMap::from([("/".to_string(), QID_ROOT)]),
            handles: HashMap::new(),
            next_qid: QID_ROOT + 1,
        }
    }

    fn path_for(&self, qid: u64) -> FsResult<String> {
        self.paths
            .get(&qid)
            .cloned()
            .ok_or_else(|| FsError::not_found(format!("qid {qid}")))
    }

    /// The qid for `path`, allocating one the first time it is seen.
    fn intern(&mut self, path: String) -> u64 {
        if let Some(&qid) = self.qids.get(&path) {
            return qid;
        }
        let qid = self.next_qid;
        self.next_qid += 1;
        self.paths.insert(qid, path.clone());
        self.qids.insert(path, qid);
        qid
    }

    fn to_stat(&self, meta: &Metadata, qid: u64) -> Stat {
        let fm = if meta.is_dir() {
            FileMeta::dir(meta.name(), qid)
        } else {
            FileMeta::file(meta.name(), qid)
        };
        Stat {
            fm,
            perms: Perm::from_bits_truncate(meta.mode().bits()),
            n_bytes: if meta.is_dir() { 0 } else { meta.size() },
            last_accesses: SystemTime::now(),
            last_modified: meta.modified(),
            owner: String::new(),
            group: String::new(),
            last_modified_by: String::new(),
        }
    }

    fn do_walk(&mut self, parent: u64, child: &str) -> FsResult<FileMeta> {
        let path = join(&self.path_for(parent)?, child);
        let meta = self.fs.stat(&path)?;
        let qid = self.intern(path);
        Ok(if meta.is_dir() {
            FileMeta::dir(child, qid)
        } else {
            FileMeta::file(child, qid)
        })
    }

    fn do_open(&mut self, qid: u64, mode: u8) -> FsResult<IoUnit> {
        let path = self.path_for(qid)?;
        let meta = self.fs.stat(&path)?;
        if meta.is_dir() {
            let listing = self.fs.read_dir(&path)?.readdir(0)?;
            debug!(path = %path, entries = listing.len(), "opened directory");
            self.handles.insert(qid, Handle::Dir(listing));
            return Ok(IO_UNIT);
        }

        let flags = OpenFlags::from_ninep_mode(mode);
        if flags.truncate && !flags.write {
            return Err(FsError::unsupported(format!("{path}: truncate needs write access")));
        }
        // Truncation happens once, here, so coordinated files see a single request.
        let mut file = self.fs.open(
            &path,
            OpenFlags {
                truncate: false,
                ..flags
            },
        )?;
        if flags.truncate {
            file.writer()
                .ok_or_else(|| FsError::unsupported(format!("{path}: not writable")))?
                .truncate(0)?;
        }
        if flags.append && meta.size() > 0 {
            file.seek(SeekFrom::End(-1))?;
        }
        debug!(path = %path, ?flags, "opened file");
        self.handles.insert(qid, Handle::File { file, flags });
        Ok(IO_UNIT)
    }

    fn do_read(&mut self, qid: u64, offset: usize, count: usize) -> FsResult<Vec<u8>> {
        match self.handles.get(&qid) {
            Some(Handle::File { file, .. }) => {
                let offset = i64::try_from(offset).map_err(|_| FsError::invalid("offset overflow"))?;
                let mut buf = vec![0u8; count.min(IO_UNIT as usize)];
                let n = file.read_at(&mut buf, offset)?;
                buf.truncate(n);
                Ok(buf)
            }
            Some(Handle::Dir(_)) => Ok(Vec::new()),
            None => Err(FsError::not_found(format!("qid {qid} not open"))),
        }
    }

    fn do_read_dir(&mut self, qid: u64) -> FsResult<Vec<Stat>> {
        let path = self.path_for(qid)?;
        let listing = match self.handles.get(&qid) {
            Some(Handle::Dir(listing)) => listing.clone(),
            _ => self.fs.read_dir(&path)?.readdir(0)?,
        };
        Ok(listing
            .iter()
            .map(|meta| {
                let child = self.intern(join(&path, meta.name()));
                self.to_stat(meta, child)
            })
            .collect())
    }

    fn do_write(&mut self, qid: u64, offset: usize, data: &[u8]) -> FsResult<usize> {
        let path = self.path_for(qid)?;
        let Some(Handle::File { file, flags }) = self.handles.get_mut(&qid) else {
            return Err(FsError::not_found(format!("{path}: not open for writing")));
        };
        if !flags.write {
            return Err(FsError::unsupported(format!("{path}: not open for writing")));
        }
        let offset = i64::try_from(offset).map_err(|_| FsError::invalid("offset overflow"))?;
        let writer = file
            .writer()
            .ok_or_else(|| FsError::unsupported(format!("{path}: not writable")))?;
        writer.write_at(data, offset)
    }

    fn do_stat(&mut self, qid: u64) -> FsResult<Stat> {
        let path = self.path_for(qid)?;
        let meta = self.fs.stat(&path)?;
        Ok(self.to_stat(&meta, qid))
    }

    /// Only a length change is honored, and only on writable backings.
    fn do_write_stat(&mut self, qid: u64, stat: &Stat) -> FsResult<()> {
        let path = self.path_for(qid)?;
        let meta = self.fs.stat(&path)?;
        if stat.n_bytes == DONT_TOUCH || stat.n_bytes == meta.size() {
            return Ok(());
        }
        let mut file = meta
            .backing()
            .open_file()
            .filter(|_| meta.backing().is_writable())
            .ok_or_else(|| FsError::unsupported(format!("{path}: truncate not supported")))?;
        let writer = file
            .writer()
            .ok_or_else(|| FsError::unsupported(format!("{path}: truncate not supported")))?;
        writer.truncate(stat.n_bytes)?;
        debug!(path = %path, size = stat.n_bytes, "truncated");
        Ok(())
    }

    fn do_clunk(&mut self, qid: u64) {
        if let Some(Handle::File { mut file, .. }) = self.handles.remove(&qid)
            && let Err(e) = file.close()
        {
            debug!(qid, error = %e, "close on clunk failed");
        }
    }
}

/// Recovers the Topen mode byte from the server's [`Mode`].
///
/// `Mode::new` drops the `OWRITE` bit, so `OWRITE` arrives as `OREAD` and
/// `OWRITE|OTRUNC` as `OREAD|OTRUNC`. Truncation requires write access, so
/// the latter is read as a write open.
fn open_mode(mode: Mode) -> u8 {
    let bits = mode.bits();
    if bits & OTRUNC != 0 && bits & 0x03 == 0 {
        bits | OWRITE
    } else {
        bits
    }
}

const OWRITE: u8 = 0x01;
const OTRUNC: u8 = 0x10;

impl Serve9p for NinepFs {
    fn walk(&mut self, _cid: ClientId, parent_qid: u64, child: &str, _uname: &str) -> ::ninep::Result<FileMeta> {
        self.do_walk(parent_qid, child).map_err(|e| rerror(&e))
    }

    fn open(&mut self, _cid: ClientId, qid: u64, mode: Mode, _uname: &str) -> ::ninep::Result<IoUnit> {
        self.do_open(qid, open_mode(mode)).map_err(|e| rerror(&e))
    }

    fn clunk(&mut self, _cid: ClientId, qid: u64) {
        self.do_clunk(qid);
    }

    fn create(
        &mut self,
        _cid: ClientId,
        _parent: u64,
        name: &str,
        _perm: Perm,
        _mode: Mode,
        _uname: &str,
    ) -> ::ninep::Result<(FileMeta, IoUnit)> {
        Err(format!("create {name}: not supported"))
    }

    fn read(
        &mut self,
        _cid: ClientId,
        qid: u64,
        offset: usize,
        count: usize,
        _uname: &str,
    ) -> ::ninep::Result<ReadOutcome> {
        self.do_read(qid, offset, count)
            .map(ReadOutcome::Immediate)
            .map_err(|e| rerror(&e))
    }

    fn read_dir(&mut self, _cid: ClientId, qid: u64, _uname: &str) -> ::ninep::Result<Vec<Stat>> {
        self.do_read_dir(qid).map_err(|e| rerror(&e))
    }

    fn write(
        &mut self,
        _cid: ClientId,
        qid: u64,
        offset: usize,
        data: Vec<u8>,
        _uname: &str,
    ) -> ::ninep::Result<usize> {
        self.do_write(qid, offset, &data).map_err(|e| rerror(&e))
    }

    fn remove(&mut self, _cid: ClientId, _qid: u64, _uname: &str) -> ::ninep::Result<()> {
        Err("remove: not supported".to_string())
    }

    fn stat(&mut self, _cid: ClientId, qid: u64, _uname: &str) -> ::ninep::Result<Stat> {
        self.do_stat(qid).map_err(|e| rerror(&e))
    }

    fn write_stat(&mut self, _cid: ClientId, qid: u64, stat: Stat, _uname: &str) -> ::ninep::Result<()> {
        self.do_write_stat(qid, &stat).map_err(|e| rerror(&e))
    }
}

/// Serves `fs` over 9P on a TCP port.
///
/// The `ninep` server runs its accept loop on its own thread; the returned
/// handle joins it.
pub fn serve_tcp(fs: Arc<dyn Fs>, port: u16) -> JoinHandle<()> {
    info!(port, "Starting 9P server");
    Server::new(NinepFs::new(fs)).serve_tcp(port)
}
