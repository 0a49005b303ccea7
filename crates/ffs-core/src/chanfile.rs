//! Commit/discard files: in-memory files whose operations are mediated by a
//! coordination task.
//!
//! Every read, write, truncate and close on a [`ChanFile`] becomes one
//! request sent to the file's [`Coordinator`] over a one-slot channel. The
//! caller blocks until the coordinator answers with a [`Verdict`]:
//!
//! - `Commit` performs the operation on the underlying [`MemFile`]. An error
//!   attached to a commit is reported next to the I/O result and never stops
//!   the I/O from happening.
//! - `Discard` skips the operation. An attached error becomes the result.
//!
//! Only one request per file is in flight at a time, and the coordinator sees
//! requests in the order callers issued them. A coordinator that never answers
//! stalls its callers; there are no timeouts at this layer.
//!
//! Callers block with `blocking_send`/`blocking_recv`, so they must not run on
//! an async runtime thread. The coordinator may be async ([`Coordinator::run`])
//! or a plain thread ([`Coordinator::spawn`]).

use std::io::SeekFrom;
use std::thread::JoinHandle;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::{FsError, FsResult};
use crate::file::MemFile;
use crate::fs::{File, Writer};
use crate::metadata::{Backing, FileMode, Metadata};

/// Operation a request asks permission for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Read,
    Write,
    Truncate,
    Close,
}

/// Coordinator decision for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Commit,
    Discard,
}

/// Coordinator answer: a verdict plus an optional error.
#[derive(Debug)]
pub struct Reply {
    pub verdict: Verdict,
    pub error: Option<anyhow::Error>,
}

impl Reply {
    pub fn commit() -> Self {
        Self {
            verdict: Verdict::Commit,
            error: None,
        }
    }

    pub fn discard() -> Self {
        Self {
            verdict: Verdict::Discard,
            error: None,
        }
    }

    #[must_use]
    pub fn with_error(mut self, error: anyhow::Error) -> Self {
        self.error = Some(error);
        self
    }
}

/// A pending operation on a coordinated file.
///
/// For reads and writes `offset` is where the operation lands (the view's
/// cursor for sequential calls). For truncation `offset` is 0 and `len` is the
/// new size. `content` is only present on writes.
#[derive(Debug)]
pub struct Request {
    kind: RequestKind,
    offset: i64,
    len: u64,
    content: Option<Vec<u8>>,
    reply: oneshot::Sender<Reply>,
}

impl Request {
    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn content(&self) -> Option<&[u8]> {
        self.content.as_deref()
    }

    pub fn respond(self, reply: Reply) {
        // The caller only disappears if its thread panicked.
        if self.reply.send(reply).is_err() {
            debug!(kind = ?self.kind, "caller dropped before reply");
        }
    }

    pub fn commit(self) {
        self.respond(Reply::commit());
    }

    pub fn discard(self) {
        self.respond(Reply::discard());
    }

    pub fn commit_with_error(self, error: anyhow::Error) {
        self.respond(Reply::commit().with_error(error));
    }

    pub fn discard_with_error(self, error: anyhow::Error) {
        self.respond(Reply::discard().with_error(error));
    }
}

/// Receiving end of a coordinated file.
///
/// The coordinator keeps its own view of the buffer so it can inspect or
/// rewrite content as part of its side work.
#[derive(Debug)]
pub struct Coordinator {
    requests: mpsc::Receiver<Request>,
    content: MemFile,
}

impl Coordinator {
    /// Next request, or `None` once every handle to the file is gone.
    pub async fn recv(&mut self) -> Option<Request> {
        self.requests.recv().await
    }

    /// Blocking variant of [`recv`](Self::recv) for coordinator threads.
    pub fn blocking_recv(&mut self) -> Option<Request> {
        self.requests.blocking_recv()
    }

    pub fn content(&self) -> &MemFile {
        &self.content
    }

    /// Answers every request with `handler` until the file is dropped.
    pub async fn run<F>(mut self, mut handler: F)
    where
        F: FnMut(&Request) -> Reply,
    {
        while let Some(req) = self.recv().await {
            let reply = handler(&req);
            req.respond(reply);
        }
        debug!(name = self.content.name(), "coordinator finished");
    }

    /// Runs the coordinator loop on a dedicated thread.
    pub fn spawn<F>(mut self, mut handler: F) -> std::io::Result<JoinHandle<()>>
    where
        F: FnMut(&Request) -> Reply + Send + 'static,
    {
        std::thread::Builder::new()
            .name(format!("ffs-coord-{}", self.content.name()))
            .spawn(move || {
                while let Some(req) = self.blocking_recv() {
                    let reply = handler(&req);
                    req.respond(reply);
                }
                debug!(name = self.content.name(), "coordinator finished");
            })
    }
}

/// Outcome of a coordinated operation.
///
/// `io` is the result of the operation itself (or the coordinator's error on
/// discard). `coordinator` carries an error attached to a commit, which is
/// independent of `io`.
#[derive(Debug)]
pub struct Reported<T> {
    pub io: FsResult<T>,
    pub coordinator: Option<anyhow::Error>,
}

impl<T> Reported<T> {
    fn failed(e: FsError) -> Self {
        Self {
            io: Err(e),
            coordinator: None,
        }
    }

    /// Collapses to the I/O result, logging any committed coordinator error.
    pub fn into_result(self, op: &'static str) -> FsResult<T> {
        if let Some(e) = &self.coordinator {
            warn!(op, error = %e, "coordinator reported error on committed operation");
        }
        self.io
    }
}

fn settle<T>(reply: Reply, discarded: T, io: impl FnOnce() -> FsResult<T>) -> Reported<T> {
    match reply.verdict {
        Verdict::Commit => Reported {
            io: io(),
            coordinator: reply.error,
        },
        Verdict::Discard => Reported {
            io: reply.error.map_or(Ok(discarded), |e| Err(FsError::Coordinator(e))),
            coordinator: None,
        },
    }
}

/// A view onto a coordinated in-memory file.
///
/// `Clone` is [`ChanFile::duplicate`]: the buffer and the coordinator are
/// shared, the cursor is not.
#[derive(Debug, Clone)]
pub struct ChanFile {
    content: MemFile,
    requests: mpsc::Sender<Request>,
}

impl ChanFile {
    /// Creates a coordinated file over fresh content.
    pub fn new(
        content: impl Into<Vec<u8>>,
        mode: FileMode,
        name: impl Into<String>,
    ) -> (Self, Coordinator) {
        Self::wrap(MemFile::new(content, mode, name))
    }

    /// Places an existing in-memory file behind a coordinator.
    pub fn wrap(file: MemFile) -> (Self, Coordinator) {
        let (tx, rx) = mpsc::channel(1);
        let coordinator = Coordinator {
            requests: rx,
            content: file.duplicate(),
        };
        (
            Self {
                content: file,
                requests: tx,
            },
            coordinator,
        )
    }

    pub fn duplicate(&self) -> Self {
        self.clone()
    }

    /// The underlying buffer view. Bypasses the coordinator.
    pub fn content(&self) -> &MemFile {
        &self.content
    }

    fn ask(&self, kind: RequestKind, offset: i64, len: u64, content: Option<Vec<u8>>) -> FsResult<Reply> {
        let (tx, rx) = oneshot::channel();
        let req = Request {
            kind,
            offset,
            len,
            content,
            reply: tx,
        };
        self.requests
            .blocking_send(req)
            .map_err(|_| FsError::CoordinatorGone)?;
        rx.blocking_recv().map_err(|_| FsError::CoordinatorGone)
    }

    pub fn read_reported(&mut self, buf: &mut [u8]) -> Reported<usize> {
        match self.ask(RequestKind::Read, self.content.position(), buf.len() as u64, None) {
            Ok(reply) => settle(reply, 0, || self.content.read(buf)),
            Err(e) => Reported::failed(e),
        }
    }

    pub fn read_at_reported(&self, buf: &mut [u8], offset: i64) -> Reported<usize> {
        match self.ask(RequestKind::Read, offset, buf.len() as u64, None) {
            Ok(reply) => settle(reply, 0, || self.content.read_at(buf, offset)),
            Err(e) => Reported::failed(e),
        }
    }

    pub fn write_reported(&mut self, buf: &[u8]) -> Reported<usize> {
        let offset = self.content.position();
        match self.ask(RequestKind::Write, offset, buf.len() as u64, Some(buf.to_vec())) {
            Ok(reply) => settle(reply, 0, || self.content.write(buf)),
            Err(e) => Reported::failed(e),
        }
    }

    pub fn write_at_reported(&self, buf: &[u8], offset: i64) -> Reported<usize> {
        match self.ask(RequestKind::Write, offset, buf.len() as u64, Some(buf.to_vec())) {
            Ok(reply) => settle(reply, 0, || self.content.write_at(buf, offset)),
            Err(e) => Reported::failed(e),
        }
    }

    pub fn truncate_reported(&self, size: u64) -> Reported<()> {
        match self.ask(RequestKind::Truncate, 0, size, None) {
            Ok(reply) => settle(reply, (), || self.content.truncate(size)),
            Err(e) => Reported::failed(e),
        }
    }

    /// A committed close resets this view's cursor; a discarded one leaves it.
    pub fn close_reported(&mut self) -> Reported<()> {
        match self.ask(RequestKind::Close, 0, 0, None) {
            Ok(reply) => settle(reply, (), || {
                self.content.close();
                Ok(())
            }),
            Err(e) => Reported::failed(e),
        }
    }

    /// Requests always carry explicit offsets, so seeking needs no permission.
    pub fn seek(&mut self, pos: SeekFrom) -> FsResult<u64> {
        self.content.seek(pos)
    }

    pub fn stat(&self) -> Metadata {
        let mut view = self.clone();
        view.content.close();
        Metadata::new(
            self.content.name(),
            self.content.mode(),
            self.content.modified(),
            self.content.len(),
            Backing::Coordinated(view),
        )
    }
}

impl File for ChanFile {
    fn read(&mut self, buf: &mut [u8]) -> FsResult<usize> {
        self.read_reported(buf).into_result("read")
    }

    fn read_at(&self, buf: &mut [u8], offset: i64) -> FsResult<usize> {
        self.read_at_reported(buf, offset).into_result("read_at")
    }

    fn seek(&mut self, pos: SeekFrom) -> FsResult<u64> {
        ChanFile::seek(self, pos)
    }

    fn close(&mut self) -> FsResult<()> {
        self.close_reported().into_result("close")
    }

    fn stat(&self) -> FsResult<Metadata> {
        Ok(ChanFile::stat(self))
    }

    fn writer(&mut self) -> Option<&mut dyn Writer> {
        Some(self)
    }
}

impl Writer for ChanFile {
    fn write(&mut self, buf: &[u8]) -> FsResult<usize> {
        self.write_reported(buf).into_result("write")
    }

    fn write_at(&self, buf: &[u8], offset: i64) -> FsResult<usize> {
        self.write_at_reported(buf, offset).into_result("write_at")
    }

    fn truncate(&self, size: u64) -> FsResult<()> {
        self.truncate_reported(size).into_result("truncate")
    }
}
