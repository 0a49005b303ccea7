//! Paste board: POST text to `/new`, read it back under `/pastes/<name>`.
//!
//! Layout:
//!
//! ```text
//! /index.html      rendered list of pastes
//! /new             write here to create a paste
//! /pastes/<name>   one file per paste, named by creation time
//! ```
//!
//! A write-intent open of `/new` hands out a [`ChanFile`] whose buffer holds
//! the new paste's name. Its coordinator copies every write and truncation
//! into the paste and discards them on the handle itself, so the handle keeps
//! reading back the name. Over HTTP, a POST to `/new` answers with the name.

use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::chanfile::{ChanFile, Reply, Request, RequestKind};
use crate::dir::MemDir;
use crate::error::{FsError, FsResult};
use crate::file::MemFile;
use crate::fs::{Dir, File, Fs, OpenFlags, clean_path};
use crate::metadata::{FileMode, Metadata};

const INDEX_TEMPLATE: &str = r#"
<!DOCTYPE HTML>
<head>
	<title>PasteFS</title>
</head>
<body>
	<h1>Paste FS</h1><br><br>
	<p>Recent Pastes:</p><br>
	{% for name in pastes %}
	<a href="/pastes/{{ name }}">{{ name }}</a><br>
	{% endfor %}
</body>
"#;

/// Renders the paste index page for `names`.
pub fn render_index(names: &[String]) -> FsResult<String> {
    let mut ctx = tera::Context::new();
    ctx.insert("pastes", names);
    tera::Tera::one_off(INDEX_TEMPLATE, &ctx, true)
        .map_err(|e| FsError::Internal(format!("rendering paste index: {e}")))
}

/// The paste board filesystem.
pub struct PasteFs {
    new: MemFile,
    pastes: MemDir,
    // Naming and appending a paste happen as one step.
    create_lock: Mutex<()>,
}

impl Default for PasteFs {
    fn default() -> Self {
        Self::new()
    }
}

impl PasteFs {
    pub fn new() -> Self {
        Self {
            new: MemFile::new(b"\n".to_vec(), FileMode::new(0o777), "new"),
            pastes: MemDir::new("pastes"),
            create_lock: Mutex::new(()),
        }
    }

    /// The directory holding every paste.
    pub fn pastes(&self) -> &MemDir {
        &self.pastes
    }

    fn root(&self) -> MemDir {
        MemDir::with_entries("/", vec![self.new.stat(), self.pastes.stat()])
    }

    fn paste_names(&self) -> Vec<String> {
        self.pastes.copy().iter().map(|m| m.name().to_string()).collect()
    }

    fn index(&self) -> FsResult<MemFile> {
        let page = render_index(&self.paste_names())?;
        Ok(MemFile::new(page.into_bytes(), FileMode::new(0o644), "index.html"))
    }

    /// Resolves `/pastes/<name>`; anything else under `/` is not found.
    fn find_paste(&self, path: &str) -> FsResult<Metadata> {
        path.strip_prefix("/pastes/")
            .filter(|name| !name.is_empty())
            .ok_or_else(|| FsError::not_found(path))
            .and_then(|name| self.pastes.find(name))
            .map_err(|_| FsError::not_found(path))
    }

    /// Creates an empty paste and returns the handle that fills it.
    fn create_paste(&self) -> FsResult<Box<dyn File>> {
        let paste = {
            let _guard = self.create_lock.lock();
            let stamp = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default();
            let name = self.pastes.unique_name(&stamp.to_string())?;
            let paste = MemFile::new(Vec::new(), FileMode::new(0o644), name);
            self.pastes.append([paste.stat()]);
            paste
        };
        info!(paste = paste.name(), "created paste");

        let (handle, coordinator) = ChanFile::new(paste.name().as_bytes().to_vec(), FileMode::new(0o644), paste.name());
        coordinator
            .spawn(move |req| redirect(&paste, req))
            .map_err(FsError::Io)?;
        Ok(Box::new(handle))
    }
}

/// Coordination for a `/new` handle: mutations land in `paste`.
fn redirect(paste: &MemFile, req: &Request) -> Reply {
    let result = match req.kind() {
        RequestKind::Read | RequestKind::Close => return Reply::commit(),
        RequestKind::Write => paste.write_at(req.content().unwrap_or_default(), req.offset()).map(drop),
        RequestKind::Truncate => paste.truncate(req.len()),
    };
    match result {
        Ok(()) => {
            debug!(paste = paste.name(), kind = ?req.kind(), len = req.len(), "redirected into paste");
            Reply::discard()
        }
        Err(e) => {
            warn!(paste = paste.name(), error = %e, "paste update failed");
            Reply::discard().with_error(e.into())
        }
    }
}

impl Fs for PasteFs {
    fn open(&self, path: &str, flags: OpenFlags) -> FsResult<Box<dyn File>> {
        match clean_path(path).as_str() {
            "/index.html" => Ok(Box::new(self.index()?)),
            "/new" if flags.wants_write() => self.create_paste(),
            "/new" => Ok(Box::new(self.new.duplicate())),
            other => self
                .find_paste(other)?
                .backing()
                .open_file()
                .ok_or_else(|| FsError::not_found(other)),
        }
    }

    fn read_dir(&self, path: &str) -> FsResult<Box<dyn Dir>> {
        match clean_path(path).as_str() {
            "/" => Ok(Box::new(self.root())),
            "/pastes" => Ok(Box::new(self.pastes.duplicate())),
            other => Err(FsError::not_found(other)),
        }
    }

    fn stat(&self, path: &str) -> FsResult<Metadata> {
        match clean_path(path).as_str() {
            "/" => Ok(self.root().stat()),
            "/new" => Ok(self.new.stat()),
            "/index.html" => Ok(self.index()?.stat()),
            "/pastes" => Ok(self.pastes.stat()),
            other => self.find_paste(other),
        }
    }
}
