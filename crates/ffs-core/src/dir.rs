//! In-memory directory: an ordered, append-only list of metadata records.
//!
//! Like [`MemFile`], a [`MemDir`] is a view. Duplicates share the entry list
//! (appends through one are seen by all) but each keeps its own listing
//! cursor for paged `readdir`. [`MemDir::copy`] hands out a snapshot instead.

use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::RwLock;

use crate::error::{EntryKind, FsError, FsResult};
use crate::file::MemFile;
use crate::fs::{Dir, split_path};
use crate::metadata::{Backing, FileMode, Metadata};

/// Maximum nesting [`MemDir::search`] descends into.
pub const MAX_SEARCH_DEPTH: usize = 64;

#[derive(Debug)]
struct Shared {
    name: String,
    mode: FileMode,
    modified: SystemTime,
    entries: RwLock<Vec<Metadata>>,
}

/// A view onto an in-memory directory.
#[derive(Debug, Clone)]
pub struct MemDir {
    shared: Arc<Shared>,
    cursor: usize,
}

impl MemDir {
    /// Creates an empty directory with mode `d0777`.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_entries(name, Vec::new())
    }

    pub fn with_entries(name: impl Into<String>, entries: Vec<Metadata>) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                mode: FileMode::dir(0o777),
                modified: SystemTime::now(),
                entries: RwLock::new(entries),
            }),
            cursor: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn len(&self) -> usize {
        self.shared.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A new view sharing the entry list. The cursor starts where this
    /// view's is and moves independently from then on.
    pub fn duplicate(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            cursor: self.cursor,
        }
    }

    fn rewound(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            cursor: 0,
        }
    }

    /// Snapshot of the entries, unaffected by later appends.
    pub fn copy(&self) -> Vec<Metadata> {
        self.shared.entries.read().clone()
    }

    pub fn append(&self, records: impl IntoIterator<Item = Metadata>) {
        self.shared.entries.write().extend(records);
    }

    /// Paged listing. See [`Dir::readdir`].
    pub fn readdir(&mut self, n: usize) -> Vec<Metadata> {
        let entries = self.shared.entries.read();
        if n == 0 {
            return entries.clone();
        }
        let start = self.cursor.min(entries.len());
        let end = start.saturating_add(n).min(entries.len());
        self.cursor = end;
        entries[start..end].to_vec()
    }

    /// One-level lookup by name.
    pub fn find(&self, name: &str) -> FsResult<Metadata> {
        self.shared
            .entries
            .read()
            .iter()
            .find(|e| e.name() == name)
            .cloned()
            .ok_or_else(|| FsError::not_found(name))
    }

    /// Depth-first search through nested in-memory directories.
    ///
    /// Only `Backing::Dir` children are descended into, and no deeper than
    /// [`MAX_SEARCH_DEPTH`] levels.
    pub fn search(&self, name: &str) -> FsResult<Metadata> {
        search_in(&self.copy(), name, 0).ok_or_else(|| FsError::not_found(name))
    }

    /// Resolves a multi-segment path relative to this directory.
    pub fn walk(&self, path: &str) -> FsResult<Metadata> {
        let mut parts = split_path(path);
        let first = parts.next().ok_or_else(|| FsError::not_found(path))?;
        let mut current = self.find(first)?;
        for part in parts {
            let next = match current.backing() {
                Backing::Dir(d) => d.find(part).map_err(|_| FsError::not_found(path))?,
                _ => return Err(FsError::wrong_kind(current.name(), EntryKind::Dir)),
            };
            current = next;
        }
        Ok(current)
    }

    /// [`walk`](Self::walk) that must land on an in-memory file.
    pub fn walk_for_file(&self, path: &str) -> FsResult<MemFile> {
        let meta = self.walk(path)?;
        match meta.backing() {
            Backing::File(f) => Ok(f.duplicate()),
            _ => Err(FsError::wrong_kind(path, EntryKind::File)),
        }
    }

    /// [`walk`](Self::walk) that must land on an in-memory directory.
    pub fn walk_for_dir(&self, path: &str) -> FsResult<MemDir> {
        let meta = self.walk(path)?;
        match meta.backing() {
            Backing::Dir(d) => Ok(d.duplicate()),
            _ => Err(FsError::wrong_kind(path, EntryKind::Dir)),
        }
    }

    /// Picks a name not yet used in this directory.
    ///
    /// Returns `name` when free. Otherwise tries `name2`, then keeps bumping
    /// the numeric suffix of the colliding entry (`name3`, `name4`, ...). At
    /// most `len() + 1` candidates are tried.
    pub fn unique_name(&self, name: &str) -> FsResult<String> {
        let entries = self.shared.entries.read();
        let taken = |candidate: &str| entries.iter().any(|e| e.name() == candidate);

        let mut candidate = name.to_string();
        for _ in 0..=entries.len() {
            if !taken(&candidate) {
                return Ok(candidate);
            }
            let tail = &candidate[name.len()..];
            let next = if tail.is_empty() {
                2
            } else {
                tail.parse::<u64>()
                    .map_err(|_| FsError::invalid(format!("unique_name: bad suffix {tail:?}")))?
                    + 1
            };
            candidate = format!("{name}{next}");
        }
        Err(FsError::Internal(format!("unique_name: no free name for {name}")))
    }

    pub fn stat(&self) -> Metadata {
        Metadata::new(
            self.shared.name.clone(),
            self.shared.mode,
            self.shared.modified,
            0,
            Backing::Dir(self.rewound()),
        )
    }
}

fn search_in(entries: &[Metadata], target: &str, depth: usize) -> Option<Metadata> {
    for entry in entries {
        if entry.name() == target {
            return Some(entry.clone());
        }
        if depth + 1 >= MAX_SEARCH_DEPTH {
            continue;
        }
        if let Backing::Dir(d) = entry.backing()
            && let Some(found) = search_in(&d.copy(), target, depth + 1)
        {
            return Some(found);
        }
    }
    None
}

impl Dir for MemDir {
    fn readdir(&mut self, n: usize) -> FsResult<Vec<Metadata>> {
        Ok(MemDir::readdir(self, n))
    }

    fn stat(&self) -> FsResult<Metadata> {
        Ok(MemDir::stat(self))
    }
}
