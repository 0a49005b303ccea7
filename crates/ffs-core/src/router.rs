//! Host-name routing across several filesystems.
//!
//! A [`Router`] maps host names to backing filesystems. DNS names and
//! sub-domain labels are registered separately and cross-multiplied: adding
//! sub-domain `paste` after DNS names `a.org` and `b.org` routes
//! `paste.a.org` and `paste.b.org`, and the same holds in the other order.
//!
//! The router is itself an [`Fs`] whose root lists one directory per host,
//! with `/<host>/rest` delegated to that host's filesystem as `/rest`.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::dir::MemDir;
use crate::error::{FsError, FsResult};
use crate::fs::{Dir, File, Fs, OpenFlags, clean_path};
use crate::metadata::Metadata;

#[derive(Default)]
struct Table {
    subs: Vec<(String, Arc<dyn Fs>)>,
    dns: Vec<String>,
    hosts: HashMap<String, Arc<dyn Fs>>,
}

/// Host name to filesystem table.
#[derive(Default)]
pub struct Router {
    table: RwLock<Table>,
}

/// Removes any `:port` suffix from a `Host` header value.
pub fn strip_port(host: &str) -> &str {
    match host.rsplit_once(':') {
        Some((name, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => name,
        _ => host,
    }
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes each of `names` to `fs` verbatim.
    pub fn add<I, S>(&self, fs: Arc<dyn Fs>, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut table = self.table.write();
        for name in names {
            let name = name.into();
            debug!(host = %name, "routing host");
            table.hosts.insert(name, Arc::clone(&fs));
        }
    }

    /// Registers DNS names served by `fs`, plus `<sub>.<name>` for every
    /// sub-domain already registered. Those keep the sub-domain's filesystem.
    pub fn add_dns<I, S>(&self, fs: Arc<dyn Fs>, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut table = self.table.write();
        for name in names {
            let name = name.into();
            let routed: Vec<(String, Arc<dyn Fs>)> = table
                .subs
                .iter()
                .map(|(s, sub_fs)| (format!("{s}.{name}"), Arc::clone(sub_fs)))
                .collect();
            table.hosts.extend(routed);
            table.hosts.insert(name.clone(), Arc::clone(&fs));
            debug!(dns = %name, "registered dns name");
            table.dns.push(name);
        }
    }

    /// Registers sub-domain labels served by `fs` under every known DNS name.
    pub fn add_sub<I, S>(&self, fs: Arc<dyn Fs>, labels: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut table = self.table.write();
        for label in labels {
            let label = label.into();
            let routed: Vec<String> = table.dns.iter().map(|d| format!("{label}.{d}")).collect();
            for host in routed {
                table.hosts.insert(host, Arc::clone(&fs));
            }
            debug!(sub = %label, "registered sub-domain");
            table.subs.push((label, Arc::clone(&fs)));
        }
    }

    /// Looks up the filesystem for a `Host` header value, ignoring any port.
    pub fn resolve_host(&self, host: &str) -> Option<Arc<dyn Fs>> {
        self.table.read().hosts.get(strip_port(host)).cloned()
    }

    /// Every routed host name, sorted.
    pub fn hosts(&self) -> Vec<String> {
        let mut hosts: Vec<String> = self.table.read().hosts.keys().cloned().collect();
        hosts.sort();
        hosts
    }

    fn listing(&self) -> MemDir {
        let entries = self.hosts().into_iter().map(|h| MemDir::new(h).stat()).collect();
        MemDir::with_entries("/", entries)
    }

    /// Splits `/<host>/rest` into the host's filesystem and `/rest`.
    fn route(&self, path: &str) -> FsResult<(Arc<dyn Fs>, String)> {
        let clean = clean_path(path);
        let rest = clean.trim_start_matches('/');
        let (host, inner) = rest.split_once('/').unwrap_or((rest, ""));
        let fs = self
            .table
            .read()
            .hosts
            .get(host)
            .cloned()
            .ok_or_else(|| FsError::not_found(path))?;
        Ok((fs, format!("/{inner}")))
    }
}

impl Fs for Router {
    fn open(&self, path: &str, flags: OpenFlags) -> FsResult<Box<dyn File>> {
        let (fs, inner) = self.route(path)?;
        fs.open(&inner, flags)
    }

    fn read_dir(&self, path: &str) -> FsResult<Box<dyn Dir>> {
        if clean_path(path) == "/" {
            return Ok(Box::new(self.listing()));
        }
        let (fs, inner) = self.route(path)?;
        fs.read_dir(&inner)
    }

    fn stat(&self, path: &str) -> FsResult<Metadata> {
        if clean_path(path) == "/" {
            return Ok(self.listing().stat());
        }
        let (fs, inner) = self.route(path)?;
        fs.stat(&inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::read_all_at;
    use crate::ramfs::RamFs;

    fn ramfs_with(path: &str, content: &[u8]) -> Arc<dyn Fs> {
        let fs = RamFs::new();
        let mut f = fs.open(path, OpenFlags::read_write()).unwrap();
        f.writer().unwrap().write(content).unwrap();
        Arc::new(fs)
    }

    #[test]
    fn test_strip_port() {
        assert_eq!(strip_port("example.com:8080"), "example.com");
        assert_eq!(strip_port("example.com"), "example.com");
        assert_eq!(strip_port("localhost:"), "localhost:");
    }

    #[test]
    fn test_add_resolves_exact_names() {
        let router = Router::new();
        router.add(ramfs_with("/a", b"a"), ["one.test"]);
        assert!(router.resolve_host("one.test").is_some());
        assert!(router.resolve_host("one.test:80").is_some());
        assert!(router.resolve_host("two.test").is_none());
    }

    #[test]
    fn test_sub_then_dns_and_dns_then_sub() {
        let router = Router::new();
        let base = ramfs_with("/index.html", b"base");
        let paste = ramfs_with("/index.html", b"paste");

        router.add_sub(Arc::clone(&paste), ["paste"]);
        router.add_dns(Arc::clone(&base), ["a.org"]);
        router.add_dns(Arc::clone(&base), ["b.org"]);
        router.add_sub(Arc::clone(&base), ["www"]);

        assert_eq!(
            router.hosts(),
            vec!["a.org", "b.org", "paste.a.org", "paste.b.org", "www.a.org", "www.b.org"]
        );

        let served = |host: &str| {
            let fs = router.resolve_host(host).unwrap();
            let f = fs.open("/index.html", OpenFlags::read_only()).unwrap();
            read_all_at(f.as_ref(), 0).unwrap()
        };
        assert_eq!(served("paste.a.org"), b"paste");
        assert_eq!(served("paste.b.org:9000"), b"paste");
        assert_eq!(served("www.a.org"), b"base");
        assert_eq!(served("b.org"), b"base");
    }

    #[test]
    fn test_fs_root_lists_hosts() {
        let router = Router::new();
        router.add(ramfs_with("/a", b"a"), ["x.test", "y.test"]);
        assert!(router.stat("/").unwrap().is_dir());
        let mut d = router.read_dir("/").unwrap();
        let listing = d.readdir(0).unwrap();
        let names: Vec<_> = listing.iter().map(|m| m.name()).collect();
        assert_eq!(names, vec!["x.test", "y.test"]);
        assert!(listing.iter().all(Metadata::is_dir));
    }

    #[test]
    fn test_fs_delegates_to_host() {
        let router = Router::new();
        router.add(ramfs_with("/dir/file", b"data"), ["x.test"]);

        assert_eq!(router.stat("/x.test/dir/file").unwrap().size(), 4);
        assert!(router.stat("/x.test").unwrap().is_dir());
        let f = router.open("/x.test/dir/file", OpenFlags::read_only()).unwrap();
        assert_eq!(read_all_at(f.as_ref(), 0).unwrap(), b"data");
        let mut d = router.read_dir("/x.test/dir").unwrap();
        assert_eq!(d.readdir(0).unwrap()[0].name(), "file");

        assert!(router.stat("/unknown.test/file").unwrap_err().is_not_found());
        assert!(matches!(
            router.open("/unknown.test", OpenFlags::read_only()),
            Err(e) if e.is_not_found()
        ));
    }
}
