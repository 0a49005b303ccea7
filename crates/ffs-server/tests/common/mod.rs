//! Shared harness for HTTP integration tests.
//!
//! Starts an [`HttpServer`] on an ephemeral localhost port and wraps a
//! reqwest client with helpers for the verbs the server handles.

#![allow(dead_code)]

use std::sync::Arc;

use ffs_core::ramfs::RamFs;
use ffs_core::router::Router;
use ffs_core::{Dir, File, FileMode, Fs, FsError, FsResult, MemFile, Metadata, OpenFlags};
use ffs_server::{HttpServer, ServerConfig};
use reqwest::{Client, Response, StatusCode};

pub const M1: &str = "Hello World";
pub const M2: &str = "World Hello";

/// A ramfs holding `/index.html` with [`M1`].
pub fn index_ramfs() -> Arc<RamFs> {
    let fs = RamFs::new();
    fs.root()
        .append([MemFile::new(M1.as_bytes().to_vec(), FileMode::new(0o644), "index.html").stat()]);
    Arc::new(fs)
}

fn test_record() -> Metadata {
    MemFile::new(Vec::new(), FileMode::new(0o644), "test").stat()
}

/// Stats succeed, opens and listings are not found.
pub struct NotFoundFs;

impl Fs for NotFoundFs {
    fn open(&self, path: &str, _flags: OpenFlags) -> FsResult<Box<dyn File>> {
        Err(FsError::not_found(path))
    }

    fn read_dir(&self, path: &str) -> FsResult<Box<dyn Dir>> {
        Err(FsError::not_found(path))
    }

    fn stat(&self, _path: &str) -> FsResult<Metadata> {
        Ok(test_record())
    }
}

/// Stats succeed, opens and listings fail with something other than
/// not-found.
pub struct ErrFs;

impl Fs for ErrFs {
    fn open(&self, _path: &str, _flags: OpenFlags) -> FsResult<Box<dyn File>> {
        Err(FsError::Internal("bogus test error".into()))
    }

    fn read_dir(&self, _path: &str) -> FsResult<Box<dyn Dir>> {
        Err(FsError::Internal("bogus test error".into()))
    }

    fn stat(&self, _path: &str) -> FsResult<Metadata> {
        Ok(test_record())
    }
}

pub struct TestServer {
    pub server: HttpServer,
    pub client: Client,
}

impl TestServer {
    /// Serves `fs` for every host.
    pub async fn new(fs: Arc<dyn Fs>) -> Self {
        let server = HttpServer::start(fs, ServerConfig::default())
            .await
            .expect("start HTTP server");
        Self {
            server,
            client: Client::new(),
        }
    }

    /// Serves a ramfs with `/index.html` holding [`M1`].
    pub async fn with_index() -> Self {
        Self::new(index_ramfs()).await
    }

    /// Routes by `Host` through `router`.
    pub async fn routed(router: Arc<Router>) -> Self {
        let server = HttpServer::start_routed(router, ServerConfig::default())
            .await
            .expect("start routed HTTP server");
        Self {
            server,
            client: Client::new(),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.server.url())
    }

    pub async fn get(&self, path: &str) -> Response {
        self.client.get(self.url(path)).send().await.expect("GET")
    }

    pub async fn get_text(&self, path: &str) -> String {
        let resp = self.get(path).await;
        assert_eq!(resp.status(), StatusCode::OK, "GET {path}");
        resp.text().await.expect("GET body")
    }

    pub async fn get_as(&self, host: &str, path: &str) -> Response {
        self.client
            .get(self.url(path))
            .header(reqwest::header::HOST, host)
            .send()
            .await
            .expect("GET with Host")
    }

    pub async fn post(&self, path: &str, body: impl Into<reqwest::Body>) -> Response {
        self.client
            .post(self.url(path))
            .header(reqwest::header::CONTENT_TYPE, "text/html; charset=UTF-8")
            .body(body)
            .send()
            .await
            .expect("POST")
    }

    pub async fn put(&self, path: &str, body: impl Into<reqwest::Body>) -> Response {
        self.client.put(self.url(path)).body(body).send().await.expect("PUT")
    }
}
