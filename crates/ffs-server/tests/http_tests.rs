//! HTTP verb handling against in-memory and failing filesystems.

mod common;

use std::sync::Arc;

use common::{ErrFs, M1, M2, NotFoundFs, TestServer, index_ramfs};
use ffs_core::diskfs::DiskFs;
use ffs_core::pastefs::PasteFs;
use ffs_core::ramfs::RamFs;
use ffs_core::router::Router;
use ffs_core::{Fs, OpenFlags, read_all_at};
use reqwest::StatusCode;
use reqwest::header;

// ============================================================================
// GET / HEAD
// ============================================================================

#[tokio::test]
async fn test_get() {
    let server = TestServer::with_index().await;
    assert_eq!(server.get_text("/index.html").await, M1);
}

#[tokio::test]
async fn test_default_get_serves_index() {
    let server = TestServer::with_index().await;
    assert_eq!(server.get_text("/").await, M1);
}

#[tokio::test]
async fn test_get_missing_is_not_found() {
    let server = TestServer::with_index().await;
    let resp = server.get("/nope.html").await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_stat_ok_but_open_not_found_is_404() {
    let server = TestServer::new(Arc::new(NotFoundFs)).await;
    let resp = server.get("/index.html").await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_open_error_is_500() {
    let server = TestServer::new(Arc::new(ErrFs)).await;
    let resp = server.get("/index.html").await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_head_reports_length_without_body() {
    let server = TestServer::with_index().await;
    let resp = server.client.head(server.url("/index.html")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[header::CONTENT_LENGTH], M1.len().to_string().as_str());
    assert!(resp.bytes().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_get_sets_content_type_and_last_modified() {
    let server = TestServer::with_index().await;
    let resp = server.get("/index.html").await;
    assert_eq!(resp.headers()[header::CONTENT_TYPE], "text/html; charset=utf-8");
    assert!(resp.headers().contains_key(header::LAST_MODIFIED));
}

#[tokio::test]
async fn test_get_range() {
    let server = TestServer::with_index().await;
    let resp = server
        .client
        .get(server.url("/index.html"))
        .header(header::RANGE, "bytes=6-")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(resp.text().await.unwrap(), "World");

    let resp = server
        .client
        .get(server.url("/index.html"))
        .header(header::RANGE, "bytes=100-")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::RANGE_NOT_SATISFIABLE);
}

#[tokio::test]
async fn test_get_if_modified_since() {
    let server = TestServer::with_index().await;
    let first = server.get("/index.html").await;
    let last_modified = first.headers()[header::LAST_MODIFIED].clone();

    let resp = server
        .client
        .get(server.url("/index.html"))
        .header(header::IF_MODIFIED_SINCE, last_modified)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_MODIFIED);
}

#[tokio::test]
async fn test_unsupported_method() {
    let server = TestServer::with_index().await;
    let resp = server.client.delete(server.url("/index.html")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(resp.headers()[header::ALLOW], "GET, HEAD, POST, PUT");
}

// ============================================================================
// POST / PUT
// ============================================================================

#[tokio::test]
async fn test_post_echoes_new_content() {
    let server = TestServer::with_index().await;
    let resp = server.post("/index.html", M2).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.text().await.unwrap(), M2);
    assert_eq!(server.get_text("/index.html").await, M2);
}

#[tokio::test]
async fn test_put_returns_old_then_get_returns_new() {
    let server = TestServer::with_index().await;
    let resp = server.put("/index.html", M2).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.text().await.unwrap(), M1);
    assert_eq!(server.get_text("/index.html").await, M2);
}

#[tokio::test]
async fn test_put_shorter_body_truncates() {
    let server = TestServer::with_index().await;
    server.put("/index.html", "Hi").await;
    assert_eq!(server.get_text("/index.html").await, "Hi");
}

#[tokio::test]
async fn test_multipart_post_stores_first_part() {
    let server = TestServer::with_index().await;
    let form = reqwest::multipart::Form::new()
        .part(
            "upload",
            reqwest::multipart::Part::text(M2).file_name("index.html"),
        )
        .text("ignored", "second part");
    let resp = server
        .client
        .post(server.url("/index.html"))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    assert_eq!(server.get_text("/index.html").await, M2);
    // A second read must start from the beginning again.
    assert_eq!(server.get_text("/index.html").await, M2);
}

#[tokio::test]
async fn test_post_writes_through_to_disk() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("index.html"), M1).unwrap();
    let server = TestServer::new(Arc::new(DiskFs::new(dir.path()))).await;

    assert_eq!(server.get_text("/").await, M1);
    let resp = server.post("/index.html", M2).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(std::fs::read_to_string(dir.path().join("index.html")).unwrap(), M2);
}

// ============================================================================
// pastefs over HTTP
// ============================================================================

#[tokio::test]
async fn test_paste_roundtrip() {
    let fs = Arc::new(PasteFs::new());
    let server = TestServer::new(Arc::clone(&fs) as Arc<dyn Fs>).await;

    let page = server.get_text("/index.html").await;
    assert!(page.contains("Paste FS"));

    let resp = server.post("/new", "hello world").await;
    assert_eq!(resp.status(), StatusCode::OK);
    let name = resp.text().await.unwrap();
    assert_eq!(fs.pastes().copy()[0].name(), name);

    assert_eq!(server.get_text(&format!("/pastes/{name}")).await, "hello world");
    let page = server.get_text("/index.html").await;
    assert!(page.contains(&format!("/pastes/{name}")));
}

// ============================================================================
// Host routing
// ============================================================================

#[tokio::test]
async fn test_routed_by_host() {
    let router = Arc::new(Router::new());
    let other = RamFs::new();
    let mut f = other.open("/index.html", OpenFlags::read_write()).unwrap();
    f.writer().unwrap().write(M2.as_bytes()).unwrap();
    assert_eq!(read_all_at(f.as_ref(), 0).unwrap(), M2.as_bytes());

    router.add_dns(index_ramfs(), ["example.com"]);
    router.add_sub(Arc::new(other), ["www"]);
    let server = TestServer::routed(router).await;

    let resp = server.get_as("example.com:8080", "/").await;
    assert_eq!(resp.text().await.unwrap(), M1);

    let resp = server.get_as("www.example.com", "/").await;
    assert_eq!(resp.text().await.unwrap(), M2);

    let resp = server.get_as("unknown.test", "/").await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
