//! HTTP front end.
//!
//! Maps GET/HEAD, POST and PUT onto [`Fs`] calls. Request paths are
//! percent-decoded and cleaned, and `/` is served as `/index.html`. Every
//! request starts with a `stat` of the target, so a path the filesystem does
//! not know is a 404 whatever the method.
//!
//! `Fs` is synchronous and coordinated files block their callers, so all
//! filesystem calls run on the blocking pool.

use std::convert::Infallible;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use ffs_core::router::Router;
use ffs_core::{Fs, FsError, FsResult, OpenFlags, clean_path, read_all_at};
use http_body_util::{BodyExt, Full};
use httpdate::HttpDate;
use hyper::body::Incoming;
use hyper::header::{self, HeaderMap, HeaderValue};
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use percent_encoding::percent_decode_str;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::error::ServerResult;

type Body = Full<Bytes>;

const ALLOWED_METHODS: &str = "GET, HEAD, POST, PUT";

/// Configuration for the HTTP server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to bind to (0 = auto-assign).
    pub port: u16,
    /// Bind address.
    pub bind_address: IpAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 0,
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
        }
    }
}

/// What a request is served from.
enum Target {
    Single(Arc<dyn Fs>),
    Routed(Arc<Router>),
}

impl Target {
    fn select(&self, req: &Request<Incoming>) -> Option<Arc<dyn Fs>> {
        match self {
            Target::Single(fs) => Some(Arc::clone(fs)),
            Target::Routed(router) => {
                let host = req
                    .headers()
                    .get(header::HOST)
                    .and_then(|h| h.to_str().ok())
                    .or_else(|| req.uri().host())?;
                router.resolve_host(host)
            }
        }
    }
}

/// A running HTTP server instance.
pub struct HttpServer {
    /// The actual bound address.
    pub addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    server_handle: Option<tokio::task::JoinHandle<()>>,
}

impl HttpServer {
    /// Serves a single filesystem for every host.
    pub async fn start(fs: Arc<dyn Fs>, config: ServerConfig) -> ServerResult<Self> {
        Self::launch(Target::Single(fs), config).await
    }

    /// Serves the filesystem the router picks for each request's `Host`.
    /// Unknown hosts get a 404.
    pub async fn start_routed(router: Arc<Router>, config: ServerConfig) -> ServerResult<Self> {
        Self::launch(Target::Routed(router), config).await
    }

    async fn launch(target: Target, config: ServerConfig) -> ServerResult<Self> {
        let addr = SocketAddr::new(config.bind_address, config.port);
        let listener = TcpListener::bind(addr).await?;
        let actual_addr = listener.local_addr()?;

        info!(addr = %actual_addr, "Starting HTTP server");

        let target = Arc::new(target);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let server_handle = tokio::spawn(async move {
            tokio::select! {
                () = run_server(listener, target) => {
                    debug!("Server loop ended");
                }
                _ = shutdown_rx => {
                    info!("Received shutdown signal");
                }
            }
        });

        Ok(Self {
            addr: actual_addr,
            shutdown_tx: Some(shutdown_tx),
            server_handle: Some(server_handle),
        })
    }

    /// Get the URL for this server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Stop the server.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.server_handle.take() {
            let _ = handle.await;
        }
        info!("HTTP server stopped");
    }

    fn stop_sync(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.server_handle.take() {
            handle.abort();
        }
    }
}

impl Drop for HttpServer {
    fn drop(&mut self) {
        self.stop_sync();
    }
}

async fn run_server(listener: TcpListener, target: Arc<Target>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer_addr)) => {
                let target = Arc::clone(&target);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);
                    let service = service_fn(move |req: Request<Incoming>| {
                        let target = Arc::clone(&target);
                        async move { Ok::<_, Infallible>(handle(&target, req).await) }
                    });

                    if let Err(e) = auto::Builder::new(TokioExecutor::new())
                        .serve_connection(io, service)
                        .await
                    {
                        warn!(peer = %peer_addr, error = %e, "HTTP connection error");
                    }
                });
            }
            Err(e) => {
                error!(error = %e, "Failed to accept connection");
            }
        }
    }
}

/// Percent-decodes and cleans a request path, mapping `/` to `/index.html`.
pub fn request_path(raw: &str) -> String {
    let decoded = percent_decode_str(raw).decode_utf8_lossy();
    let clean = clean_path(&decoded);
    if clean == "/" {
        "/index.html".to_string()
    } else {
        clean
    }
}

async fn handle(target: &Target, req: Request<Incoming>) -> Response<Body> {
    let Some(fs) = target.select(&req) else {
        debug!(host = ?req.headers().get(header::HOST), "No filesystem for host");
        return status_response(StatusCode::NOT_FOUND);
    };
    let path = request_path(req.uri().path());
    let method = req.method().clone();
    debug!(%method, path = %path, "HTTP request");

    match dispatch(fs, &method, path.clone(), req).await {
        Ok(resp) => resp,
        Err(e) => {
            let status = e.status();
            if status.is_server_error() {
                warn!(%method, path = %path, error = %e, "Request failed");
            } else {
                debug!(%method, path = %path, error = %e, "Request rejected");
            }
            status_response(status)
        }
    }
}

async fn dispatch(
    fs: Arc<dyn Fs>,
    method: &Method,
    path: String,
    req: Request<Incoming>,
) -> ServerResult<Response<Body>> {
    let meta = blocking({
        let fs = Arc::clone(&fs);
        let path = path.clone();
        move || fs.stat(&path)
    })
    .await?;

    match *method {
        Method::GET | Method::HEAD => {
            let content = read_file(fs, path.clone()).await?;
            Ok(serve_content(
                &path,
                meta.modified(),
                content,
                req.headers(),
                *method == Method::HEAD,
            ))
        }
        Method::POST => serve_post(fs, path, req).await,
        Method::PUT => serve_put(fs, path, req).await,
        _ => Ok(method_not_allowed()),
    }
}

/// Runs a filesystem call on the blocking pool.
async fn blocking<T, F>(f: F) -> ServerResult<T>
where
    F: FnOnce() -> FsResult<T> + Send + 'static,
    T: Send + 'static,
{
    Ok(tokio::task::spawn_blocking(f).await??)
}

async fn read_file(fs: Arc<dyn Fs>, path: String) -> ServerResult<Vec<u8>> {
    blocking(move || {
        let mut file = fs.open(&path, OpenFlags::read_only())?;
        let content = read_all_at(file.as_ref(), 0)?;
        file.close()?;
        Ok(content)
    })
    .await
}

fn not_writable(path: &str) -> FsError {
    FsError::unsupported(format!("{path}: not writable"))
}

/// Stores the body (or the first part of a multipart form) and answers with
/// what the file holds afterwards.
async fn serve_post(fs: Arc<dyn Fs>, path: String, req: Request<Incoming>) -> ServerResult<Response<Body>> {
    let boundary = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|ct| multer::parse_boundary(ct).ok());
    let body = req.into_body().collect().await?.to_bytes();
    let data = match boundary {
        Some(boundary) => first_part(body, boundary).await?,
        None => body,
    };

    debug!(path = %path, bytes = data.len(), "Writing POST body");
    let name = path.clone();
    let content = blocking(move || {
        let mut file = fs.open(&path, OpenFlags::read_write_truncate())?;
        let writer = file.writer().ok_or_else(|| not_writable(&path))?;
        writer.write_at(&data, 0)?;
        let content = read_all_at(file.as_ref(), 0)?;
        file.close()?;
        Ok(content)
    })
    .await?;
    Ok(content_response(&name, content))
}

/// Replaces the file with the body and answers with the previous content.
async fn serve_put(fs: Arc<dyn Fs>, path: String, req: Request<Incoming>) -> ServerResult<Response<Body>> {
    let body = req.into_body().collect().await?.to_bytes();
    let name = path.clone();
    let previous = blocking(move || {
        let mut file = fs.open(&path, OpenFlags::read_write())?;
        let previous = read_all_at(file.as_ref(), 0)?;
        let writer = file.writer().ok_or_else(|| not_writable(&path))?;
        writer.write_at(&body, 0)?;
        writer.truncate(body.len() as u64)?;
        file.close()?;
        Ok(previous)
    })
    .await?;
    Ok(content_response(&name, previous))
}

/// Content of the first form part. Remaining parts are dropped.
async fn first_part(body: Bytes, boundary: String) -> ServerResult<Bytes> {
    let stream = futures::stream::once(async move { Ok::<Bytes, Infallible>(body) });
    let mut multipart = multer::Multipart::new(stream, boundary);
    let first = match multipart.next_field().await? {
        Some(field) => field.bytes().await?,
        None => Bytes::new(),
    };
    let mut dropped = 0usize;
    while multipart.next_field().await?.is_some() {
        dropped += 1;
    }
    if dropped > 0 {
        debug!(dropped, "Ignoring extra multipart parts");
    }
    Ok(first)
}

/// Outcome of a `Range` header against a body of known size.
#[derive(Debug, PartialEq, Eq)]
enum ByteRange {
    Full,
    Partial { start: u64, end: u64 },
    Unsatisfiable,
}

/// Parses a single `bytes=` range. Multiple or malformed ranges fall back
/// to the full body.
fn parse_range(value: &str, size: u64) -> ByteRange {
    let Some(spec) = value.trim().strip_prefix("bytes=") else {
        return ByteRange::Full;
    };
    if spec.contains(',') {
        return ByteRange::Full;
    }
    let Some((first, last)) = spec.split_once('-') else {
        return ByteRange::Full;
    };
    let (first, last) = (first.trim(), last.trim());

    if first.is_empty() {
        let Ok(suffix) = last.parse::<u64>() else {
            return ByteRange::Full;
        };
        if suffix == 0 || size == 0 {
            return ByteRange::Unsatisfiable;
        }
        return ByteRange::Partial {
            start: size - suffix.min(size),
            end: size - 1,
        };
    }

    let Ok(start) = first.parse::<u64>() else {
        return ByteRange::Full;
    };
    if start >= size {
        return ByteRange::Unsatisfiable;
    }
    let end = if last.is_empty() {
        size - 1
    } else {
        match last.parse::<u64>() {
            Ok(end) if end >= start => end.min(size - 1),
            _ => return ByteRange::Full,
        }
    };
    ByteRange::Partial { start, end }
}

fn not_modified_since(headers: &HeaderMap, last_modified: HttpDate) -> bool {
    headers
        .get(header::IF_MODIFIED_SINCE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<HttpDate>().ok())
        .is_some_and(|since| last_modified <= since)
}

fn serve_content(
    path: &str,
    modified: SystemTime,
    content: Vec<u8>,
    headers: &HeaderMap,
    head: bool,
) -> Response<Body> {
    // Records without a real timestamp skip conditional handling.
    let last_modified = (modified > UNIX_EPOCH).then(|| HttpDate::from(modified));
    if let Some(lm) = last_modified
        && not_modified_since(headers, lm)
    {
        let mut resp = status_response(StatusCode::NOT_MODIFIED);
        *resp.body_mut() = Full::new(Bytes::new());
        set_header(&mut resp, header::LAST_MODIFIED, &lm.to_string());
        return resp;
    }

    let size = content.len() as u64;
    let kind = content_type(path, &content);
    let mut body = Bytes::from(content);
    let mut status = StatusCode::OK;
    let mut content_range = None;

    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .map_or(ByteRange::Full, |v| parse_range(v, size));
    match range {
        ByteRange::Full => {}
        ByteRange::Partial { start, end } => {
            body = body.slice(start as usize..=end as usize);
            status = StatusCode::PARTIAL_CONTENT;
            content_range = Some(format!("bytes {start}-{end}/{size}"));
        }
        ByteRange::Unsatisfiable => {
            let mut resp = status_response(StatusCode::RANGE_NOT_SATISFIABLE);
            set_header(&mut resp, header::CONTENT_RANGE, &format!("bytes */{size}"));
            return resp;
        }
    }

    let len = body.len() as u64;
    let mut resp = Response::new(Full::new(if head { Bytes::new() } else { body }));
    *resp.status_mut() = status;
    let out = resp.headers_mut();
    out.insert(header::CONTENT_TYPE, HeaderValue::from_static(kind));
    out.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    out.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    if let Some(lm) = last_modified {
        set_header(&mut resp, header::LAST_MODIFIED, &lm.to_string());
    }
    if let Some(range) = content_range {
        set_header(&mut resp, header::CONTENT_RANGE, &range);
    }
    resp
}

fn content_response(path: &str, content: Vec<u8>) -> Response<Body> {
    let kind = content_type(path, &content);
    let mut resp = Response::new(Full::new(Bytes::from(content)));
    resp.headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(kind));
    resp
}

fn status_response(status: StatusCode) -> Response<Body> {
    let text = format!(
        "{} {}\n",
        status.as_u16(),
        status.canonical_reason().unwrap_or_default()
    );
    let mut resp = Response::new(Full::new(Bytes::from(text)));
    *resp.status_mut() = status;
    resp.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    resp
}

fn method_not_allowed() -> Response<Body> {
    let mut resp = status_response(StatusCode::METHOD_NOT_ALLOWED);
    resp.headers_mut()
        .insert(header::ALLOW, HeaderValue::from_static(ALLOWED_METHODS));
    resp
}

fn set_header(resp: &mut Response<Body>, name: header::HeaderName, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        resp.headers_mut().insert(name, value);
    }
}

/// Guesses a MIME type from the extension, then from the content.
fn content_type(path: &str, content: &[u8]) -> &'static str {
    let ext = path
        .rsplit_once('/')
        .map_or(path, |(_, name)| name)
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase());
    match ext.as_deref() {
        Some("html" | "htm") => "text/html; charset=utf-8",
        Some("txt") => "text/plain; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js" | "mjs") => "text/javascript; charset=utf-8",
        Some("json") => "application/json",
        Some("xml") => "text/xml; charset=utf-8",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("webp") => "image/webp",
        Some("pdf") => "application/pdf",
        Some("wasm") => "application/wasm",
        Some("mp3") => "audio/mpeg",
        Some("flac") => "audio/flac",
        Some("ogg") => "audio/ogg",
        Some("mkv") => "video/x-matroska",
        Some("webm") => "video/webm",
        Some("mp4") => "video/mp4",
        _ => sniff(content),
    }
}

fn sniff(content: &[u8]) -> &'static str {
    let head = &content[..content.len().min(512)];
    let trimmed = head.trim_ascii_start();
    let lower = trimmed[..trimmed.len().min(14)].to_ascii_lowercase();
    if lower.starts_with(b"<!doctype html") || lower.starts_with(b"<html") {
        "text/html; charset=utf-8"
    } else if std::str::from_utf8(head).is_ok() {
        "text/plain; charset=utf-8"
    } else {
        "application/octet-stream"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 0);
        assert_eq!(config.bind_address, IpAddr::V4(Ipv4Addr::LOCALHOST));
    }

    #[test]
    fn test_request_path() {
        assert_eq!(request_path("/"), "/index.html");
        assert_eq!(request_path(""), "/index.html");
        assert_eq!(request_path("/a/../b"), "/b");
        assert_eq!(request_path("/../../etc/passwd"), "/etc/passwd");
        assert_eq!(request_path("/pastes/hello%20world"), "/pastes/hello world");
        assert_eq!(request_path("/%2e%2e/x"), "/x");
    }

    #[test]
    fn test_parse_range() {
        assert_eq!(parse_range("bytes=0-4", 11), ByteRange::Partial { start: 0, end: 4 });
        assert_eq!(parse_range("bytes=6-", 11), ByteRange::Partial { start: 6, end: 10 });
        assert_eq!(parse_range("bytes=-5", 11), ByteRange::Partial { start: 6, end: 10 });
        assert_eq!(parse_range("bytes=-50", 11), ByteRange::Partial { start: 0, end: 10 });
        assert_eq!(parse_range("bytes=3-100", 11), ByteRange::Partial { start: 3, end: 10 });
        assert_eq!(parse_range("bytes=11-", 11), ByteRange::Unsatisfiable);
        assert_eq!(parse_range("bytes=0-0", 0), ByteRange::Unsatisfiable);
        assert_eq!(parse_range("bytes=0-1,3-4", 11), ByteRange::Full);
        assert_eq!(parse_range("items=0-1", 11), ByteRange::Full);
        assert_eq!(parse_range("bytes=5-2", 11), ByteRange::Full);
    }

    #[test]
    fn test_content_type() {
        assert_eq!(content_type("/index.html", b""), "text/html; charset=utf-8");
        assert_eq!(content_type("/a/song.MP3", b""), "audio/mpeg");
        assert_eq!(content_type("/v1.2/readme", b"plain words"), "text/plain; charset=utf-8");
        assert_eq!(content_type("/new", b"  <!DOCTYPE HTML>"), "text/html; charset=utf-8");
        assert_eq!(content_type("/blob", &[0xff, 0xfe, 0x00]), "application/octet-stream");
    }

    #[test]
    fn test_serve_content_conditional() {
        let modified = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let mut headers = HeaderMap::new();
        headers.insert(
            header::IF_MODIFIED_SINCE,
            HeaderValue::from_str(&HttpDate::from(modified).to_string()).unwrap(),
        );
        let resp = serve_content("/a.txt", modified, b"abc".to_vec(), &headers, false);
        assert_eq!(resp.status(), StatusCode::NOT_MODIFIED);

        let later = modified + Duration::from_secs(60);
        let resp = serve_content("/a.txt", later, b"abc".to_vec(), &headers, false);
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_LENGTH], "3");
    }

    #[test]
    fn test_serve_content_range() {
        let mut headers = HeaderMap::new();
        headers.insert(header::RANGE, HeaderValue::from_static("bytes=6-"));
        let resp = serve_content("/a.txt", SystemTime::now(), b"Hello World".to_vec(), &headers, false);
        assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(resp.headers()[header::CONTENT_RANGE], "bytes 6-10/11");
        assert_eq!(resp.headers()[header::CONTENT_LENGTH], "5");

        headers.insert(header::RANGE, HeaderValue::from_static("bytes=20-"));
        let resp = serve_content("/a.txt", SystemTime::now(), b"Hello World".to_vec(), &headers, false);
        assert_eq!(resp.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(resp.headers()[header::CONTENT_RANGE], "bytes */11");
    }

    #[test]
    fn test_head_has_length_but_no_body() {
        let resp = serve_content("/a.txt", SystemTime::now(), b"Hello".to_vec(), &HeaderMap::new(), true);
        assert_eq!(resp.headers()[header::CONTENT_LENGTH], "5");
        let body = tokio_test::block_on(resp.into_body().collect()).unwrap().to_bytes();
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_first_part_keeps_only_first() {
        let body = Bytes::from_static(
            b"--XYZ\r\nContent-Disposition: form-data; name=\"a\"; filename=\"a.txt\"\r\n\r\nWorld Hello\r\n\
--XYZ\r\nContent-Disposition: form-data; name=\"b\"\r\n\r\nsecond\r\n--XYZ--\r\n",
        );
        let first = first_part(body, "XYZ".to_string()).await.unwrap();
        assert_eq!(first, Bytes::from_static(b"World Hello"));
    }
}
