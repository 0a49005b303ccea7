//! Protocol front ends for ffs filesystems.
//!
//! One [`Fs`](ffs_core::Fs) tree can be served over two protocols at once:
//!
//! - [`HttpServer`]: hyper-based HTTP. GET/HEAD read, POST writes and echoes
//!   the result, PUT replaces and returns the previous content. With
//!   [`HttpServer::start_routed`] the filesystem is picked per request from
//!   the `Host` header through a [`Router`](ffs_core::router::Router).
//! - [`ninep::NinepFs`]: a 9P server over the same contract, started with
//!   [`ninep::serve_tcp`].
//!
//! # Security
//!
//! The HTTP server binds to localhost by default. There is no
//! authentication beyond host-based routing.

mod error;
pub mod http;
pub mod ninep;

pub use error::{ServerError, ServerResult};
pub use http::{HttpServer, ServerConfig};
