//! Serve command - run the HTTP and 9P servers until interrupted.

use std::net::{IpAddr, Ipv4Addr, TcpListener};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args as ClapArgs;
use ffs_core::Fs;
use ffs_server::{ninep, HttpServer, ServerConfig};
use tracing::{info, instrument, warn};

use crate::commands::load_config;

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Config file (defaults to the user config directory)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// HTTP port, overriding the config
    #[arg(long, env = "FFS_HTTP_PORT")]
    pub http_port: Option<u16>,

    /// 9P port, overriding the config
    #[arg(long, env = "FFS_NINEP_PORT")]
    pub ninep_port: Option<u16>,

    /// HTTP bind address, overriding the config
    #[arg(long)]
    pub bind: Option<IpAddr>,
}

#[instrument(level = "info", name = "cmd::serve", skip_all)]
pub fn execute(args: &Args) -> Result<()> {
    let (path, mut config) = load_config(args.config.as_deref())?;
    if let Some(port) = args.http_port {
        config.http_port = port;
    }
    if let Some(port) = args.ninep_port {
        config.ninep_port = port;
    }
    if let Some(bind) = args.bind {
        config.bind_address = bind;
    }

    let routes = config
        .build_routes()
        .with_context(|| format!("invalid config {}", path.display()))?;
    info!(hosts = routes.router.hosts().len(), "Built router");

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    // The ninep server panics on its own thread if the port is taken, so
    // claim-and-release it first to fail here instead.
    ensure_port_free(config.ninep_port)?;

    rt.block_on(async {
        let server = HttpServer::start_routed(
            Arc::clone(&routes.router),
            ServerConfig {
                port: config.http_port,
                bind_address: config.bind_address,
            },
        )
        .await
        .context("failed to start HTTP server")?;

        let fs: Arc<dyn Fs> = routes.router.clone();
        let ninep_thread = ninep::serve_tcp(fs, config.ninep_port);

        eprintln!("Serving HTTP at {}", server.url());
        eprintln!("Serving 9P at 127.0.0.1:{}", config.ninep_port);
        eprintln!("Press Ctrl+C to stop");

        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for Ctrl+C")?;
        if ninep_thread.is_finished() {
            warn!("9P server exited early");
        }
        info!("Interrupted, shutting down");
        server.stop().await;
        Ok(())
    })
}

/// Fails if nothing can listen on `port` on localhost, where the ninep server binds.
fn ensure_port_free(port: u16) -> Result<()> {
    TcpListener::bind((Ipv4Addr::LOCALHOST, port))
        .map(drop)
        .with_context(|| format!("9P port {port} is unavailable"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_port_free_rejects_bound_port() {
        let held = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = held.local_addr().unwrap().port();
        let err = ensure_port_free(port).unwrap_err();
        assert!(err.to_string().contains(&port.to_string()));

        drop(held);
        assert!(ensure_port_free(port).is_ok());
    }
}
