//! Check-config command - validate a config and show its routing table.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args as ClapArgs;
use comfy_table::{presets::UTF8_FULL_CONDENSED, Table};
use tracing::instrument;

use crate::commands::load_config;

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Config file (defaults to the user config directory)
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

#[instrument(level = "info", name = "cmd::check_config", skip_all)]
pub fn execute(args: &Args) -> Result<()> {
    let (path, config) = load_config(args.config.as_deref())?;
    let routes = config.build_routes()?;

    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_header(vec!["Host", "Filesystem", "Args"]);
    for host in routes.router.hosts() {
        let (kind, fs_args) = match routes.describe(&host) {
            Some(conf) => (conf.kind.to_string(), conf.args.join(" ")),
            None => ("?".to_string(), String::new()),
        };
        table.add_row(vec![host, kind, fs_args]);
    }

    println!("{}", path.display());
    println!("{table}");
    println!(
        "HTTP on {}:{}, 9P on port {}",
        config.bind_address, config.http_port, config.ninep_port
    );
    Ok(())
}
