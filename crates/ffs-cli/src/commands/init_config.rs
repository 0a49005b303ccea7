//! Init-config command - write a starter configuration.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args as ClapArgs;
use tracing::instrument;

use crate::config::Config;

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Where to write the config (defaults to the user config directory)
    pub path: Option<PathBuf>,
}

#[instrument(level = "info", name = "cmd::init_config", skip_all)]
pub fn execute(args: &Args) -> Result<()> {
    let path = match &args.path {
        Some(p) => p.clone(),
        None => Config::default_path()?,
    };
    Config::default().save(&path)?;
    println!("Wrote default config to {}", path.display());
    Ok(())
}
