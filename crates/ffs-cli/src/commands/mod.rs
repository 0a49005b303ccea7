pub mod check_config;
pub mod init_config;
pub mod serve;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::config::Config;

/// Loads the config at `path`, or at the default location when unset.
pub fn load_config(path: Option<&Path>) -> Result<(PathBuf, Config)> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => Config::default_path()?,
    };
    let config = Config::load(&path)
        .with_context(|| format!("run `ffs init-config {}` to create one", path.display()))?;
    Ok((path, config))
}
