//! Server configuration file.
//!
//! The config names which filesystems to build and which host names route
//! to them. `base` serves every DNS name in `domains` and the `www`
//! sub-domain; each entry in `filesystems` serves `<subdomain>.<domain>`.

use std::fs;
use std::io;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ffs_core::diskfs::DiskFs;
use ffs_core::pastefs::PasteFs;
use ffs_core::ramfs::RamFs;
use ffs_core::router::Router;
use ffs_core::Fs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Sub-domain the base filesystem is always reachable under.
pub const BASE_SUBDOMAIN: &str = "www";

#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// Config file or its directory could not be written
    #[error("failed to write config {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// Invalid TOML, or an unknown filesystem kind
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    /// Config could not be rendered as TOML
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    /// Refusing to overwrite an existing config
    #[error("config already exists at {0}")]
    Exists(PathBuf),
    /// No home directory to derive the default path from
    #[error("could not determine config directory")]
    NoConfigDir,
    /// A filesystem entry lacks required arguments
    #[error("{kind} filesystem for '{subdomain}' needs {needed} argument(s)")]
    MissingArgs {
        kind: FsKind,
        subdomain: String,
        needed: usize,
    },
}

/// Backing source a config entry builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FsKind {
    /// Directory on disk; `args[0]` is its path.
    Diskfs,
    Pastefs,
    Ramfs,
}

impl FsKind {
    fn required_args(self) -> usize {
        match self {
            FsKind::Diskfs => 1,
            FsKind::Pastefs | FsKind::Ramfs => 0,
        }
    }
}

impl std::fmt::Display for FsKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FsKind::Diskfs => "diskfs",
            FsKind::Pastefs => "pastefs",
            FsKind::Ramfs => "ramfs",
        };
        f.write_str(name)
    }
}

/// One filesystem and the sub-domain it answers on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsConfig {
    pub kind: FsKind,
    pub subdomain: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl FsConfig {
    pub fn new(kind: FsKind, subdomain: impl Into<String>, args: &[&str]) -> Self {
        Self {
            kind,
            subdomain: subdomain.into(),
            args: args.iter().map(ToString::to_string).collect(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let needed = self.kind.required_args();
        if self.args.len() < needed {
            return Err(ConfigError::MissingArgs {
                kind: self.kind,
                subdomain: self.subdomain.clone(),
                needed,
            });
        }
        Ok(())
    }

    /// Builds the backing filesystem. Relative disk paths resolve against
    /// the process working directory.
    pub fn build(&self) -> Result<Arc<dyn Fs>, ConfigError> {
        self.validate()?;
        let fs: Arc<dyn Fs> = match self.kind {
            FsKind::Diskfs => Arc::new(DiskFs::new(&self.args[0])),
            FsKind::Pastefs => Arc::new(PasteFs::new()),
            FsKind::Ramfs => Arc::new(RamFs::new()),
        };
        Ok(fs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_ninep_port")]
    pub ninep_port: u16,
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,
    #[serde(default)]
    pub domains: Vec<String>,
    pub base: FsConfig,
    #[serde(default)]
    pub filesystems: Vec<FsConfig>,
}

fn default_http_port() -> u16 {
    8080
}

fn default_ninep_port() -> u16 {
    5640
}

fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

impl Default for Config {
    fn default() -> Self {
        let web = FsConfig::new(FsKind::Diskfs, BASE_SUBDOMAIN, &["./www"]);
        Self {
            http_port: default_http_port(),
            ninep_port: default_ninep_port(),
            bind_address: default_bind_address(),
            domains: vec!["localhost".into(), "example.com".into()],
            base: web.clone(),
            filesystems: vec![web, FsConfig::new(FsKind::Pastefs, "paste", &[])],
        }
    }
}

/// A built router plus the config entry behind each routed filesystem.
pub struct Routes {
    pub router: Arc<Router>,
    mounts: Vec<(Arc<dyn Fs>, FsConfig)>,
}

impl Routes {
    /// The config entry serving `host`, if it is routed.
    pub fn describe(&self, host: &str) -> Option<&FsConfig> {
        let fs = self.router.resolve_host(host)?;
        self.mounts
            .iter()
            .find(|(mounted, _)| Arc::ptr_eq(mounted, &fs))
            .map(|(_, conf)| conf)
    }
}

impl Config {
    /// Default location: `<config dir>/ffs/config.toml`.
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let dirs = directories::ProjectDirs::from("org", "ffs", "ffs").ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::parse(&text)?;
        tracing::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Writes the config to `path`, creating parent directories. An existing
    /// file is never overwritten.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if path.exists() {
            return Err(ConfigError::Exists(path.to_path_buf()));
        }
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        let text = toml::to_string_pretty(self)?;
        fs::write(path, text).map_err(write_err)?;
        tracing::info!("Saved config to {}", path.display());
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.base.validate()?;
        self.filesystems.iter().try_for_each(FsConfig::validate)
    }

    /// Builds every filesystem and registers its host names.
    pub fn build_routes(&self) -> Result<Routes, ConfigError> {
        let router = Router::new();
        let mut mounts = Vec::with_capacity(self.filesystems.len() + 1);

        let base = self.base.build()?;
        router.add_sub(Arc::clone(&base), [BASE_SUBDOMAIN]);
        router.add_dns(Arc::clone(&base), self.domains.iter().cloned());
        mounts.push((base, self.base.clone()));

        for conf in &self.filesystems {
            let fs = conf.build()?;
            router.add_sub(Arc::clone(&fs), [conf.subdomain.clone()]);
            tracing::debug!(kind = %conf.kind, sub = %conf.subdomain, "built filesystem");
            mounts.push((fs, conf.clone()));
        }

        Ok(Routes {
            router: Arc::new(router),
            mounts,
        })
    }
}
