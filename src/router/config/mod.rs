//! Process configuration: the listen address and runtime tuning knobs a
//! peer server needs at startup. Loaded from a TOML file, with CLI
//! overrides.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use clap::Parser;
use serde::Deserialize;

use crate::router::error::*;

/// On-disk configuration for a peer server process.
#[derive(Debug, Clone, Deserialize)]
pub struct RouterConfig {
    /// TCP address the peer server listens on.
    pub listen_on: SocketAddr,
    /// Number of worker threads for the tokio runtime. Defaults to the
    /// number of available cores when omitted from the file.
    #[serde(default = "default_async_threads")]
    pub async_threads: usize,
}

fn default_async_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

impl RouterConfig {
    /// Loads configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).wrapped(ErrorKind::Config)?;
        toml::from_str(&text).wrapped(ErrorKind::Config)
    }
}

/// Command-line entry point for the peer server binary: a config file
/// path, plus the flags a deployer would reach for before editing the
/// file itself.
#[derive(Debug, Parser)]
#[command(name = "bw-peer", about = "BOSSWAVE peer session protocol server")]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, env = "BW_PEER_CONFIG", default_value = "bw-peer.toml")]
    pub config: PathBuf,

    /// Overrides `listen_on` from the config file.
    #[arg(long, env = "BW_PEER_LISTEN")]
    pub listen_on: Option<SocketAddr>,
}

impl Cli {
    /// Resolves a full `RouterConfig`, applying any CLI overrides on top
    /// of the file's contents.
    pub fn resolve(&self) -> Result<RouterConfig> {
        let mut config = RouterConfig::load(&self.config)?;
        if let Some(listen_on) = self.listen_on {
            config.listen_on = listen_on;
        }
        Ok(config)
    }
}
