//! Runtime configuration.
//!
//! Resolution order: command line or environment, then the TOML file, then
//! built-in defaults.

use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::error::{Error, Result};

pub const DEFAULT_ROOT: &str = ".";
pub const DEFAULT_DATA_DIR: &str = "data";
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 5173;

/// Command-line arguments for wardrobe-ledger
#[derive(Parser, Debug, Default)]
#[command(name = "wardrobe-ledger")]
#[command(about = "CSV-backed wardrobe inventory and spending tracker")]
#[command(version)]
pub struct Cli {
    /// Directory the data files live under
    #[arg(short, long, env = "WARDROBE_ROOT")]
    pub root: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "PORT")]
    pub port: Option<u16>,

    /// Interface to bind
    #[arg(long, env = "WARDROBE_HOST")]
    pub host: Option<String>,

    /// Optional TOML config file
    #[arg(short, long, env = "WARDROBE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Rewrite a CSV file with canonical headers to stdout
    Normalize { file: PathBuf },
}

/// Shape of the TOML config file. Every key is optional.
#[derive(Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub root: Option<PathBuf>,
    pub data_dir: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
}

impl FileConfig {
    pub fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn load(path: &std::path::Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        Self::parse(&text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub root: PathBuf,
    pub data_dir: String,
    pub host: String,
    pub port: u16,
}

impl Config {
    pub fn resolve(cli: &Cli, file: FileConfig) -> Self {
        Self {
            root: cli
                .root
                .clone()
                .or(file.root)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_ROOT)),
            data_dir: file.data_dir.unwrap_or_else(|| DEFAULT_DATA_DIR.to_string()),
            host: cli
                .host
                .clone()
                .or(file.host)
                .unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: cli.port.or(file.port).unwrap_or(DEFAULT_PORT),
        }
    }

    /// Reads the file named by `--config`, if any, and merges it with `cli`.
    pub fn load(cli: &Cli) -> Result<Self> {
        let file = match &cli.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        Ok(Self::resolve(cli, file))
    }

    pub fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| Error::Config(format!("bad listen address {}:{}: {}", self.host, self.port, e)))
    }
}
