//! Manager configuration and the VM specification schema

pub mod schema;

use crate::error::Result;
use crate::utils::paths::default_base_path;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::path::{Path, PathBuf};

/// What to do when a tolerable reconciliation step fails
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Stop the reconciliation with an operation error
    Abort,
    /// Log a warning and carry on
    Warn,
}

/// Behaviour of `define` for steps whose failures may be benign
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct DefineOptions {
    /// Failure while applying the boot order
    pub boot_order: FailurePolicy,
    /// `registervm` reporting that the machine already exists
    pub already_registered: FailurePolicy,
}

impl Default for DefineOptions {
    fn default() -> Self {
        Self {
            boot_order: FailurePolicy::Warn,
            already_registered: FailurePolicy::Warn,
        }
    }
}

/// Manager configuration
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Root for VM directories; defaults to `$HOME/VirtualBox VMs`
    pub base_path: Option<PathBuf>,
    /// Path to the VBoxManage binary; looked up when unset
    pub vboxmanage: Option<PathBuf>,
    pub define: DefineOptions,
}

impl Config {
    /// Configured base path, or the per-user default
    pub fn base_path(&self) -> Result<PathBuf> {
        match &self.base_path {
            Some(p) => Ok(p.clone()),
            None => default_base_path(),
        }
    }
}

/// Default config file location
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("vbm").join("config.json"))
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<Config> {
    let f = File::open(path)?;
    let cfg: Config = serde_json::from_reader(f)?;
    Ok(cfg)
}

/// Load `path` if given, else the default file if it exists, else defaults
pub fn load_or_default(path: Option<&Path>) -> Result<Config> {
    if let Some(p) = path {
        return load_config(p);
    }
    match default_config_path() {
        Some(p) if p.is_file() => load_config(&p),
        _ => Ok(Config::default()),
    }
}

/// Save configuration to file
pub fn save_config(path: &Path, cfg: &Config) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let f = File::create(path)?;
    serde_json::to_writer_pretty(f, cfg)?;
    Ok(())
}
