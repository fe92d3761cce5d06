//! Configuration model and helpers used by zfsync connections and transfers.

use crate::error::{ZfsyncError, ZfsyncResult};
use directories_next::ProjectDirs;
use log::info;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/zfsync.toml";
pub const CONFIG_ENV: &str = "ZFSYNC_CONFIG";
const CONFIG_FILE_NAME: &str = "zfsync.toml";
const APP_QUALIFIER: &str = "io";
const APP_ORGANIZATION: &str = "zfsync";
const APP_NAME: &str = "zfsync";

/// Storage tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ZfsCfg {
    #[serde(default = "default_zfs_binary")]
    pub binary: String,
}

fn default_zfs_binary() -> String {
    "zfs".to_string()
}

impl Default for ZfsCfg {
    fn default() -> Self {
        Self {
            binary: default_zfs_binary(),
        }
    }
}

/// How remote hosts are reached.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RemoteCfg {
    #[serde(default = "default_ssh_binary")]
    pub ssh_binary: String,

    #[serde(default = "default_cipher")]
    pub cipher: String,

    /// Host names that run the storage tool directly instead of over ssh.
    #[serde(default = "default_local_hosts")]
    pub local_hosts: Vec<String>,
}

fn default_ssh_binary() -> String {
    "ssh".to_string()
}

fn default_cipher() -> String {
    "aes128-ctr".to_string()
}

fn default_local_hosts() -> Vec<String> {
    vec!["localhost".to_string(), "127.0.0.1".to_string()]
}

impl Default for RemoteCfg {
    fn default() -> Self {
        Self {
            ssh_binary: default_ssh_binary(),
            cipher: default_cipher(),
            local_hosts: default_local_hosts(),
        }
    }
}

/// Replication pipeline knobs.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TransferCfg {
    #[serde(default = "default_meter_binary")]
    pub meter_binary: String,

    /// Arguments placed before the buffer size when launching the meter.
    #[serde(default = "default_meter_args")]
    pub meter_args: Vec<String>,

    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    #[serde(default)]
    pub show_progress: bool,
}

fn default_meter_binary() -> String {
    "clpbar".to_string()
}

fn default_meter_args() -> Vec<String> {
    vec!["-dan".to_string(), "-bs".to_string()]
}

fn default_buffer_size() -> usize {
    1024 * 1024
}

impl Default for TransferCfg {
    fn default() -> Self {
        Self {
            meter_binary: default_meter_binary(),
            meter_args: default_meter_args(),
            buffer_size: default_buffer_size(),
            show_progress: false,
        }
    }
}

/// Top-level configuration snapshot loaded from disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ZfsyncConfig {
    #[serde(default)]
    pub zfs: ZfsCfg,

    #[serde(default)]
    pub remote: RemoteCfg,

    #[serde(default)]
    pub transfer: TransferCfg,

    #[serde(skip)]
    pub path: PathBuf,

    #[serde(skip)]
    pub format: ConfigFormat,
}

/// Tracks whether we parsed TOML or YAML so writes preserve format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConfigFormat {
    #[default]
    Toml,
    Yaml,
}

impl ZfsyncConfig {
    /// Return the canonical system-wide configuration path.
    pub fn default_path() -> &'static Path {
        Path::new(DEFAULT_CONFIG_PATH)
    }

    /// Resolve the per-user configuration path.
    pub fn user_config_path() -> Option<PathBuf> {
        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    /// Read a config file from disk and detect its format from the extension.
    pub fn load<P: AsRef<Path>>(path: P) -> ZfsyncResult<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let format = format_for(path);
        let mut cfg = match format {
            ConfigFormat::Toml => toml::from_str::<Self>(&contents)?,
            ConfigFormat::Yaml => serde_yaml::from_str::<Self>(&contents)?,
        };
        cfg.path = path.to_path_buf();
        cfg.format = format;
        Ok(cfg)
    }

    /// Load `path` when it exists, otherwise fall back to built-in defaults bound to `path`.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> ZfsyncResult<Self> {
        let path = path.as_ref();
        if path.exists() {
            return Self::load(path);
        }

        info!(
            "no configuration at {}; using built-in defaults",
            path.display()
        );
        Ok(Self {
            path: path.to_path_buf(),
            format: format_for(path),
            ..Self::default()
        })
    }

    /// Perform a validation pass and return human-readable issues.
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();

        if self.zfs.binary.trim().is_empty() {
            issues.push("zfs.binary must not be empty".to_string());
        }
        if self.remote.ssh_binary.trim().is_empty() {
            issues.push("remote.ssh_binary must not be empty".to_string());
        }
        if self.remote.cipher.trim().is_empty() {
            issues.push("remote.cipher must not be empty".to_string());
        }

        let mut seen = HashSet::new();
        for host in &self.remote.local_hosts {
            let trimmed = host.trim();
            if trimmed.is_empty() {
                issues.push("remote.local_hosts contains an empty entry".to_string());
                continue;
            }
            if !seen.insert(trimmed.to_string()) {
                issues.push(format!("duplicate local host entry detected: {trimmed}"));
            }
        }

        if self.transfer.buffer_size == 0 {
            issues.push("transfer.buffer_size must be greater than 0".to_string());
        }
        if self.transfer.show_progress && self.transfer.meter_binary.trim().is_empty() {
            issues.push(
                "transfer.show_progress is true but transfer.meter_binary is empty".to_string(),
            );
        }

        issues
    }

    /// Like [`validate`](Self::validate) but fails on the first batch of issues.
    pub fn ensure_valid(&self) -> ZfsyncResult<()> {
        let issues = self.validate();
        if issues.is_empty() {
            Ok(())
        } else {
            Err(ZfsyncError::InvalidConfig(issues.join("; ")))
        }
    }

    /// Returns true when `host` should run the storage tool without ssh.
    pub fn is_local_host(&self, host: &str) -> bool {
        self.remote
            .local_hosts
            .iter()
            .any(|candidate| candidate.trim() == host)
    }

    /// Persist the configuration back to its original on-disk format.
    pub fn save(&self) -> ZfsyncResult<()> {
        let payload = match self.format {
            ConfigFormat::Toml => toml::to_string_pretty(self)?,
            ConfigFormat::Yaml => serde_yaml::to_string(self)?,
        };
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&self.path, payload)?;
        Ok(())
    }
}

fn format_for(path: &Path) -> ConfigFormat {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("toml") => ConfigFormat::Toml,
        _ => ConfigFormat::Yaml,
    }
}
