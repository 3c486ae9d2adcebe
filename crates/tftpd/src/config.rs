//! Daemon configuration.
//!
//! Loaded from the JSON file named by `TFTPD_CONFIG` when that variable is
//! set, otherwise from individual `TFTPD_*` environment variables. Anything
//! left unset keeps its default.

use crate::error::DaemonError;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tftp_server::ServerConfig;

/// Path of a JSON configuration file
pub const CONFIG_VAR: &str = "TFTPD_CONFIG";
const BIND_ADDR_VAR: &str = "TFTPD_BIND_ADDR";
const ROOT_VAR: &str = "TFTPD_ROOT";
const ALLOW_WRITE_VAR: &str = "TFTPD_ALLOW_WRITE";
const ALLOW_OVERWRITE_VAR: &str = "TFTPD_ALLOW_OVERWRITE";
const STRICT_OPCODES_VAR: &str = "TFTPD_STRICT_OPCODES";
const IDLE_TIMEOUT_VAR: &str = "TFTPD_IDLE_TIMEOUT_SECS";
const BIND_RETRIES_VAR: &str = "TFTPD_BIND_RETRIES";

/// Complete daemon settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonConfig {
    /// Listening socket and protocol options
    #[serde(flatten)]
    pub server: ServerConfig,

    /// Directory served to clients
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Accept write requests
    #[serde(default)]
    pub allow_write: bool,

    /// Let write requests replace existing files
    #[serde(default)]
    pub allow_overwrite: bool,

    /// Extra bind attempts after the first one fails
    #[serde(default = "default_bind_retries")]
    pub bind_retries: u32,
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_bind_retries() -> u32 {
    5
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            root: default_root(),
            allow_write: false,
            allow_overwrite: false,
            bind_retries: default_bind_retries(),
        }
    }
}

impl DaemonConfig {
    /// Loads the configuration from the process environment.
    pub fn load() -> Result<Self, DaemonError> {
        match env::var(CONFIG_VAR) {
            Ok(path) => Self::from_file(Path::new(&path)),
            Err(_) => Self::from_lookup(|key| env::var(key).ok()),
        }
    }

    /// Reads and validates a JSON configuration file.
    pub fn from_file(path: &Path) -> Result<Self, DaemonError> {
        let json = fs::read_to_string(path)
            .map_err(|e| DaemonError::InvalidConfig(format!("Failed to read {}: {}", path.display(), e)))?;
        let config: Self = serde_json::from_str(&json)
            .map_err(|e| DaemonError::InvalidConfig(format!("Failed to parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Builds the configuration from `TFTPD_*` variables supplied by `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, DaemonError> {
        let mut config = Self::default();

        if let Some(value) = lookup(BIND_ADDR_VAR) {
            config.server.bind_addr = parse_value(BIND_ADDR_VAR, &value)?;
        }
        if let Some(value) = lookup(ROOT_VAR) {
            config.root = PathBuf::from(value);
        }
        if let Some(value) = lookup(ALLOW_WRITE_VAR) {
            config.allow_write = parse_flag(ALLOW_WRITE_VAR, &value)?;
        }
        if let Some(value) = lookup(ALLOW_OVERWRITE_VAR) {
            config.allow_overwrite = parse_flag(ALLOW_OVERWRITE_VAR, &value)?;
        }
        if let Some(value) = lookup(STRICT_OPCODES_VAR) {
            config.server.strict_opcodes = parse_flag(STRICT_OPCODES_VAR, &value)?;
        }
        if let Some(value) = lookup(IDLE_TIMEOUT_VAR) {
            config.server.idle_timeout_secs = Some(parse_value(IDLE_TIMEOUT_VAR, &value)?);
        }
        if let Some(value) = lookup(BIND_RETRIES_VAR) {
            config.bind_retries = parse_value(BIND_RETRIES_VAR, &value)?;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), DaemonError> {
        self.server
            .validate()
            .map_err(|e| DaemonError::InvalidConfig(e.to_string()))?;
        if !self.root.is_dir() {
            return Err(DaemonError::InvalidConfig(format!(
                "root {} is not a directory",
                self.root.display()
            )));
        }
        if self.allow_overwrite && !self.allow_write {
            return Err(DaemonError::InvalidConfig(
                "allowOverwrite requires allowWrite".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_value<T>(name: &str, value: &str) -> Result<T, DaemonError>
where
    T: FromStr,
    T::Err: Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| DaemonError::InvalidConfig(format!("{name}={value}: {e}")))
}

fn parse_flag(name: &str, value: &str) -> Result<bool, DaemonError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(DaemonError::InvalidConfig(format!(
            "{name}={value}: expected true or false"
        ))),
    }
}
